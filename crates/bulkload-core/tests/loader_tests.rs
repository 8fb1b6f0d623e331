//! Loader pipeline behavior across the four format variants, against the
//! in-memory destination.

mod common;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::FakeTarget;

use bulkload_common::{LoadError, Result};
use bulkload_core::config::{LoadDefaults, RetryPolicy};
use bulkload_core::job::LoadJob;
use bulkload_core::loader::Loader;
use bulkload_core::notify::NotifySink;
use bulkload_core::provider::{ProviderColumn, ProviderRegistry, StatPackageProvider};
use bulkload_core::rows::{RowSource, VecRows};
use bulkload_core::sql::SqlTarget;
use bulkload_core::table::TableRef;

fn loader(job: LoadJob, target: Arc<FakeTarget>, staging: &Path) -> Loader {
    loader_with(job, target, ProviderRegistry::builtin(), staging)
}

fn loader_with(
    job: LoadJob,
    target: Arc<FakeTarget>,
    providers: ProviderRegistry,
    staging: &Path,
) -> Loader {
    let target: Arc<dyn SqlTarget> = target;
    Loader::new(
        job,
        target,
        providers,
        NotifySink::disabled(),
        RetryPolicy {
            attempts: 1,
            delay_secs: 0,
        },
        staging.to_path_buf(),
    )
}

fn job_for(path: &Path) -> LoadJob {
    LoadJob::from_defaults(&LoadDefaults::default(), path).unwrap()
}

fn key(schema: &str, table: &str) -> String {
    TableRef::new(None, schema, table).key()
}

// ---------------------------------------------------------------------------
// delimited

#[tokio::test]
async fn test_wide_source_loads_all_columns() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wide.csv");
    let header: Vec<String> = (0..300).map(|i| format!("c{i}")).collect();
    let row: Vec<String> = (0..300).map(|i| format!("v{i}")).collect();
    std::fs::write(&path, format!("{}\n{}\n", header.join(","), row.join(","))).unwrap();

    let target = FakeTarget::new();
    loader(job_for(&path), target.clone(), dir.path())
        .run()
        .await
        .unwrap();

    let rows = target.rows(&key("public", "wide"));
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].len(), 300);
    assert_eq!(rows[0][299], Some("v299".to_string()));
}

#[tokio::test]
async fn test_narrow_source_loads_through_csv_provider() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("narrow.csv");
    std::fs::write(&path, "a,b,c\n\"1,5\",x,y\n").unwrap();

    let target = FakeTarget::new();
    loader(job_for(&path), target.clone(), dir.path())
        .run()
        .await
        .unwrap();

    let rows = target.rows(&key("public", "narrow"));
    // quoted delimiter survives the narrow decoder
    assert_eq!(rows[0][0], Some("1,5".to_string()));
}

#[tokio::test]
async fn test_unmatched_filter_column_names_offender() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("people.csv");
    std::fs::write(&path, "Id,Name,Age,City\n1,alice,30,berlin\n").unwrap();

    let target = FakeTarget::new();
    let mut job = job_for(&path);
    job.set_column_filter("Name,Zzz");
    let err = loader(job, target, dir.path()).run().await.unwrap_err();
    match err {
        LoadError::UnmatchedFilterColumns(names) => assert_eq!(names, vec!["Zzz"]),
        other => panic!("expected UnmatchedFilterColumns, got {other:?}"),
    }
}

#[tokio::test]
async fn test_filter_subset_creates_subset_schema_in_discovery_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("people.csv");
    std::fs::write(&path, "Id,Name,Age,City\n1,alice,30,berlin\n").unwrap();

    let target = FakeTarget::new();
    let mut job = job_for(&path);
    job.set_column_filter("Age,Name");
    loader(job, target.clone(), dir.path()).run().await.unwrap();

    let created = target.created_columns.lock().unwrap();
    let columns = created.get(&key("public", "people")).unwrap();
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Name", "Age"], "discovery order, not filter order");
}

#[tokio::test]
async fn test_progress_notifications_at_batch_cadence() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("people.csv");
    let mut contents = String::from("id\n");
    for i in 0..10 {
        contents.push_str(&format!("{i}\n"));
    }
    std::fs::write(&path, contents).unwrap();

    let (sink, mut rx) = NotifySink::channel();
    let mut job = job_for(&path);
    job.batch_size = 3;
    let target = FakeTarget::new();
    let target_dyn: Arc<dyn SqlTarget> = target;
    Loader::new(
        job,
        target_dyn,
        ProviderRegistry::builtin(),
        sink,
        RetryPolicy {
            attempts: 1,
            delay_secs: 0,
        },
        dir.path().to_path_buf(),
    )
    .run()
    .await
    .unwrap();

    let mut progress_events = 0;
    let mut summary_seen = false;
    while let Ok(event) = rx.try_recv() {
        if event.message.ends_with("rows loaded") {
            progress_events += 1;
        }
        if event.message.starts_with("Rows per second") {
            summary_seen = true;
        }
    }
    assert!(progress_events >= 1, "at least one progress event per batch");
    assert!(summary_seen, "final summary notification is emitted");
}

// ---------------------------------------------------------------------------
// null normalization

#[tokio::test]
async fn test_null_marker_rewrites_and_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("people.csv");
    std::fs::write(&path, "id,name\n1,NA\n2,bob\n").unwrap();

    let target = FakeTarget::new();
    let mut job = job_for(&path);
    job.null_value = "NA".to_string();
    let table = job.target_ref();
    loader(job, target.clone(), dir.path()).run().await.unwrap();

    let rows = target.rows(&table.key());
    assert_eq!(rows[0][1], None, "marker value became NULL");
    assert_eq!(rows[1][1], Some("bob".to_string()));

    // a second pass with the same marker changes nothing
    use bulkload_core::sql::SqlExecutor;
    let rewritten = target.nullify(&table, &[], "NA").await.unwrap();
    assert_eq!(rewritten, 0);
}

#[tokio::test]
async fn test_quoted_empty_marker_disables_normalization() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("people.csv");
    std::fs::write(&path, "id,name\n1,\n").unwrap();

    let target = FakeTarget::new();
    let mut job = job_for(&path);
    job.null_value = "''".to_string();
    let table = job.target_ref();
    loader(job, target.clone(), dir.path()).run().await.unwrap();

    let rows = target.rows(&table.key());
    assert_eq!(rows[0][1], Some(String::new()), "empty string survives");
}

// ---------------------------------------------------------------------------
// spreadsheet

const WORKBOOK: &str = r#"<?xml version="1.0"?>
<workbook xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
  <sheets>
    <sheet name="People" sheetId="1" r:id="rId1"/>
    <sheet name="Cities" sheetId="2" r:id="rId2"/>
  </sheets>
</workbook>"#;

const RELS: &str = r#"<?xml version="1.0"?>
<Relationships>
  <Relationship Id="rId1" Type="t" Target="worksheets/sheet1.xml"/>
  <Relationship Id="rId2" Type="t" Target="worksheets/sheet2.xml"/>
</Relationships>"#;

const SHEET1: &str = r#"<?xml version="1.0"?>
<worksheet><sheetData>
  <row r="1"><c r="A1" t="inlineStr"><is><t>Name</t></is></c><c r="B1" t="inlineStr"><is><t>Age</t></is></c></row>
  <row r="2"><c r="A2" t="inlineStr"><is><t>alice</t></is></c><c r="B2"><v>30</v></c></row>
  <row r="3"><c r="A3" t="inlineStr"><is><t>bob</t></is></c><c r="B3"><v>41</v></c></row>
</sheetData></worksheet>"#;

const SHEET2: &str = r#"<?xml version="1.0"?>
<worksheet><sheetData>
  <row r="1"><c r="A1" t="inlineStr"><is><t>City</t></is></c></row>
  <row r="2"><c r="A2" t="inlineStr"><is><t>berlin</t></is></c></row>
</sheetData></worksheet>"#;

fn write_workbook(dir: &Path) -> PathBuf {
    let path = dir.join("book.xlsx");
    let file = std::fs::File::create(&path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default();
    for (name, contents) in [
        ("xl/workbook.xml", WORKBOOK),
        ("xl/_rels/workbook.xml.rels", RELS),
        ("xl/worksheets/sheet1.xml", SHEET1),
        ("xl/worksheets/sheet2.xml", SHEET2),
    ] {
        writer.start_file(name, options).unwrap();
        writer.write_all(contents.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
    path
}

#[tokio::test]
async fn test_workbook_loads_one_table_per_worksheet() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_workbook(dir.path());

    let target = FakeTarget::new();
    let summary = loader(job_for(&path), target.clone(), dir.path())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.tables.len(), 2);

    let people = target.rows(&key("public", "People"));
    // header row is skipped before data rows reach the transfer step
    assert_eq!(people.len(), 2);
    assert_eq!(people[0], vec![Some("alice".into()), Some("30".into())]);

    let cities = target.rows(&key("public", "Cities"));
    assert_eq!(cities, vec![vec![Some("berlin".to_string())]]);
}

#[tokio::test]
async fn test_explicit_sheet_loads_only_that_sheet() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_workbook(dir.path());

    let target = FakeTarget::new();
    let mut job = job_for(&path);
    job.sheet_name = Some("Cities".to_string());
    job.target_table = Some("city_list".to_string());
    let summary = loader(job, target.clone(), dir.path()).run().await.unwrap();

    assert_eq!(summary.tables.len(), 1);
    assert_eq!(target.rows(&key("public", "city_list")).len(), 1);
    assert!(target.rows(&key("public", "People")).is_empty());
}

// ---------------------------------------------------------------------------
// stat package

struct FakeSas;

impl StatPackageProvider for FakeSas {
    fn catalog(&mut self) -> Result<Vec<ProviderColumn>> {
        Ok(vec![
            ProviderColumn {
                ordinal: 0,
                name: "subject_id".into(),
                width: Some(12),
                nullable: false,
            },
            ProviderColumn {
                ordinal: 1,
                name: "visit".into(),
                width: Some(8),
                nullable: true,
            },
        ])
    }

    fn rows(&mut self) -> Result<Box<dyn RowSource + Send>> {
        Ok(Box::new(VecRows::new(vec![
            vec![Some("s-001".into()), Some("baseline".into())],
            vec![Some("s-002".into()), None],
        ])))
    }
}

#[tokio::test]
async fn test_stat_package_via_registered_provider() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trial.sas7bdat");
    std::fs::write(&path, b"binary blob").unwrap();

    let providers =
        ProviderRegistry::default().with_stat_package(|_| Ok(Box::new(FakeSas)));
    let target = FakeTarget::new();
    loader_with(job_for(&path), target.clone(), providers, dir.path())
        .run()
        .await
        .unwrap();

    let created = target.created_columns.lock().unwrap();
    let columns = created.get(&key("public", "trial")).unwrap();
    assert!(!columns[0].nullable, "provider-reported nullability is kept");
    assert!(columns[1].nullable);
    drop(created);

    assert_eq!(target.rows(&key("public", "trial")).len(), 2);
}

#[tokio::test]
async fn test_stat_package_without_provider_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trial.sas7bdat");
    std::fs::write(&path, b"binary blob").unwrap();

    let target = FakeTarget::new();
    let err = loader(job_for(&path), target, dir.path())
        .run()
        .await
        .unwrap_err();
    assert!(err.is_configuration());
}

// ---------------------------------------------------------------------------
// markup

#[tokio::test]
async fn test_markup_record_set_loads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("feed.xml");
    std::fs::write(
        &path,
        "<people>\
           <person><name>alice</name><age>30</age></person>\
           <person><name>bob</name><age>41</age></person>\
         </people>",
    )
    .unwrap();

    let target = FakeTarget::new();
    let summary = loader(job_for(&path), target.clone(), dir.path())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.rows_loaded(), 2);
    let rows = target.rows(&key("public", "feed"));
    assert_eq!(rows[1], vec![Some("bob".into()), Some("41".into())]);
}

// ---------------------------------------------------------------------------
// zip staging

#[tokio::test]
async fn test_zipped_csv_is_unwrapped_and_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let zip_path = dir.path().join("extract.zip");
    let file = std::fs::File::create(&zip_path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    writer
        .start_file("extract.csv", zip::write::FileOptions::default())
        .unwrap();
    writer.write_all(b"id,name\n1,alice\n").unwrap();
    writer.finish().unwrap();

    let target = FakeTarget::new();
    let mut job = job_for(&zip_path);
    // the destination derives from the zip name unless given explicitly
    job.target_table = Some("extract".to_string());
    loader(job, target.clone(), dir.path()).run().await.unwrap();

    assert_eq!(
        target.rows(&key("public", "extract")),
        vec![vec![Some("1".to_string()), Some("alice".to_string())]]
    );
}
