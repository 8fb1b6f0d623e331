//! Batch job-queue scheduler
//!
//! Consumes a batch description (or a directory sweep), classifies jobs into
//! creators and appenders per destination, runs the creating phase under a
//! bounded worker pool and the appending phase strictly serially in file
//! order, and isolates every per-job failure into an error record. The
//! creator/appender split is what guarantees no appending job ever races a
//! not-yet-created destination and no two appends to one destination
//! interleave.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};

use bulkload_common::{LoadError, Result};

use crate::config::{clamp_parallel, LoadDefaults};
use crate::format;
use crate::job::{is_blank_source, parse_bool, parse_delimiter, parse_number, LoadJob};
use crate::loader::{LoadSummary, Loader};
use crate::notify::NotifySink;
use crate::provider::ProviderRegistry;
use crate::sql::TargetFactory;

/// Fields a batch description header may name, in any order.
pub const QUEUE_FIELDS: &[&str] = &[
    "source_path",
    "delimiter",
    "target_database",
    "target_schema",
    "target_table",
    "use_header",
    "header_rows_to_skip",
    "overwrite",
    "append",
    "batch_size",
    "comments",
];

/// Jobs split into the two execution phases.
pub struct ClassifiedJobs {
    pub creators: Vec<LoadJob>,
    pub appenders: Vec<LoadJob>,
}

/// Classify jobs by destination: the first job in file order referencing a
/// destination is its creator and is forced to overwrite; every later job on
/// the same destination is forced to append, regardless of its stated flags.
/// Appenders also copy their source locally, since the serial phase often
/// re-reads files that creators on shared paths still hold open.
pub fn classify(jobs: Vec<LoadJob>) -> ClassifiedJobs {
    let mut seen: HashSet<String> = HashSet::new();
    let mut creators = Vec::new();
    let mut appenders = Vec::new();

    for mut job in jobs {
        let key = job.target_ref().key();
        if seen.insert(key) {
            job.overwrite = true;
            job.append = false;
            creators.push(job);
        } else {
            job.overwrite = false;
            job.append = true;
            job.copy_local = true;
            appenders.push(job);
        }
    }

    ClassifiedJobs {
        creators,
        appenders,
    }
}

/// Parse a batch description file: a CSV header naming which job fields are
/// present, then one positional line per job. Unknown header fields are
/// fatal; blank source-path lines are skipped; blank cells keep the process
/// default for their field.
pub fn parse_queue_file(path: &Path, defaults: &LoadDefaults) -> Result<Vec<LoadJob>> {
    if !path.exists() {
        return Err(LoadError::SourceMissing(path.to_path_buf()));
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|e| LoadError::config(format!("cannot read queue file: {e}")))?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| LoadError::config(format!("cannot read queue file header: {e}")))?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();

    let unrecognized: Vec<String> = headers
        .iter()
        .filter(|h| !QUEUE_FIELDS.contains(&h.as_str()))
        .cloned()
        .collect();
    if !unrecognized.is_empty() {
        return Err(LoadError::UnrecognizedQueueFields(unrecognized));
    }

    let mut jobs = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| LoadError::config(format!("malformed queue line: {e}")))?;

        let mut job = LoadJob::from_defaults(defaults, "")?;
        for (index, field) in headers.iter().enumerate() {
            if let Some(value) = record.get(index) {
                if !value.is_empty() {
                    apply_queue_field(&mut job, field, value)?;
                }
            }
        }

        if is_blank_source(&job.source_path) {
            continue;
        }
        jobs.push(job);
    }

    Ok(jobs)
}

fn apply_queue_field(job: &mut LoadJob, field: &str, value: &str) -> Result<()> {
    match field {
        "source_path" => job.source_path = PathBuf::from(value),
        "delimiter" => job.delimiter = parse_delimiter(value)?,
        "target_database" => job.target_database = Some(value.to_string()),
        "target_schema" => job.target_schema = value.to_string(),
        "target_table" => job.target_table = Some(value.to_string()),
        "use_header" => job.use_header = parse_bool(field, value)?,
        "header_rows_to_skip" => job.header_rows_to_skip = parse_number(field, value)?,
        "overwrite" => job.overwrite = parse_bool(field, value)?,
        "append" => job.append = parse_bool(field, value)?,
        "batch_size" => job.batch_size = parse_number(field, value)?,
        "comments" => job.comments = value.to_string(),
        other => {
            return Err(LoadError::UnrecognizedQueueFields(vec![other.to_string()]));
        }
    }
    Ok(())
}

/// What became of one job.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub source_path: PathBuf,
    pub target_table: String,
    pub rows_loaded: Option<i64>,
    pub error: Option<String>,
}

impl JobOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-batch summary. A batch "succeeds" as a process even when individual
/// jobs failed; callers needing per-job status read the outcomes or the
/// error records.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<JobOutcome>,
}

impl BatchReport {
    pub fn succeeded_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.succeeded_count()
    }
}

pub struct BatchScheduler {
    defaults: LoadDefaults,
    factory: Arc<dyn TargetFactory>,
    providers: ProviderRegistry,
    sink: NotifySink,
}

impl BatchScheduler {
    pub fn new(
        defaults: LoadDefaults,
        factory: Arc<dyn TargetFactory>,
        providers: ProviderRegistry,
        sink: NotifySink,
    ) -> Self {
        Self {
            defaults,
            factory,
            providers,
            sink,
        }
    }

    /// Process a batch description file.
    pub async fn run_queue_file(&self, path: &Path) -> Result<BatchReport> {
        info!(queue = %path.display(), "processing batch queue file");
        let jobs = parse_queue_file(path, &self.defaults)?;
        Ok(self.run_jobs(jobs).await)
    }

    /// Load every supported file directly under a directory.
    pub async fn run_directory(&self, dir: &Path) -> Result<BatchReport> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.is_file() && format::is_supported_file(p))
            .collect();
        files.sort();

        let jobs = files
            .into_iter()
            .map(|file| LoadJob::from_defaults(&self.defaults, file))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.run_jobs(jobs).await)
    }

    /// Run one job outside batch classification (single-file mode); its
    /// failure propagates instead of being recorded.
    pub async fn run_single(&self, job: LoadJob) -> Result<LoadSummary> {
        self.execute(job).await
    }

    /// Two-phase batch execution: creators under the worker pool, then
    /// appenders serially in file order. An appender whose creator failed is
    /// failed outright rather than racing a missing or half-built table.
    pub async fn run_jobs(&self, jobs: Vec<LoadJob>) -> BatchReport {
        let classified = classify(jobs);
        let parallelism = clamp_parallel(self.defaults.max_parallel);
        info!(
            creators = classified.creators.len(),
            appenders = classified.appenders.len(),
            max_parallel = parallelism,
            "starting batch"
        );

        let creator_results: Vec<(String, JobOutcome)> = stream::iter(classified.creators)
            .map(|job| async move {
                let key = job.target_ref().key();
                (key, self.run_recorded(job).await)
            })
            .buffer_unordered(parallelism)
            .collect()
            .await;

        let mut failed_creators: HashMap<String, PathBuf> = HashMap::new();
        let mut outcomes = Vec::with_capacity(creator_results.len());
        for (key, outcome) in creator_results {
            if !outcome.succeeded() {
                failed_creators.insert(key, outcome.source_path.clone());
            }
            outcomes.push(outcome);
        }

        info!(appenders = classified.appenders.len(), "appending phase");
        for job in classified.appenders {
            let key = job.target_ref().key();
            if let Some(creator_source) = failed_creators.get(&key) {
                let message = format!(
                    "skipped: creating job '{}' for {} failed",
                    creator_source.display(),
                    job.target_ref()
                );
                warn!(source = %job.source_path.display(), "{message}");
                self.write_error_record(&job.source_path, &message);
                outcomes.push(JobOutcome {
                    source_path: job.source_path.clone(),
                    target_table: job.target_ref().qualified(),
                    rows_loaded: None,
                    error: Some(message),
                });
                continue;
            }
            outcomes.push(self.run_recorded(job).await);
        }

        let report = BatchReport { outcomes };
        info!(
            succeeded = report.succeeded_count(),
            failed = report.failed_count(),
            "batch finished"
        );
        report
    }

    /// Run one job, catching its failure into an error record so siblings
    /// keep going.
    async fn run_recorded(&self, job: LoadJob) -> JobOutcome {
        let source_path = job.source_path.clone();
        let target_table = job.target_ref().qualified();

        match self.execute(job).await {
            Ok(summary) => {
                info!(
                    source = %source_path.display(),
                    table = %target_table,
                    rows = summary.rows_loaded(),
                    "job completed"
                );
                JobOutcome {
                    source_path,
                    target_table,
                    rows_loaded: Some(summary.rows_loaded()),
                    error: None,
                }
            }
            Err(e) => {
                error!(
                    source = %source_path.display(),
                    table = %target_table,
                    error = %e,
                    "job failed"
                );
                self.write_error_record(&source_path, &e.to_string());
                JobOutcome {
                    source_path,
                    target_table,
                    rows_loaded: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn execute(&self, job: LoadJob) -> Result<LoadSummary> {
        let target = self.factory.connect(job.target_database.as_deref()).await?;
        Loader::new(
            job,
            target,
            self.providers.clone(),
            self.sink.clone(),
            self.defaults.retry,
            self.defaults.staging_dir.clone(),
        )
        .run()
        .await
    }

    fn write_error_record(&self, source: &Path, message: &str) {
        let record_path = PathBuf::from(format!("{}_error.log", source.display()));
        let contents = format!("{}: {message}\n", source.display());
        if let Err(e) = std::fs::write(&record_path, contents) {
            warn!(
                record = %record_path.display(),
                error = %e,
                "failed to write error record"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(source: &str, table: &str, overwrite: bool, append: bool) -> LoadJob {
        let mut j = LoadJob::from_defaults(&LoadDefaults::default(), source).unwrap();
        if !table.is_empty() {
            j.target_table = Some(table.to_string());
        }
        j.overwrite = overwrite;
        j.append = append;
        j
    }

    #[test]
    fn test_classify_first_reference_creates_rest_append() {
        let classified = classify(vec![
            job("a.csv", "T", true, false),
            job("b.csv", "T", false, true),
            job("c.csv", "T", false, true),
        ]);
        assert_eq!(classified.creators.len(), 1);
        assert_eq!(classified.creators[0].source_path, PathBuf::from("a.csv"));
        assert!(classified.creators[0].overwrite);
        assert!(!classified.creators[0].append);

        let appender_sources: Vec<_> = classified
            .appenders
            .iter()
            .map(|j| j.source_path.clone())
            .collect();
        assert_eq!(
            appender_sources,
            vec![PathBuf::from("b.csv"), PathBuf::from("c.csv")]
        );
        assert!(classified.appenders.iter().all(|j| j.append && !j.overwrite));
        assert!(classified.appenders.iter().all(|j| j.copy_local));
    }

    #[test]
    fn test_classify_ignores_stated_flags() {
        // the first job asks to append, the second to overwrite; policy wins
        let classified = classify(vec![
            job("a.csv", "T", false, true),
            job("b.csv", "T", true, false),
        ]);
        assert!(classified.creators[0].overwrite);
        assert_eq!(classified.creators[0].source_path, PathBuf::from("a.csv"));
        assert!(classified.appenders[0].append);
        assert_eq!(classified.appenders[0].source_path, PathBuf::from("b.csv"));
    }

    #[test]
    fn test_classify_distinct_destinations_are_independent() {
        let classified = classify(vec![
            job("a.csv", "T", false, false),
            job("b.csv", "U", false, false),
        ]);
        assert_eq!(classified.creators.len(), 2);
        assert!(classified.appenders.is_empty());
    }

    #[test]
    fn test_classify_derived_table_names_share_a_destination() {
        // same file loaded twice with no explicit table: both derive the same
        // destination and must be causally ordered
        let classified = classify(vec![
            job("/in/trades.csv", "", false, false),
            job("/other/trades.csv", "", false, false),
        ]);
        assert_eq!(classified.creators.len(), 1);
        assert_eq!(classified.appenders.len(), 1);
    }

    #[test]
    fn test_classify_table_keys_are_case_insensitive() {
        let classified = classify(vec![
            job("a.csv", "Trades", false, false),
            job("b.csv", "trades", false, false),
        ]);
        assert_eq!(classified.creators.len(), 1);
        assert_eq!(classified.appenders.len(), 1);
    }

    #[test]
    fn test_parse_queue_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.csv");
        std::fs::write(
            &path,
            "source_path,target_table,overwrite,append\n\
             a.csv,T,true,false\n\
             b.csv,T,false,true\n\
             ,X,true,false\n\
             c.csv,U,,\n",
        )
        .unwrap();

        let jobs = parse_queue_file(&path, &LoadDefaults::default()).unwrap();
        assert_eq!(jobs.len(), 3, "blank source-path line is skipped");
        assert_eq!(jobs[0].source_path, PathBuf::from("a.csv"));
        assert!(jobs[0].overwrite);
        assert_eq!(jobs[1].target_table.as_deref(), Some("T"));
        assert!(jobs[1].append);
        // blank cells keep the defaults
        assert!(!jobs[2].overwrite);
        assert!(!jobs[2].append);
    }

    #[test]
    fn test_parse_queue_file_rejects_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.csv");
        std::fs::write(
            &path,
            "source_path,target_table,frobnicate,wibble\na.csv,T,x,y\n",
        )
        .unwrap();

        let err = parse_queue_file(&path, &LoadDefaults::default()).unwrap_err();
        match err {
            LoadError::UnrecognizedQueueFields(fields) => {
                assert_eq!(fields, vec!["frobnicate", "wibble"]);
            }
            other => panic!("expected UnrecognizedQueueFields, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_queue_file_header_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.csv");
        std::fs::write(&path, "Source_Path,Target_Table\na.csv,T\n").unwrap();
        let jobs = parse_queue_file(&path, &LoadDefaults::default()).unwrap();
        assert_eq!(jobs.len(), 1);
    }

    #[test]
    fn test_parse_queue_file_missing_file() {
        let err =
            parse_queue_file(Path::new("/no/queue.csv"), &LoadDefaults::default()).unwrap_err();
        assert!(matches!(err, LoadError::SourceMissing(_)));
    }
}
