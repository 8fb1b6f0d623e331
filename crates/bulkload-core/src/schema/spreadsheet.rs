//! Spreadsheet schema discovery
//!
//! Worksheet targeting plus catalog normalization over a
//! [`WorksheetProvider`]. With no explicit sheet, every worksheet becomes its
//! own destination table named after it; with one, only that sheet loads.

use bulkload_common::Result;

use crate::job::LoadJob;
use crate::provider::WorksheetProvider;
use crate::schema::Column;
use crate::table::{sanitize_sql_name, TableRef};

/// The (worksheet, destination) pairs one job covers.
pub fn worksheet_targets(
    job: &LoadJob,
    provider: &mut dyn WorksheetProvider,
) -> Result<Vec<(String, TableRef)>> {
    if let Some(sheet) = &job.sheet_name {
        let table = match &job.target_table {
            Some(explicit) if !explicit.is_empty() => job.target_ref(),
            _ => sheet_table(job, sheet),
        };
        return Ok(vec![(sheet.clone(), table)]);
    }

    Ok(provider
        .worksheet_names()?
        .into_iter()
        .map(|sheet| {
            let table = sheet_table(job, &sheet);
            (sheet, table)
        })
        .collect())
}

fn sheet_table(job: &LoadJob, sheet: &str) -> TableRef {
    TableRef::new(
        job.target_database.clone(),
        &job.target_schema,
        sanitize_sql_name(sheet),
    )
}

/// Columns for one worksheet: the provider catalog sorted by ordinal, with
/// repeated ordinal/name pairs dropped, every column widened to default-width
/// text.
pub fn discover(
    provider: &mut dyn WorksheetProvider,
    sheet: &str,
    default_width: u32,
) -> Result<Vec<Column>> {
    let mut catalog = provider.catalog(sheet)?;
    catalog.sort_by(|a, b| a.ordinal.cmp(&b.ordinal));
    catalog.dedup_by(|a, b| a.ordinal == b.ordinal && a.name == b.name);

    Ok(catalog
        .into_iter()
        .map(|entry| Column::text(entry.name, default_width))
        .collect())
}
