//! Delimited schema discovery
//!
//! A supplied column-definition artifact is authoritative. Otherwise the
//! header line (or, with headers disabled, one sniffed line) determines the
//! column list, and an artifact is synthesized for downstream reuse.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use bulkload_common::{LoadError, Result};

use crate::config::RetryPolicy;
use crate::job::LoadJob;
use crate::notify::JobNotifier;
use crate::schema::{defs_file, Column};
use crate::staging;

/// Discovery result; `synthesized_defs` is the artifact this run wrote and
/// must delete once the job completes.
#[derive(Debug)]
pub struct DelimitedDiscovery {
    pub columns: Vec<Column>,
    pub synthesized_defs: Option<PathBuf>,
}

pub async fn discover(
    job: &LoadJob,
    source_path: &Path,
    retry: RetryPolicy,
    notifier: &JobNotifier,
) -> Result<DelimitedDiscovery> {
    if let Some(defs_path) = &job.column_defs_path {
        if defs_path.exists() {
            notifier.send(format!(
                "Reading provided column definition file {}",
                defs_path.display()
            ));
            return Ok(DelimitedDiscovery {
                columns: defs_file::read(defs_path)?,
                synthesized_defs: None,
            });
        }
        notifier.send(format!(
            "Warning: a column definition path was supplied, but the file {} doesn't exist",
            defs_path.display()
        ));
    }

    let file = staging::open_with_retry(source_path, retry, notifier).await?;
    let mut reader = BufReader::new(file);

    let mut line = String::new();
    for _ in 0..job.header_rows_to_skip {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
    }

    line.clear();
    if reader.read_line(&mut line)? == 0 {
        return Err(LoadError::config(format!(
            "'{}' has no rows to discover a schema from",
            source_path.display()
        )));
    }

    let mut fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split(job.delimiter).collect();
    // A trailing delimiter produces one empty phantom column; drop it.
    if fields.len() > 1 && fields.last().is_some_and(|f| f.trim().is_empty()) {
        fields.pop();
    }

    let columns: Vec<Column> = fields
        .iter()
        .enumerate()
        .map(|(ordinal, raw)| {
            let name = if job.use_header {
                let cleaned = raw.trim().trim_matches(job.quote_char).trim();
                if cleaned.is_empty() {
                    format!("col_{}", ordinal + 1)
                } else {
                    cleaned.to_string()
                }
            } else {
                format!("col_{}", ordinal + 1)
            };
            Column::text(name, job.default_column_width)
        })
        .collect();

    let defs_path = synthesized_defs_path(source_path);
    let source_name = source_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("source");
    defs_file::write(&defs_path, source_name, job.delimiter, job.use_header, &columns)?;

    Ok(DelimitedDiscovery {
        columns,
        synthesized_defs: Some(defs_path),
    })
}

/// Artifact path: beside the source, named after it, so jobs sharing a
/// directory never clobber each other's definitions.
pub fn synthesized_defs_path(source_path: &Path) -> PathBuf {
    let mut name = source_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("source")
        .to_string();
    name.push_str(".coldefs");
    source_path.with_file_name(name)
}
