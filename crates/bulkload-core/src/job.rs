//! Load jobs
//!
//! One [`LoadJob`] is one source-file-to-destination-table request. Jobs are
//! built from [`LoadDefaults`] plus per-job overrides, validated once, and
//! never mutated after a loader begins processing them.

use std::path::{Path, PathBuf};

use bulkload_common::{LoadError, Result};
use uuid::Uuid;

use crate::config::LoadDefaults;
use crate::table::{derive_table_name, TableRef};

/// Parameters for a single file -> table load.
#[derive(Debug, Clone)]
pub struct LoadJob {
    pub id: Uuid,
    pub source_path: PathBuf,
    /// Explicit format token; None resolves from the extension
    pub format_override: Option<String>,
    pub delimiter: char,
    pub target_database: Option<String>,
    pub target_schema: String,
    /// Explicit destination table; None derives one from the file name
    pub target_table: Option<String>,
    /// Spreadsheet-only: load a single worksheet instead of all of them
    pub sheet_name: Option<String>,
    pub use_header: bool,
    pub header_rows_to_skip: u32,
    pub overwrite: bool,
    pub append: bool,
    pub batch_size: usize,
    pub default_column_width: u32,
    pub null_value: String,
    /// Case-insensitive allow-list of source columns to load
    pub column_filter: Vec<String>,
    /// Previously-saved column-definition artifact, if any
    pub column_defs_path: Option<PathBuf>,
    pub quote_char: char,
    pub escape_char: char,
    pub copy_local: bool,
    pub transfer_timeout_secs: u64,
    pub comments: String,
}

impl LoadJob {
    /// Seed a job from process defaults.
    pub fn from_defaults(defaults: &LoadDefaults, source_path: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            source_path: source_path.into(),
            format_override: None,
            delimiter: parse_delimiter(&defaults.delimiter)?,
            target_database: defaults.target_database.clone(),
            target_schema: defaults.target_schema.clone(),
            target_table: None,
            sheet_name: None,
            use_header: defaults.use_header,
            header_rows_to_skip: defaults.header_rows_to_skip,
            overwrite: defaults.overwrite,
            append: defaults.append,
            batch_size: defaults.batch_size,
            default_column_width: defaults.default_column_width,
            null_value: defaults.null_value.clone(),
            column_filter: Vec::new(),
            column_defs_path: None,
            quote_char: defaults.quote_char,
            escape_char: defaults.escape_char,
            copy_local: defaults.copy_local,
            transfer_timeout_secs: defaults.transfer_timeout_secs,
            comments: String::new(),
        })
    }

    /// The destination this job writes to. Derived from the source file name
    /// when no explicit table was given; an unqualified explicit name is
    /// qualified with the configured schema.
    pub fn target_ref(&self) -> TableRef {
        match &self.target_table {
            Some(explicit) if !explicit.is_empty() => match explicit.split_once('.') {
                Some((schema, table)) => TableRef::new(
                    self.target_database.clone(),
                    schema,
                    table,
                ),
                None => TableRef::new(
                    self.target_database.clone(),
                    &self.target_schema,
                    explicit,
                ),
            },
            _ => TableRef::new(
                self.target_database.clone(),
                &self.target_schema,
                derive_table_name(&self.source_path),
            ),
        }
    }

    /// Comment string recorded with the load.
    pub fn effective_comments(&self) -> String {
        if self.comments.is_empty() {
            "Load from bulkload".to_string()
        } else {
            format!("{} (from bulkload)", self.comments)
        }
    }

    /// Set the column filter from a comma-separated list.
    pub fn set_column_filter(&mut self, raw: &str) {
        self.column_filter = raw
            .split(',')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
    }
}

/// Parse a delimiter override. `\t` (escaped or literal) means tab; anything
/// else must be exactly one ASCII character.
pub fn parse_delimiter(raw: &str) -> Result<char> {
    if raw == "\\t" || raw == "\t" {
        return Ok('\t');
    }
    let mut chars = raw.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii() => Ok(c),
        _ => Err(LoadError::config(format!(
            "Delimiter must be a single ASCII character or \\t, got '{raw}'"
        ))),
    }
}

/// Parse a boolean job field, naming the field on failure.
pub fn parse_bool(field: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        _ => Err(LoadError::config(format!(
            "Invalid boolean value '{raw}' for field '{field}'"
        ))),
    }
}

/// Parse an unsigned numeric job field, naming the field on failure.
pub fn parse_number<T: std::str::FromStr>(field: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| {
        LoadError::config(format!("Invalid numeric value '{raw}' for field '{field}'"))
    })
}

/// Check whether a path still has content to load (blank queue lines are
/// skipped, not errors).
pub fn is_blank_source(path: &Path) -> bool {
    path.as_os_str().is_empty()
}
