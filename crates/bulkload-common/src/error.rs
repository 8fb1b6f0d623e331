//! Error types for bulkload
//!
//! The taxonomy matters to the scheduler: configuration errors are always
//! fatal to the offending job only, source-access errors may be retried
//! before they surface here, and provider/transfer errors are never retried.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for bulkload operations
pub type Result<T> = std::result::Result<T, LoadError>;

/// Main error type for bulkload
#[derive(Error, Debug)]
pub enum LoadError {
    /// Source has no recognized format and no usable override
    #[error("Unsupported format for '{}': only delimited (csv/tab/tsv), spreadsheet (xlsx/xls), stat-package (sas7bdat) and markup (xml) sources are supported", path.display())]
    UnsupportedFormat { path: PathBuf },

    /// Batch queue header named fields outside the allow-list
    #[error("Unrecognized fields in queue file header: {}", .0.join(","))]
    UnrecognizedQueueFields(Vec<String>),

    /// Column filter named columns the source does not have
    #[error("Column(s) specified in the column filter do not exist in the data: {}", .0.join(","))]
    UnmatchedFilterColumns(Vec<String>),

    /// Destination table exists and neither overwrite nor append was requested
    #[error("Table {0} already exists -- use the overwrite flag to overwrite or the append flag to append")]
    DestinationExists(String),

    /// Generic configuration problem (bad delimiter, bad flag value, ...)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source file does not exist
    #[error("Input file '{}' was not found", .0.display())]
    SourceMissing(PathBuf),

    /// Source file stayed locked/busy through every retry attempt
    #[error("Input file '{}' is still locked after {attempts} attempts", path.display())]
    SourceBusy { path: PathBuf, attempts: u32 },

    /// Column-definition artifact could not be parsed
    #[error("Invalid column definition file: {0}")]
    ColumnDefs(String),

    /// A schema-discovery or row-source provider failed
    #[error("Provider error: {0}")]
    Provider(String),

    /// Destination database rejected a statement or a bulk write
    #[error("Database error: {0}")]
    Database(String),

    /// Bulk transfer exceeded its configured timeout
    #[error("Bulk transfer into {table} timed out after {seconds}s")]
    TransferTimeout { table: String, seconds: u64 },

    /// Staging (copy-local / unzip) failed
    #[error("Staging error: {0}")]
    Staging(String),

    /// File system operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LoadError {
    /// Create a generic configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a provider error
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a staging error
    pub fn staging(msg: impl Into<String>) -> Self {
        Self::Staging(msg.into())
    }

    /// Whether this error is a job-level configuration conflict, as opposed
    /// to a source-access or provider/transfer failure.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            LoadError::UnsupportedFormat { .. }
                | LoadError::UnrecognizedQueueFields(_)
                | LoadError::UnmatchedFilterColumns(_)
                | LoadError::DestinationExists(_)
                | LoadError::ColumnDefs(_)
                | LoadError::Config(_)
        )
    }
}
