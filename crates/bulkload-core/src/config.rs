//! Engine configuration
//!
//! Process-wide default job parameters. Every job starts from these values
//! and applies its own overrides exactly once, before the loader begins.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Lowest allowed creating-phase parallelism.
pub const MIN_PARALLEL: usize = 1;
/// Highest allowed creating-phase parallelism.
pub const MAX_PARALLEL: usize = 8;

/// Process-wide default load parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadDefaults {
    /// Field delimiter for delimited sources ("\t" and "\\t" mean tab)
    pub delimiter: String,
    /// Destination database; None uses the connection's database
    pub target_database: Option<String>,
    /// Destination schema qualifying derived and unqualified table names
    pub target_schema: String,
    /// Whether delimited/spreadsheet sources carry a header row
    pub use_header: bool,
    /// Rows to discard before the header row is considered
    pub header_rows_to_skip: u32,
    /// Drop and recreate an existing destination
    pub overwrite: bool,
    /// Append to an existing destination
    pub append: bool,
    /// Bulk-transfer batch size (also the progress cadence)
    pub batch_size: usize,
    /// Width of discovered text columns when the source reports none
    pub default_column_width: u32,
    /// Marker rewritten to NULL after transfer ("''" disables normalization)
    pub null_value: String,
    /// Quote character for delimited decoding
    pub quote_char: char,
    /// Escape character for delimited decoding
    pub escape_char: char,
    /// Copy the source into a scratch directory before reading
    pub copy_local: bool,
    /// Creating-phase worker pool size, clamped to [1, 8]
    pub max_parallel: usize,
    /// Timeout handed to the bulk-transfer capability
    pub transfer_timeout_secs: u64,
    /// Locked-source retry policy
    pub retry: RetryPolicy,
    /// Root for per-job scratch directories
    pub staging_dir: PathBuf,
}

/// Bounded fixed-backoff retry for locked/busy source files.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_secs: 5,
        }
    }
}

impl Default for LoadDefaults {
    fn default() -> Self {
        Self {
            delimiter: ",".to_string(),
            target_database: None,
            target_schema: "public".to_string(),
            use_header: true,
            header_rows_to_skip: 0,
            overwrite: false,
            append: false,
            batch_size: 10_000,
            default_column_width: 1000,
            null_value: String::new(),
            quote_char: '"',
            escape_char: '"',
            copy_local: false,
            max_parallel: 4,
            transfer_timeout_secs: 600,
            retry: RetryPolicy::default(),
            staging_dir: std::env::temp_dir().join("bulkload"),
        }
    }
}

impl LoadDefaults {
    /// Load defaults from BULKLOAD_* environment variables, falling back to
    /// the built-in values for anything unset or unparseable.
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            delimiter: env_or("BULKLOAD_DELIMITER", base.delimiter),
            target_database: std::env::var("BULKLOAD_TARGET_DATABASE").ok(),
            target_schema: env_or("BULKLOAD_TARGET_SCHEMA", base.target_schema),
            use_header: env_parsed("BULKLOAD_USE_HEADER", base.use_header),
            header_rows_to_skip: env_parsed("BULKLOAD_HEADER_ROWS_TO_SKIP", 0),
            overwrite: env_parsed("BULKLOAD_OVERWRITE", false),
            append: env_parsed("BULKLOAD_APPEND", false),
            batch_size: env_parsed("BULKLOAD_BATCH_SIZE", base.batch_size),
            default_column_width: env_parsed("BULKLOAD_DEFAULT_COLUMN_WIDTH", base.default_column_width),
            null_value: env_or("BULKLOAD_NULL_VALUE", base.null_value),
            quote_char: env_char("BULKLOAD_QUOTE_CHAR", base.quote_char),
            escape_char: env_char("BULKLOAD_ESCAPE_CHAR", base.escape_char),
            copy_local: env_parsed("BULKLOAD_COPY_LOCAL", false),
            max_parallel: clamp_parallel(env_parsed("BULKLOAD_MAX_PARALLEL", base.max_parallel)),
            transfer_timeout_secs: env_parsed("BULKLOAD_TRANSFER_TIMEOUT_SECS", base.transfer_timeout_secs),
            retry: RetryPolicy {
                attempts: env_parsed("BULKLOAD_RETRY_ATTEMPTS", base.retry.attempts),
                delay_secs: env_parsed("BULKLOAD_RETRY_DELAY_SECS", base.retry.delay_secs),
            },
            staging_dir: std::env::var("BULKLOAD_STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or(base.staging_dir),
        }
    }
}

/// Clamp a requested degree of parallelism into [1, 8].
pub fn clamp_parallel(requested: usize) -> usize {
    requested.clamp(MIN_PARALLEL, MAX_PARALLEL)
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_char(key: &str, default: char) -> char {
    std::env::var(key)
        .ok()
        .and_then(|v| v.chars().next())
        .unwrap_or(default)
}
