//! bulkload CLI library
//!
//! Command-line surface for the ingestion engine:
//!
//! - **Single loads**: `bulkload load extract.csv --table raw.trades`
//! - **Directory sweeps**: `bulkload load ./incoming/`
//! - **Batch queues**: `bulkload queue nightly.csv`
//!
//! Process defaults come from BULKLOAD_* environment variables (see
//! [`LoadDefaults::from_env`]); flags override them per invocation.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use bulkload_core::config::clamp_parallel;
use bulkload_core::{LoadDefaults, LoadJob};

/// bulkload - bulk-load tabular files into Postgres
#[derive(Parser, Debug)]
#[command(name = "bulkload")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Postgres connection URL
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load one file, or every supported file in a directory
    Load {
        /// Source file or directory
        path: PathBuf,

        #[command(flatten)]
        options: LoadOptions,
    },

    /// Process a batch queue description file
    Queue {
        /// Queue file: a CSV header naming job fields, one line per job
        path: PathBuf,

        /// Creating-phase worker pool size (clamped to 1-8)
        #[arg(long)]
        max_parallel: Option<usize>,
    },
}

/// Per-invocation overrides of the process defaults.
#[derive(Args, Debug, Default)]
pub struct LoadOptions {
    /// Source format override (csv, tab, xlsx, sas7bdat, xml)
    #[arg(long)]
    pub format: Option<String>,

    /// Field delimiter for delimited sources (use \t for tab)
    #[arg(short, long)]
    pub delimiter: Option<String>,

    /// Destination database
    #[arg(long)]
    pub database: Option<String>,

    /// Destination schema
    #[arg(long)]
    pub schema: Option<String>,

    /// Destination table (derived from the file name when omitted)
    #[arg(short, long)]
    pub table: Option<String>,

    /// Load a single worksheet instead of all of them
    #[arg(long)]
    pub sheet: Option<String>,

    /// Treat the first row as data, not a header
    #[arg(long)]
    pub no_header: bool,

    /// Rows to discard before the header row
    #[arg(long)]
    pub skip_rows: Option<u32>,

    /// Drop and recreate an existing destination table
    #[arg(long)]
    pub overwrite: bool,

    /// Append to an existing destination table
    #[arg(long)]
    pub append: bool,

    /// Bulk-transfer batch size
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Width of discovered text columns
    #[arg(long)]
    pub column_width: Option<u32>,

    /// Marker rewritten to NULL after transfer ('' disables)
    #[arg(long)]
    pub null_value: Option<String>,

    /// Comma-separated allow-list of source columns to load
    #[arg(long)]
    pub columns: Option<String>,

    /// Previously-saved column-definition file
    #[arg(long)]
    pub column_defs: Option<PathBuf>,

    /// Quote character for delimited decoding
    #[arg(long)]
    pub quote: Option<char>,

    /// Escape character for delimited decoding
    #[arg(long)]
    pub escape: Option<char>,

    /// Copy the source to scratch space before reading
    #[arg(long)]
    pub copy_local: bool,

    /// Comment recorded with the load
    #[arg(long)]
    pub comments: Option<String>,

    /// Worker pool size for directory sweeps (clamped to 1-8)
    #[arg(long)]
    pub max_parallel: Option<usize>,
}

impl LoadOptions {
    /// Fold these flags into the process defaults. Applied once, before any
    /// job is constructed.
    pub fn apply_to_defaults(&self, defaults: &mut LoadDefaults) {
        if let Some(delimiter) = &self.delimiter {
            defaults.delimiter = delimiter.clone();
        }
        if let Some(database) = &self.database {
            defaults.target_database = Some(database.clone());
        }
        if let Some(schema) = &self.schema {
            defaults.target_schema = schema.clone();
        }
        if self.no_header {
            defaults.use_header = false;
        }
        if let Some(skip) = self.skip_rows {
            defaults.header_rows_to_skip = skip;
        }
        if self.overwrite {
            defaults.overwrite = true;
        }
        if self.append {
            defaults.append = true;
        }
        if let Some(batch_size) = self.batch_size {
            defaults.batch_size = batch_size;
        }
        if let Some(width) = self.column_width {
            defaults.default_column_width = width;
        }
        if let Some(null_value) = &self.null_value {
            defaults.null_value = null_value.clone();
        }
        if let Some(quote) = self.quote {
            defaults.quote_char = quote;
        }
        if let Some(escape) = self.escape {
            defaults.escape_char = escape;
        }
        if self.copy_local {
            defaults.copy_local = true;
        }
        if let Some(parallel) = self.max_parallel {
            defaults.max_parallel = clamp_parallel(parallel);
        }
    }

    /// Fold the job-scoped flags into a constructed job.
    pub fn apply_to_job(&self, job: &mut LoadJob) {
        job.format_override = self.format.clone();
        if let Some(table) = &self.table {
            job.target_table = Some(table.clone());
        }
        job.sheet_name = self.sheet.clone();
        if let Some(columns) = &self.columns {
            job.set_column_filter(columns);
        }
        job.column_defs_path = self.column_defs.clone();
        if let Some(comments) = &self.comments {
            job.comments = comments.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_load_options_override_defaults() {
        let options = LoadOptions {
            delimiter: Some("\\t".to_string()),
            schema: Some("raw".to_string()),
            no_header: true,
            overwrite: true,
            batch_size: Some(500),
            max_parallel: Some(64),
            ..Default::default()
        };

        let mut defaults = LoadDefaults::default();
        options.apply_to_defaults(&mut defaults);
        assert_eq!(defaults.delimiter, "\\t");
        assert_eq!(defaults.target_schema, "raw");
        assert!(!defaults.use_header);
        assert!(defaults.overwrite);
        assert_eq!(defaults.batch_size, 500);
        assert_eq!(defaults.max_parallel, 8, "pool size is clamped");
    }

    #[test]
    fn test_unset_options_leave_defaults_alone() {
        let options = LoadOptions::default();
        let mut defaults = LoadDefaults::default();
        let before = defaults.clone();
        options.apply_to_defaults(&mut defaults);
        assert_eq!(defaults.delimiter, before.delimiter);
        assert_eq!(defaults.use_header, before.use_header);
        assert_eq!(defaults.max_parallel, before.max_parallel);
    }

    #[test]
    fn test_job_scoped_options() {
        let options = LoadOptions {
            format: Some("csv".to_string()),
            table: Some("raw.trades".to_string()),
            columns: Some("Name,Age".to_string()),
            ..Default::default()
        };

        let mut job = LoadJob::from_defaults(&LoadDefaults::default(), "x.dat").unwrap();
        options.apply_to_job(&mut job);
        assert_eq!(job.format_override.as_deref(), Some("csv"));
        assert_eq!(job.target_table.as_deref(), Some("raw.trades"));
        assert_eq!(job.column_filter, vec!["Name", "Age"]);
    }

    #[test]
    fn test_parse_load_invocation() {
        let cli = Cli::parse_from([
            "bulkload",
            "load",
            "extract.csv",
            "--table",
            "raw.trades",
            "--overwrite",
            "--delimiter",
            "|",
        ]);
        match cli.command {
            Commands::Load { path, options } => {
                assert_eq!(path, PathBuf::from("extract.csv"));
                assert_eq!(options.table.as_deref(), Some("raw.trades"));
                assert!(options.overwrite);
                assert_eq!(options.delimiter.as_deref(), Some("|"));
            }
            other => panic!("expected load command, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_queue_invocation() {
        let cli = Cli::parse_from(["bulkload", "queue", "nightly.csv", "--max-parallel", "6"]);
        match cli.command {
            Commands::Queue { path, max_parallel } => {
                assert_eq!(path, PathBuf::from("nightly.csv"));
                assert_eq!(max_parallel, Some(6));
            }
            other => panic!("expected queue command, got {other:?}"),
        }
    }
}
