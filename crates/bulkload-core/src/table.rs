//! Destination tables and their lifecycle
//!
//! [`TableRef`] identifies a destination; [`ensure_table`] enforces the
//! create / overwrite / append contract against it. The conflict case
//! {exists, !overwrite, !append} fails before anything is mutated.

use std::path::Path;

use bulkload_common::{LoadError, Result};

use crate::notify::JobNotifier;
use crate::schema::Column;
use crate::sql::SqlExecutor;

/// Destinations stop growing at this many columns; the rest are dropped with
/// a warning.
pub const COLUMN_LIMIT: usize = 1024;

/// (database, schema, table) tuple identifying a destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    /// None targets the connection's own database
    pub database: Option<String>,
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(
        database: Option<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            database,
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Schema-qualified, quoted name for statements and messages.
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }

    /// Case-insensitive identity used for creator/appender classification.
    /// Jobs with equal keys are causally ordered; different keys are
    /// independent.
    pub fn key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.database.as_deref().unwrap_or("").to_lowercase(),
            self.schema.to_lowercase(),
            self.table.to_lowercase()
        )
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.qualified())
    }
}

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Derive a table name from a source file: the base name with every non-word
/// character replaced by `_`.
pub fn derive_table_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("table");
    stem.chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Sanitize a raw column name for DDL: non-word runs collapse to `_`,
/// surrounding underscores are trimmed, leading digits are stripped.
pub fn sanitize_sql_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_sep = false;
    for c in raw.chars() {
        if c.is_alphanumeric() || c == '_' {
            out.push(c);
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    let trimmed = out.trim_matches('_');
    let stripped = trimmed
        .trim_start_matches(|c: char| c.is_ascii_digit())
        .trim_start_matches('_');
    if stripped.is_empty() {
        "_".to_string()
    } else {
        stripped.to_string()
    }
}

/// Make the destination match the requested policy.
///
/// Returns the number of columns the destination carries, which is fewer than
/// requested when the column limit truncates a create.
pub async fn ensure_table(
    sql: &dyn SqlExecutor,
    table: &TableRef,
    columns: &[Column],
    overwrite: bool,
    append: bool,
    notifier: &JobNotifier,
) -> Result<usize> {
    let exists = sql.table_exists(table).await?;

    if exists && !overwrite {
        if !append {
            return Err(LoadError::DestinationExists(table.qualified()));
        }
        // Appending to an existing table: rows go in as-is, schema drift is
        // the caller's responsibility.
        return Ok(columns.len());
    }

    if exists {
        notifier.send(format!("Dropping existing table {table}"));
        sql.drop_table(table).await?;
    }

    notifier.send(format!(
        "Creating target table {table}; overwrite = {overwrite}; append = {append}"
    ));
    let capped = if columns.len() > COLUMN_LIMIT {
        notifier.send(format!("{COLUMN_LIMIT} column limit reached"));
        &columns[..COLUMN_LIMIT]
    } else {
        columns
    };
    sql.create_table(table, capped).await?;
    Ok(capped.len())
}
