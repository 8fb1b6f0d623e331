//! Postgres destination
//!
//! Production implementation of [`SqlExecutor`] and [`BulkTransfer`] on a
//! `sqlx` pool. Bulk transfer rides `COPY ... FROM STDIN` in text format,
//! flushing and reporting progress once per batch. Identifiers are rendered
//! from sanitized, quoted names; values are always bound.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolCopyExt, PgPoolOptions};
use sqlx::PgPool;
use tokio::time::{timeout, Duration};
use tracing::debug;

use bulkload_common::{LoadError, Result};

use crate::rows::RowSource;
use crate::schema::Column;
use crate::sql::{BulkTransfer, ProgressFn, SqlExecutor, SqlTarget, TargetFactory, TransferOptions};
use crate::table::{quote_ident, sanitize_sql_name, TableRef};

pub struct PgTarget {
    pool: PgPool,
}

impl PgTarget {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(url)
            .await
            .map_err(db_err)?;
        Ok(Self::from_pool(pool))
    }
}

#[async_trait]
impl SqlExecutor for PgTarget {
    async fn table_exists(&self, table: &TableRef) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
             WHERE table_schema = $1 AND table_name = $2)",
        )
        .bind(&table.schema)
        .bind(&table.table)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(exists)
    }

    async fn row_count(&self, table: &TableRef) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar(&format!("SELECT count(*) FROM {}", table.qualified()))
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(count)
    }

    async fn create_table(&self, table: &TableRef, columns: &[Column]) -> Result<()> {
        sqlx::query(&format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            quote_ident(&table.schema)
        ))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        let ddl = build_create_table(table, columns);
        debug!(table = %table, "creating destination table");
        sqlx::query(&ddl).execute(&self.pool).await.map_err(db_err)?;
        Ok(())
    }

    async fn drop_table(&self, table: &TableRef) -> Result<()> {
        sqlx::query(&format!("DROP TABLE {}", table.qualified()))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn nullify(&self, table: &TableRef, columns: &[Column], marker: &str) -> Result<u64> {
        let mut rewritten = 0u64;
        for column in columns {
            let ident = quote_ident(&sanitize_sql_name(&column.name));
            let result = sqlx::query(&format!(
                "UPDATE {} SET {ident} = NULL WHERE {ident} = $1",
                table.qualified()
            ))
            .bind(marker)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
            rewritten += result.rows_affected();
        }
        Ok(rewritten)
    }
}

#[async_trait]
impl BulkTransfer for PgTarget {
    async fn write_rows(
        &self,
        table: &TableRef,
        columns: &[Column],
        rows: &mut (dyn RowSource + Send),
        options: &TransferOptions,
        progress: &ProgressFn,
    ) -> Result<u64> {
        let column_list: Vec<String> = columns
            .iter()
            .map(|c| quote_ident(&sanitize_sql_name(&c.name)))
            .collect();
        let statement = format!(
            "COPY {} ({}) FROM STDIN WITH (FORMAT text)",
            table.qualified(),
            column_list.join(", ")
        );

        let copy = async {
            let mut sink = self.pool.copy_in_raw(&statement).await.map_err(db_err)?;
            let mut buffer: Vec<u8> = Vec::with_capacity(64 * 1024);
            let mut total = 0u64;
            let mut pending = 0usize;

            while let Some(row) = rows.next_row()? {
                encode_text_row(&row, &mut buffer);
                total += 1;
                pending += 1;
                if pending >= options.batch_size {
                    sink.send(buffer.as_slice()).await.map_err(db_err)?;
                    buffer.clear();
                    pending = 0;
                    progress(total);
                }
            }
            if !buffer.is_empty() {
                sink.send(buffer.as_slice()).await.map_err(db_err)?;
                progress(total);
            }

            sink.finish().await.map_err(db_err)
        };

        match timeout(Duration::from_secs(options.timeout_secs), copy).await {
            Ok(result) => result,
            Err(_) => Err(LoadError::TransferTimeout {
                table: table.qualified(),
                seconds: options.timeout_secs,
            }),
        }
    }
}

/// Connects one pooled [`PgTarget`] per destination database, derived from a
/// base connection URL.
pub struct PgTargetFactory {
    base_url: String,
    pools: tokio::sync::Mutex<HashMap<String, Arc<dyn SqlTarget>>>,
}

impl PgTargetFactory {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            pools: tokio::sync::Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl TargetFactory for PgTargetFactory {
    async fn connect(&self, database: Option<&str>) -> Result<Arc<dyn SqlTarget>> {
        let key = database.unwrap_or("").to_string();
        let mut pools = self.pools.lock().await;
        if let Some(existing) = pools.get(&key) {
            return Ok(existing.clone());
        }

        let url = match database {
            Some(db) => rewrite_database_url(&self.base_url, db),
            None => self.base_url.clone(),
        };
        let target: Arc<dyn SqlTarget> = Arc::new(PgTarget::connect(&url).await?);
        pools.insert(key, target.clone());
        Ok(target)
    }
}

/// `CREATE TABLE` DDL: one variable-length text column per discovered
/// Column, sized when a width is known, nullable per the discovered flag.
fn build_create_table(table: &TableRef, columns: &[Column]) -> String {
    let definitions: Vec<String> = columns
        .iter()
        .map(|column| {
            let ident = quote_ident(&sanitize_sql_name(&column.name));
            let sql_type = match column.max_length {
                Some(width) => format!("varchar({width})"),
                None => "text".to_string(),
            };
            let nullability = if column.nullable { "NULL" } else { "NOT NULL" };
            format!("{ident} {sql_type} {nullability}")
        })
        .collect();
    format!(
        "CREATE TABLE {} ({})",
        table.qualified(),
        definitions.join(", ")
    )
}

/// Encode one row in COPY text format: tab-separated, `\N` for NULL, with
/// backslash, tab, newline and carriage return escaped.
fn encode_text_row(row: &[Option<String>], buffer: &mut Vec<u8>) {
    for (index, value) in row.iter().enumerate() {
        if index > 0 {
            buffer.push(b'\t');
        }
        match value {
            None => buffer.extend_from_slice(b"\\N"),
            Some(text) => {
                for byte in text.bytes() {
                    match byte {
                        b'\\' => buffer.extend_from_slice(b"\\\\"),
                        b'\t' => buffer.extend_from_slice(b"\\t"),
                        b'\n' => buffer.extend_from_slice(b"\\n"),
                        b'\r' => buffer.extend_from_slice(b"\\r"),
                        other => buffer.push(other),
                    }
                }
            }
        }
    }
    buffer.push(b'\n');
}

/// Swap the database path of a connection URL, keeping query parameters.
fn rewrite_database_url(base: &str, database: &str) -> String {
    let (without_query, query) = match base.split_once('?') {
        Some((b, q)) => (b, Some(q)),
        None => (base, None),
    };
    let authority_start = without_query.find("://").map(|i| i + 3).unwrap_or(0);
    let prefix = match without_query[authority_start..].find('/') {
        Some(offset) => &without_query[..authority_start + offset],
        None => without_query,
    };
    let mut url = format!("{prefix}/{database}");
    if let Some(q) = query {
        url.push('?');
        url.push_str(q);
    }
    url
}

fn db_err(e: sqlx::Error) -> LoadError {
    LoadError::database(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_create_table() {
        let table = TableRef::new(None, "raw", "trades");
        let columns = vec![
            Column::text("id", 100),
            Column {
                name: "notes field".to_string(),
                max_length: None,
                nullable: false,
            },
        ];
        assert_eq!(
            build_create_table(&table, &columns),
            "CREATE TABLE \"raw\".\"trades\" \
             (\"id\" varchar(100) NULL, \"notes_field\" text NOT NULL)"
        );
    }

    #[test]
    fn test_encode_text_row() {
        let mut buffer = Vec::new();
        encode_text_row(
            &[
                Some("plain".to_string()),
                None,
                Some("tab\there".to_string()),
                Some("back\\slash".to_string()),
            ],
            &mut buffer,
        );
        assert_eq!(
            String::from_utf8(buffer).unwrap(),
            "plain\t\\N\ttab\\there\tback\\\\slash\n"
        );
    }

    #[test]
    fn test_encode_empty_string_is_not_null() {
        let mut buffer = Vec::new();
        encode_text_row(&[Some(String::new()), None], &mut buffer);
        assert_eq!(String::from_utf8(buffer).unwrap(), "\t\\N\n");
    }

    #[test]
    fn test_rewrite_database_url() {
        assert_eq!(
            rewrite_database_url("postgres://u:p@host:5432/base?sslmode=require", "warehouse"),
            "postgres://u:p@host:5432/warehouse?sslmode=require"
        );
        assert_eq!(
            rewrite_database_url("postgres://host", "db"),
            "postgres://host/db"
        );
        assert_eq!(
            rewrite_database_url("postgres://host/old", "new"),
            "postgres://host/new"
        );
    }
}
