//! Destination capabilities
//!
//! The engine never talks to a database engine directly; it goes through two
//! capability traits. [`SqlExecutor`] covers existence checks, row counts,
//! DDL and null-normalization; [`BulkTransfer`] performs the batched
//! high-throughput write. `sql::postgres` carries the production
//! implementation; tests substitute in-memory fakes.

pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use bulkload_common::Result;

use crate::rows::RowSource;
use crate::schema::Column;
use crate::table::TableRef;

/// Knobs handed to the bulk-transfer capability.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Rows per flushed batch; also the progress-callback cadence
    pub batch_size: usize,
    /// Hard ceiling on one transfer; a stuck transfer blocks only its own
    /// worker slot
    pub timeout_secs: u64,
}

/// Row counts and timing captured around one transfer, for reporting only.
#[derive(Debug, Clone)]
pub struct TransferResult {
    pub row_count_before: i64,
    pub row_count_after: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TransferResult {
    /// Rows this transfer added. `row_count_before` is captured prior to any
    /// write, so this is never negative.
    pub fn rows_loaded(&self) -> i64 {
        self.row_count_after - self.row_count_before
    }

    /// Load rate; a sub-second transfer counts as one second.
    pub fn rows_per_second(&self) -> f64 {
        let mut elapsed = (self.finished_at - self.started_at)
            .num_milliseconds() as f64
            / 1000.0;
        if elapsed <= 0.0 {
            elapsed = 1.0;
        }
        self.rows_loaded() as f64 / elapsed
    }
}

/// Progress observer invoked with the running row total.
pub type ProgressFn = dyn Fn(u64) + Send + Sync;

/// Generic SQL execution against the destination.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn table_exists(&self, table: &TableRef) -> Result<bool>;

    async fn row_count(&self, table: &TableRef) -> Result<i64>;

    /// Create the table with one generic-text column per entry, nullable per
    /// the discovered flag.
    async fn create_table(&self, table: &TableRef, columns: &[Column]) -> Result<()>;

    async fn drop_table(&self, table: &TableRef) -> Result<()>;

    /// Server-side null normalization: rewrite values equal to `marker` to
    /// true NULLs in every listed column. Returns the number of rewritten
    /// values; running it twice with the same marker changes nothing the
    /// second time.
    async fn nullify(&self, table: &TableRef, columns: &[Column], marker: &str) -> Result<u64>;
}

/// Batched bulk write of a row stream into a destination table.
#[async_trait]
pub trait BulkTransfer: Send + Sync {
    /// Drain `rows` into `table`, flushing every `options.batch_size` rows
    /// and reporting progress at the same cadence. Returns total rows
    /// written.
    async fn write_rows(
        &self,
        table: &TableRef,
        columns: &[Column],
        rows: &mut (dyn RowSource + Send),
        options: &TransferOptions,
        progress: &ProgressFn,
    ) -> Result<u64>;
}

/// Everything a loader needs from the destination.
pub trait SqlTarget: SqlExecutor + BulkTransfer {}

impl<T: SqlExecutor + BulkTransfer> SqlTarget for T {}

/// Connects [`SqlTarget`]s, one per destination database. Jobs that name no
/// database share the base connection's database.
#[async_trait]
pub trait TargetFactory: Send + Sync {
    async fn connect(&self, database: Option<&str>) -> Result<Arc<dyn SqlTarget>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn result(before: i64, after: i64, millis: i64) -> TransferResult {
        let started_at = Utc::now();
        TransferResult {
            row_count_before: before,
            row_count_after: after,
            started_at,
            finished_at: started_at + TimeDelta::milliseconds(millis),
        }
    }

    #[test]
    fn test_rows_loaded_is_the_delta() {
        assert_eq!(result(100, 350, 2000).rows_loaded(), 250);
        assert_eq!(result(0, 0, 2000).rows_loaded(), 0);
    }

    #[test]
    fn test_rows_per_second_guards_zero_elapsed() {
        let r = result(0, 500, 0);
        assert_eq!(r.rows_per_second(), 500.0);
    }

    #[test]
    fn test_rows_per_second() {
        let r = result(0, 1000, 4000);
        assert_eq!(r.rows_per_second(), 250.0);
    }
}
