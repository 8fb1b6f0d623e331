//! Shared test doubles: an in-memory destination implementing both
//! capabilities, and a factory handing it out for every database.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use bulkload_common::{LoadError, Result};
use bulkload_core::rows::RowSource;
use bulkload_core::schema::Column;
use bulkload_core::sql::{
    BulkTransfer, ProgressFn, SqlExecutor, SqlTarget, TargetFactory, TransferOptions,
};
use bulkload_core::table::TableRef;

pub type StoredRow = Vec<Option<String>>;

#[derive(Default)]
pub struct FakeTarget {
    pub tables: Mutex<HashMap<String, Vec<StoredRow>>>,
    pub created_columns: Mutex<HashMap<String, Vec<Column>>>,
    /// Ordered log of mutations: "create:<key>", "drop:<key>",
    /// "copy:<key>:<tag>" where the tag is the first cell of the first row.
    pub events: Mutex<Vec<String>>,
    fail_create: Mutex<HashSet<String>>,
}

impl FakeTarget {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_create_for(&self, key: &str) {
        self.fail_create.lock().unwrap().insert(key.to_string());
    }

    pub fn rows(&self, key: &str) -> Vec<StoredRow> {
        self.tables
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

}

#[async_trait]
impl SqlExecutor for FakeTarget {
    async fn table_exists(&self, table: &TableRef) -> Result<bool> {
        Ok(self.tables.lock().unwrap().contains_key(&table.key()))
    }

    async fn row_count(&self, table: &TableRef) -> Result<i64> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get(&table.key())
            .map(|rows| rows.len() as i64)
            .unwrap_or(0))
    }

    async fn create_table(&self, table: &TableRef, columns: &[Column]) -> Result<()> {
        let key = table.key();
        if self.fail_create.lock().unwrap().contains(&key) {
            return Err(LoadError::database(format!(
                "induced create failure for {key}"
            )));
        }
        self.events.lock().unwrap().push(format!("create:{key}"));
        self.created_columns
            .lock()
            .unwrap()
            .insert(key.clone(), columns.to_vec());
        self.tables.lock().unwrap().insert(key, Vec::new());
        Ok(())
    }

    async fn drop_table(&self, table: &TableRef) -> Result<()> {
        let key = table.key();
        self.events.lock().unwrap().push(format!("drop:{key}"));
        self.tables.lock().unwrap().remove(&key);
        Ok(())
    }

    async fn nullify(&self, table: &TableRef, columns: &[Column], marker: &str) -> Result<u64> {
        let _ = columns;
        let mut tables = self.tables.lock().unwrap();
        let mut rewritten = 0;
        if let Some(rows) = tables.get_mut(&table.key()) {
            for row in rows {
                for value in row.iter_mut() {
                    if value.as_deref() == Some(marker) {
                        *value = None;
                        rewritten += 1;
                    }
                }
            }
        }
        Ok(rewritten)
    }
}

#[async_trait]
impl BulkTransfer for FakeTarget {
    async fn write_rows(
        &self,
        table: &TableRef,
        _columns: &[Column],
        rows: &mut (dyn RowSource + Send),
        options: &TransferOptions,
        progress: &ProgressFn,
    ) -> Result<u64> {
        let key = table.key();
        let mut written = 0u64;
        let mut batch = Vec::new();
        let mut tag: Option<String> = None;

        while let Some(row) = rows.next_row()? {
            if tag.is_none() {
                tag = Some(
                    row.first()
                        .and_then(|v| v.clone())
                        .unwrap_or_else(|| "<null>".to_string()),
                );
            }
            batch.push(row);
            written += 1;
            if batch.len() >= options.batch_size {
                progress(written);
            }
        }

        self.events.lock().unwrap().push(format!(
            "copy:{key}:{}",
            tag.unwrap_or_else(|| "<empty>".to_string())
        ));
        self.tables
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .extend(batch);
        Ok(written)
    }
}

pub struct FakeFactory {
    pub target: Arc<FakeTarget>,
}

impl FakeFactory {
    pub fn new(target: Arc<FakeTarget>) -> Arc<Self> {
        Arc::new(Self { target })
    }
}

#[async_trait]
impl TargetFactory for FakeFactory {
    async fn connect(&self, _database: Option<&str>) -> Result<Arc<dyn SqlTarget>> {
        Ok(self.target.clone())
    }
}
