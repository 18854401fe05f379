//! Table store seam — the partitioned key/value store the pipeline writes to.
//!
//! The store guarantees atomic multi-row upserts and ordered scans only
//! within a single partition, which is why the bulk layer groups rows by
//! partition before submitting them. All writes use replace semantics: the
//! pipeline is the sole updater of its rows, so there is no optimistic
//! concurrency.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::entity::TableSet;
use crate::error::IndexError;

// ─── Rows ────────────────────────────────────────────────────────────────────

/// One row of a partitioned table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRow {
    pub partition_key: String,
    pub row_key: String,
    pub payload: serde_json::Value,
}

/// A row targeted at a specific table — the unit the projections emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableWrite {
    pub table: String,
    pub row: TableRow,
}

/// Row-key range for partition scans: `from` inclusive, `to` exclusive.
#[derive(Debug, Clone, Default)]
pub struct RowRange {
    pub from: Option<String>,
    pub to: Option<String>,
}

impl RowRange {
    pub fn all() -> Self {
        Self::default()
    }

    fn contains(&self, key: &str) -> bool {
        if let Some(from) = &self.from {
            if key < from.as_str() {
                return false;
            }
        }
        if let Some(to) = &self.to {
            if key >= to.as_str() {
                return false;
            }
        }
        true
    }
}

// ─── TableStore ──────────────────────────────────────────────────────────────

/// The partitioned table store consumed by the pipeline.
#[async_trait]
pub trait TableStore: Send + Sync {
    async fn create_table_if_absent(&self, table: &str) -> Result<(), IndexError>;

    async fn delete_table(&self, table: &str) -> Result<(), IndexError>;

    /// Upsert `rows` into one partition with replace-any-version semantics.
    /// Every row's `partition_key` must equal `partition`.
    async fn bulk_upsert(
        &self,
        table: &str,
        partition: &str,
        rows: Vec<TableRow>,
    ) -> Result<(), IndexError>;

    async fn get(
        &self,
        table: &str,
        partition: &str,
        row_key: &str,
    ) -> Result<Option<TableRow>, IndexError>;

    /// Rows of one partition in ascending row-key order.
    async fn scan(
        &self,
        table: &str,
        partition: &str,
        range: RowRange,
    ) -> Result<Vec<TableRow>, IndexError>;
}

/// Create every pipeline table idempotently.
pub async fn ensure_tables(store: &dyn TableStore, tables: &TableSet) -> Result<(), IndexError> {
    for table in tables.all() {
        store.create_table_if_absent(table).await?;
    }
    Ok(())
}

/// Delete and recreate one table — the corrupt-state recovery path.
pub async fn reset_table(store: &dyn TableStore, table: &str) -> Result<(), IndexError> {
    store.delete_table(table).await?;
    store.create_table_if_absent(table).await
}

// ─── In-memory store (for testing) ───────────────────────────────────────────

type Partitioned = BTreeMap<(String, String), TableRow>;

/// In-memory table store for tests and ephemeral pipelines.
#[derive(Default)]
pub struct MemoryTableStore {
    tables: Mutex<HashMap<String, Partitioned>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total row count of a table (all partitions).
    pub fn row_count(&self, table: &str) -> usize {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map(|t| t.len())
            .unwrap_or(0)
    }

    /// Stable serialized snapshot of a table, for replay-equality checks.
    pub fn snapshot(&self, table: &str) -> String {
        let tables = self.tables.lock().unwrap();
        let rows: Vec<&TableRow> = tables
            .get(table)
            .map(|t| t.values().collect())
            .unwrap_or_default();
        serde_json::to_string(&rows).expect("rows serialize")
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn create_table_if_absent(&self, table: &str) -> Result<(), IndexError> {
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default();
        Ok(())
    }

    async fn delete_table(&self, table: &str) -> Result<(), IndexError> {
        self.tables.lock().unwrap().remove(table);
        Ok(())
    }

    async fn bulk_upsert(
        &self,
        table: &str,
        partition: &str,
        rows: Vec<TableRow>,
    ) -> Result<(), IndexError> {
        let mut tables = self.tables.lock().unwrap();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| IndexError::Store(format!("no such table: {table}")))?;
        for row in rows {
            if row.partition_key != partition {
                return Err(IndexError::Store(format!(
                    "row {} not in partition {partition}",
                    row.row_key
                )));
            }
            t.insert((partition.to_string(), row.row_key.clone()), row);
        }
        Ok(())
    }

    async fn get(
        &self,
        table: &str,
        partition: &str,
        row_key: &str,
    ) -> Result<Option<TableRow>, IndexError> {
        let tables = self.tables.lock().unwrap();
        let t = tables
            .get(table)
            .ok_or_else(|| IndexError::Store(format!("no such table: {table}")))?;
        Ok(t.get(&(partition.to_string(), row_key.to_string())).cloned())
    }

    async fn scan(
        &self,
        table: &str,
        partition: &str,
        range: RowRange,
    ) -> Result<Vec<TableRow>, IndexError> {
        let tables = self.tables.lock().unwrap();
        let t = tables
            .get(table)
            .ok_or_else(|| IndexError::Store(format!("no such table: {table}")))?;
        Ok(t.range((partition.to_string(), String::new())..)
            .take_while(|((p, _), _)| p == partition)
            .filter(|((_, key), _)| range.contains(key))
            .map(|(_, row)| row.clone())
            .collect())
    }
}
