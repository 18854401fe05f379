//! Bulk import buffer — accumulates projected rows per partition and hands
//! them to the write scheduler at thresholds.
//!
//! The store only upserts atomically within one partition, so the buffer
//! groups rows by `(table, partition)` and never splits a group across
//! submissions in one flush. Insertion order within a partition is preserved,
//! which together with deterministic row keys makes replays idempotent.

use std::collections::HashMap;

use crate::error::IndexError;
use crate::scheduler::WriteScheduler;
use crate::store::{TableRow, TableWrite};

pub struct BulkImporter {
    /// Flush a partition once it holds this many rows.
    partition_threshold: usize,
    /// Flush everything once this many rows are buffered in total.
    total_threshold: usize,
    groups: HashMap<(String, String), Vec<TableRow>>,
    total: usize,
}

impl BulkImporter {
    pub fn new(partition_threshold: usize, total_threshold: usize) -> Self {
        Self {
            partition_threshold: partition_threshold.max(1),
            total_threshold: total_threshold.max(1),
            groups: HashMap::new(),
            total: 0,
        }
    }

    pub fn add(&mut self, write: TableWrite) {
        let key = (write.table, write.row.partition_key.clone());
        self.groups.entry(key).or_default().push(write.row);
        self.total += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Flush whatever the thresholds require: everything when the total
    /// threshold is hit, otherwise only partitions that reached the
    /// partition threshold.
    pub async fn maybe_flush(&mut self, scheduler: &WriteScheduler) -> Result<(), IndexError> {
        if self.total >= self.total_threshold {
            return self.flush_all(scheduler).await;
        }
        let full: Vec<(String, String)> = self
            .groups
            .iter()
            .filter(|(_, rows)| rows.len() >= self.partition_threshold)
            .map(|(key, _)| key.clone())
            .collect();
        for key in full {
            if let Some(rows) = self.groups.remove(&key) {
                self.total -= rows.len();
                scheduler.submit(key.0, key.1, rows).await?;
            }
        }
        Ok(())
    }

    /// Flush every buffered group. Flushing an empty buffer is a no-op.
    pub async fn flush_all(&mut self, scheduler: &WriteScheduler) -> Result<(), IndexError> {
        if self.groups.is_empty() {
            return Ok(());
        }
        let mut keys: Vec<(String, String)> = self.groups.keys().cloned().collect();
        keys.sort();
        for key in keys {
            if let Some(rows) = self.groups.remove(&key) {
                self.total -= rows.len();
                scheduler.submit(key.0, key.1, rows).await?;
            }
        }
        debug_assert_eq!(self.total, 0);
        Ok(())
    }
}
