//! Indexer configuration and state types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::checkpoint::StreamKind;
use crate::entity::TableSet;
use crate::error::IndexError;
use crate::scheduler::Backoff;
use crate::types::Height;

/// Configuration for an indexer instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Table name prefix in the target store.
    pub storage_namespace: String,
    /// Subgrouping within the checkpoint table.
    pub checkpoint_set: String,
    /// Use the local emulator endpoint (no credentials).
    pub emulator_used: bool,
    /// Account credentials when not using the emulator.
    pub account_name: Option<String>,
    pub account_key: Option<String>,
    /// First height to index.
    pub from_height: Height,
    /// Last height to index, inclusive. 0 disables indexing entirely.
    pub to_height: Height,
    /// Blocks between checkpoint saves within a projection run.
    pub checkpoint_interval: u32,
    /// Start from `from_height` regardless of stored checkpoints, and do
    /// not persist new ones.
    pub ignore_checkpoints: bool,
    /// Blocks per indexing-loop batch.
    pub batch_size: u32,
    /// Concurrent bulk writes.
    pub scheduler_ready: usize,
    /// Hard cap on admitted-but-unfinished bulk writes; submissions past it
    /// block the projection task.
    pub scheduler_queue: usize,
    /// Flush a bulk partition at this many rows.
    pub bulk_partition_threshold: usize,
    /// Flush the whole bulk buffer at this many rows.
    pub bulk_total_threshold: usize,
    /// Retry schedule for individual bulk writes.
    pub write_retry: Backoff,
    /// Initial sleep after a failed batch; doubles per consecutive failure.
    pub error_backoff: Duration,
    /// Cap on the grown error backoff.
    pub error_backoff_max: Duration,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            storage_namespace: String::new(),
            checkpoint_set: "default".into(),
            emulator_used: true,
            account_name: None,
            account_key: None,
            from_height: 0,
            to_height: Height::MAX,
            checkpoint_interval: 100,
            ignore_checkpoints: false,
            batch_size: 100,
            scheduler_ready: 30,
            scheduler_queue: 100,
            bulk_partition_threshold: 100,
            bulk_total_threshold: 1000,
            write_retry: Backoff::default(),
            error_backoff: Duration::from_secs(10),
            error_backoff_max: Duration::from_secs(300),
        }
    }
}

impl IndexerConfig {
    /// Validate at startup; violations are fatal.
    pub fn validate(&self) -> Result<(), IndexError> {
        if self.from_height > self.to_height {
            return Err(IndexError::Config(format!(
                "from_height {} exceeds to_height {}",
                self.from_height, self.to_height
            )));
        }
        if self.batch_size == 0 {
            return Err(IndexError::Config("batch_size must be positive".into()));
        }
        if self.checkpoint_interval == 0 {
            return Err(IndexError::Config("checkpoint_interval must be positive".into()));
        }
        if self.scheduler_ready == 0 || self.scheduler_queue == 0 {
            return Err(IndexError::Config("scheduler limits must be positive".into()));
        }
        if self.scheduler_queue < self.scheduler_ready {
            return Err(IndexError::Config(
                "scheduler_queue must be at least scheduler_ready".into(),
            ));
        }
        if !self.emulator_used && (self.account_name.is_none() || self.account_key.is_none()) {
            return Err(IndexError::Config(
                "account_name and account_key are required without the emulator".into(),
            ));
        }
        Ok(())
    }

    pub fn tables(&self) -> TableSet {
        TableSet::new(&self.storage_namespace)
    }
}

// ─── Builder ─────────────────────────────────────────────────────────────────

/// Fluent builder for `IndexerConfig`.
///
/// ```rust
/// use chaintable_core::indexer::IndexerBuilder;
///
/// let config = IndexerBuilder::new()
///     .storage_namespace("main")
///     .from_height(0)
///     .to_height(10_000)
///     .batch_size(250)
///     .build()
///     .unwrap();
/// assert_eq!(config.batch_size, 250);
/// ```
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self {
            config: IndexerConfig::default(),
        }
    }

    pub fn storage_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.storage_namespace = namespace.into();
        self
    }

    pub fn checkpoint_set(mut self, set: impl Into<String>) -> Self {
        self.config.checkpoint_set = set.into();
        self
    }

    pub fn credentials(mut self, name: impl Into<String>, key: impl Into<String>) -> Self {
        self.config.emulator_used = false;
        self.config.account_name = Some(name.into());
        self.config.account_key = Some(key.into());
        self
    }

    pub fn from_height(mut self, height: Height) -> Self {
        self.config.from_height = height;
        self
    }

    pub fn to_height(mut self, height: Height) -> Self {
        self.config.to_height = height;
        self
    }

    pub fn checkpoint_interval(mut self, interval: u32) -> Self {
        self.config.checkpoint_interval = interval;
        self
    }

    pub fn ignore_checkpoints(mut self, ignore: bool) -> Self {
        self.config.ignore_checkpoints = ignore;
        self
    }

    pub fn batch_size(mut self, size: u32) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn scheduler_limits(mut self, ready: usize, queue: usize) -> Self {
        self.config.scheduler_ready = ready;
        self.config.scheduler_queue = queue;
        self
    }

    pub fn bulk_thresholds(mut self, partition: usize, total: usize) -> Self {
        self.config.bulk_partition_threshold = partition;
        self.config.bulk_total_threshold = total;
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<IndexerConfig, IndexError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ─── States ──────────────────────────────────────────────────────────────────

/// Lifecycle of the indexing loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopState {
    Running,
    Draining,
    Stopped,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Draining => write!(f, "draining"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Per-stream state: still indexing, or caught up with the configured range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamState {
    Indexing,
    AtTip,
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Indexing => write!(f, "indexing"),
            Self::AtTip => write!(f, "at-tip"),
        }
    }
}

/// One stream's progress in a status snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamProgress {
    pub kind: StreamKind,
    pub height: Option<Height>,
    pub state: StreamState,
}

/// Snapshot of per-stream progress and the aggregate store tip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerStatus {
    /// Progress per projection stream, in fixed order.
    pub streams: Vec<StreamProgress>,
    /// Conservative minimum over the streams.
    pub store_tip: Option<Height>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        IndexerConfig::default().validate().unwrap();
    }

    #[test]
    fn builder_surfaces_tuning_knobs() {
        let config = IndexerBuilder::new()
            .storage_namespace("main")
            .batch_size(50)
            .scheduler_limits(8, 32)
            .checkpoint_interval(25)
            .build()
            .unwrap();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.scheduler_ready, 8);
        assert_eq!(config.scheduler_queue, 32);
        assert_eq!(config.tables().blocks, "mainblocks");
    }

    #[test]
    fn inverted_range_is_rejected() {
        let err = IndexerBuilder::new()
            .from_height(100)
            .to_height(50)
            .build()
            .unwrap_err();
        assert!(matches!(err, IndexError::Config(_)));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        assert!(IndexerBuilder::new().batch_size(0).build().is_err());
    }

    #[test]
    fn credentials_required_without_emulator() {
        let mut config = IndexerConfig::default();
        config.emulator_used = false;
        assert!(config.validate().is_err());

        let config = IndexerBuilder::new().credentials("account", "key").build();
        assert!(config.is_ok());
    }

    #[test]
    fn queue_must_cover_ready() {
        assert!(IndexerBuilder::new().scheduler_limits(30, 10).build().is_err());
    }
}
