//! Stream checkpoints — durable block-locator progress per projection stream.
//!
//! One row per stream under `{checkpoint_set}/{kind}` in the checkpoints
//! table. A checkpoint only ever advances; recovery from a bad state is
//! reset-and-reindex, never rewind.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::chain::ChainView;
use crate::error::IndexError;
use crate::locator::BlockLocator;
use crate::store::{TableRow, TableStore};
use crate::types::{ChainedHeader, Height};

// ─── StreamKind ──────────────────────────────────────────────────────────────

/// The checkpointed streams. The four projection streams advance through the
/// indexing loop; `Chain` belongs to the chain-sync loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    Blocks,
    Transactions,
    Balances,
    Wallets,
    Chain,
}

impl StreamKind {
    /// The four projection streams, in their fixed processing order.
    pub const PROJECTIONS: [StreamKind; 4] = [
        StreamKind::Blocks,
        StreamKind::Transactions,
        StreamKind::Balances,
        StreamKind::Wallets,
    ];

    /// Row-key slug under the checkpoint set.
    pub fn slug(&self) -> &'static str {
        match self {
            Self::Blocks => "blocks",
            Self::Transactions => "transactions",
            Self::Balances => "balances",
            Self::Wallets => "wallets",
            Self::Chain => "chain",
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.slug())
    }
}

// ─── Checkpoint ──────────────────────────────────────────────────────────────

/// A stream's persisted position. An empty locator means the stream has not
/// processed anything yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub kind: StreamKind,
    pub locator: BlockLocator,
}

impl Checkpoint {
    pub fn fresh(kind: StreamKind) -> Self {
        Self {
            kind,
            locator: BlockLocator::default(),
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.locator.is_empty()
    }

    /// Resolve the checkpoint to the last processed header on the current
    /// chain. `None` means nothing has been processed.
    pub fn fork(&self, chain: &dyn ChainView) -> Option<ChainedHeader> {
        if self.is_fresh() {
            None
        } else {
            Some(chain.find_fork(&self.locator))
        }
    }
}

#[derive(Serialize, Deserialize)]
struct CheckpointPayload {
    locator: BlockLocator,
    /// Unix timestamp of when this checkpoint was saved.
    saved_at: i64,
}

// ─── CheckpointRepository ────────────────────────────────────────────────────

/// Loads and saves stream checkpoints in the shared table store.
///
/// With `ignore_checkpoints` set, `load` returns a synthetic locator at the
/// configured `from_height` and `save` becomes a no-op.
pub struct CheckpointRepository {
    store: Arc<dyn TableStore>,
    table: String,
    checkpoint_set: String,
    ignore_checkpoints: bool,
    from_height: Height,
}

impl CheckpointRepository {
    pub fn new(
        store: Arc<dyn TableStore>,
        table: impl Into<String>,
        checkpoint_set: impl Into<String>,
        ignore_checkpoints: bool,
        from_height: Height,
    ) -> Self {
        Self {
            store,
            table: table.into(),
            checkpoint_set: checkpoint_set.into(),
            ignore_checkpoints,
            from_height,
        }
    }

    /// Load a stream's checkpoint. First run yields a fresh checkpoint.
    pub async fn load(
        &self,
        kind: StreamKind,
        chain: &dyn ChainView,
    ) -> Result<Checkpoint, IndexError> {
        if self.ignore_checkpoints {
            let locator = if self.from_height == 0 {
                BlockLocator::default()
            } else {
                chain.locator_at(self.from_height - 1)
            };
            return Ok(Checkpoint { kind, locator });
        }

        let row = self
            .store
            .get(&self.table, &self.checkpoint_set, kind.slug())
            .await?;
        match row {
            None => Ok(Checkpoint::fresh(kind)),
            Some(row) => {
                let payload: CheckpointPayload = serde_json::from_value(row.payload)
                    .map_err(|e| {
                        IndexError::Corrupt(format!("checkpoint {kind} unreadable: {e}"))
                    })?;
                Ok(Checkpoint {
                    kind,
                    locator: payload.locator,
                })
            }
        }
    }

    /// Persist a stream's locator. Must only be called once every row at or
    /// below the locator's height has been acknowledged by the store.
    pub async fn save(&self, kind: StreamKind, locator: &BlockLocator) -> Result<(), IndexError> {
        if self.ignore_checkpoints {
            return Ok(());
        }
        self.write(kind, locator).await
    }

    /// Overwrite a stream's checkpoint with a fresh one — the
    /// reset-and-reindex recovery path. Bypasses `ignore_checkpoints`.
    pub async fn reset(&self, kind: StreamKind) -> Result<(), IndexError> {
        self.write(kind, &BlockLocator::default()).await
    }

    async fn write(&self, kind: StreamKind, locator: &BlockLocator) -> Result<(), IndexError> {
        let payload = CheckpointPayload {
            locator: locator.clone(),
            saved_at: chrono::Utc::now().timestamp(),
        };
        let row = TableRow {
            partition_key: self.checkpoint_set.clone(),
            row_key: kind.slug().to_string(),
            payload: serde_json::to_value(payload)
                .map_err(|e| IndexError::Store(format!("serialize checkpoint: {e}")))?,
        };
        tracing::debug!(stream = %kind, tip = ?locator.tip_hash(), "saving checkpoint");
        self.store
            .bulk_upsert(&self.table, &self.checkpoint_set, vec![row])
            .await
    }
}
