//! Chain-sync loop — projects the header chain into the chain table.
//!
//! Runs beside the indexing loop on its own cadence and its own checkpoint:
//! walk from the chain-table tip forward, append one row per header, save
//! the chain checkpoint, sleep, repeat. Failures are logged and retried on
//! the next tick. A corrupt chain checkpoint is recovered by deleting and
//! recreating the chain table, then re-projecting from genesis.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::chain::ChainView;
use crate::checkpoint::{CheckpointRepository, StreamKind};
use crate::entity::{ChainHeaderEntry, TableEntity, TableSet, CHAIN_PARTITION};
use crate::error::IndexError;
use crate::indexer::IndexerConfig;
use crate::store::{reset_table, TableRow, TableStore};
use crate::types::Height;

/// Rows per bulk upsert while walking the header chain.
const HEADER_BATCH: usize = 100;

/// Give up corrupt-table recovery after this many attempts.
const MAX_RECOVERY_ATTEMPTS: u32 = 20;
const RECOVERY_DELAY: Duration = Duration::from_secs(10);

pub struct ChainSyncLoop {
    chain: Arc<dyn ChainView>,
    store: Arc<dyn TableStore>,
    checkpoints: CheckpointRepository,
    tables: TableSet,
    interval: Duration,
    cancel: CancellationToken,
}

impl ChainSyncLoop {
    pub fn new(
        config: &IndexerConfig,
        chain: Arc<dyn ChainView>,
        store: Arc<dyn TableStore>,
        cancel: CancellationToken,
    ) -> Self {
        let tables = config.tables();
        // The chain projection keeps its own checkpoint regardless of
        // ignore_checkpoints, which only scopes the indexing streams.
        let checkpoints = CheckpointRepository::new(
            store.clone(),
            tables.checkpoints.clone(),
            config.checkpoint_set.clone(),
            false,
            0,
        );
        Self {
            chain,
            store,
            checkpoints,
            tables,
            interval: Duration::from_secs(60),
            cancel,
        }
    }

    /// Override the tick interval (tests).
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run until cancellation.
    pub async fn run(&self) -> Result<(), IndexError> {
        self.store.create_table_if_absent(&self.tables.chain).await?;
        self.store
            .create_table_if_absent(&self.tables.checkpoints)
            .await?;

        let mut recovery_attempts = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            match self.sync_once().await {
                Ok(appended) => {
                    recovery_attempts = 0;
                    if appended > 0 {
                        tracing::info!(appended, "chain table advanced");
                    }
                }
                Err(e) if e.is_cancelled() => break,
                Err(e) if e.is_corrupt() => {
                    recovery_attempts += 1;
                    if recovery_attempts > MAX_RECOVERY_ATTEMPTS {
                        tracing::error!(error = %e, "chain table unrecoverable");
                        return Err(e);
                    }
                    tracing::warn!(
                        error = %e,
                        attempt = recovery_attempts,
                        "corrupt chain state, resetting table"
                    );
                    if let Err(reset_err) = self.reset_chain_table().await {
                        tracing::warn!(error = %reset_err, "chain table reset failed");
                    }
                    if self.sleep_cancellable(RECOVERY_DELAY).await {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "chain sync failed, retrying next tick");
                }
            }
            if self.sleep_cancellable(self.interval).await {
                break;
            }
        }
        Ok(())
    }

    /// One pass: append headers from the stored tip to the chain tip.
    /// Returns the number of headers appended.
    pub async fn sync_once(&self) -> Result<u32, IndexError> {
        let checkpoint = self
            .checkpoints
            .load(StreamKind::Chain, self.chain.as_ref())
            .await?;
        let mut next: Height = checkpoint
            .fork(self.chain.as_ref())
            .map(|h| h.height.saturating_add(1))
            .unwrap_or(0);

        let mut appended = 0u32;
        let mut reached: Option<Height> = None;
        let mut batch: Vec<TableRow> = Vec::with_capacity(HEADER_BATCH);

        while let Some(header) = self.chain.block_at(next) {
            if self.cancel.is_cancelled() {
                break;
            }
            batch.push(ChainHeaderEntry { header: header.clone() }.to_row());
            reached = Some(header.height);
            appended += 1;
            next = next.saturating_add(1);

            if batch.len() >= HEADER_BATCH {
                self.store
                    .bulk_upsert(&self.tables.chain, CHAIN_PARTITION, std::mem::take(&mut batch))
                    .await?;
            }
        }
        if !batch.is_empty() {
            self.store
                .bulk_upsert(&self.tables.chain, CHAIN_PARTITION, batch)
                .await?;
        }
        if let Some(height) = reached {
            self.checkpoints
                .save(StreamKind::Chain, &self.chain.locator_at(height))
                .await?;
        }
        Ok(appended)
    }

    async fn reset_chain_table(&self) -> Result<(), IndexError> {
        reset_table(self.store.as_ref(), &self.tables.chain).await?;
        self.checkpoints.reset(StreamKind::Chain).await
    }

    async fn sleep_cancellable(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = self.cancel.cancelled() => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::padded_height;
    use crate::store::{MemoryTableStore, RowRange};
    use crate::testnet::TestNet;

    fn config() -> IndexerConfig {
        IndexerConfig::default()
    }

    #[tokio::test]
    async fn projects_headers_keyed_by_height() {
        let net = TestNet::simple_chain(12);
        let store = Arc::new(MemoryTableStore::new());
        let sync = ChainSyncLoop::new(
            &config(),
            net.chain.clone(),
            store.clone(),
            CancellationToken::new(),
        );
        store.create_table_if_absent("chain").await.unwrap();
        store.create_table_if_absent("checkpoints").await.unwrap();

        let appended = sync.sync_once().await.unwrap();
        assert_eq!(appended, 13);

        let rows = store.scan("chain", CHAIN_PARTITION, RowRange::all()).await.unwrap();
        assert_eq!(rows.len(), 13);
        assert_eq!(rows[0].row_key, padded_height(0));
        assert_eq!(rows[12].row_key, padded_height(12));
        assert_eq!(rows[5].payload["height"], 5);
    }

    #[tokio::test]
    async fn second_pass_only_appends_new_headers() {
        let net = TestNet::simple_chain(5);
        let store = Arc::new(MemoryTableStore::new());
        store.create_table_if_absent("chain").await.unwrap();
        store.create_table_if_absent("checkpoints").await.unwrap();
        let sync = ChainSyncLoop::new(
            &config(),
            net.chain.clone(),
            store.clone(),
            CancellationToken::new(),
        );

        assert_eq!(sync.sync_once().await.unwrap(), 6);
        assert_eq!(sync.sync_once().await.unwrap(), 0);

        // Chain grows: only the new headers are appended.
        let net2 = TestNet::simple_chain(8);
        let sync2 = ChainSyncLoop::new(
            &config(),
            net2.chain.clone(),
            store.clone(),
            CancellationToken::new(),
        );
        assert_eq!(sync2.sync_once().await.unwrap(), 3);
        assert_eq!(store.row_count("chain"), 9);
    }

    #[tokio::test]
    async fn corrupt_checkpoint_recovers_by_reset() {
        let net = TestNet::simple_chain(4);
        let store = Arc::new(MemoryTableStore::new());
        store.create_table_if_absent("chain").await.unwrap();
        store.create_table_if_absent("checkpoints").await.unwrap();

        // Poison the chain checkpoint row.
        store
            .bulk_upsert(
                "checkpoints",
                "default",
                vec![TableRow {
                    partition_key: "default".into(),
                    row_key: "chain".into(),
                    payload: serde_json::json!(42),
                }],
            )
            .await
            .unwrap();

        let sync = ChainSyncLoop::new(
            &config(),
            net.chain.clone(),
            store.clone(),
            CancellationToken::new(),
        );
        let err = sync.sync_once().await.unwrap_err();
        assert!(err.is_corrupt());

        sync.reset_chain_table().await.unwrap();
        assert_eq!(sync.sync_once().await.unwrap(), 5);
    }
}
