//! The indexing loop — drives the four projection streams in batches.
//!
//! Per iteration: compute the batch window from the aggregate store tip, run
//! each stream in fixed order (blocks, transactions, balances, wallets)
//! against a freshly positioned fetcher, then recompute the store tip as the
//! conservative minimum over the streams. Batch failures are logged, signal
//! the event sink, and are retried from the same store tip after a growing
//! backoff. Cancellation drains the scheduler and stops cleanly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::balance::WalletRuleSet;
use crate::chain::{BlockRepository, ChainView};
use crate::checkpoint::{CheckpointRepository, StreamKind};
use crate::entity::TableSet;
use crate::error::IndexError;
use crate::fetcher::BlockFetcher;
use crate::indexer::{IndexerConfig, IndexerStatus, LoopState, StreamProgress, StreamState};
use crate::projections::standard_projections;
use crate::scheduler::WriteScheduler;
use crate::store::{ensure_tables, TableStore};
use crate::task::{run_projection, BlockProjector};
use crate::types::{ChainedHeader, Height};

/// Sleep between iterations when the chain has no new blocks for us.
const IDLE_POLL: Duration = Duration::from_secs(1);

/// Status emitted by the index loop for observability.
#[derive(Debug, Clone)]
pub enum IndexLoopEvent {
    BatchStarted { from: Height, to: Height },
    BatchCompleted { store_tip: Option<Height> },
    StreamAtTip { kind: StreamKind, height: Height },
    BatchFailed { error: String },
    Stopped,
}

/// The batched, multi-stream indexing loop.
pub struct IndexLoop {
    config: IndexerConfig,
    tables: TableSet,
    chain: Arc<dyn ChainView>,
    repository: Arc<dyn BlockRepository>,
    store: Arc<dyn TableStore>,
    checkpoints: CheckpointRepository,
    projections: Vec<Box<dyn BlockProjector>>,
    rules: Arc<WalletRuleSet>,
    cursors: HashMap<StreamKind, Option<ChainedHeader>>,
    cancel: CancellationToken,
    events: Option<mpsc::UnboundedSender<IndexLoopEvent>>,
    state: LoopState,
}

impl IndexLoop {
    pub fn new(
        config: IndexerConfig,
        chain: Arc<dyn ChainView>,
        repository: Arc<dyn BlockRepository>,
        store: Arc<dyn TableStore>,
        rules: Arc<WalletRuleSet>,
        cancel: CancellationToken,
    ) -> Result<Self, IndexError> {
        config.validate()?;
        let tables = config.tables();
        let checkpoints = CheckpointRepository::new(
            store.clone(),
            tables.checkpoints.clone(),
            config.checkpoint_set.clone(),
            config.ignore_checkpoints,
            config.from_height,
        );
        let projections = standard_projections(&tables, rules.clone());
        let cursors = StreamKind::PROJECTIONS
            .iter()
            .map(|kind| (*kind, None))
            .collect();
        Ok(Self {
            config,
            tables,
            chain,
            repository,
            store,
            checkpoints,
            projections,
            rules,
            cursors,
            cancel,
            events: None,
            state: LoopState::Stopped,
        })
    }

    /// Receive loop events. Call before `run`.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<IndexLoopEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn tables(&self) -> &TableSet {
        &self.tables
    }

    /// Per-stream heights and the conservative store tip.
    pub fn status(&self) -> IndexerStatus {
        let streams = StreamKind::PROJECTIONS
            .iter()
            .map(|kind| {
                let height = self
                    .cursors
                    .get(kind)
                    .and_then(|c| c.as_ref())
                    .map(|h| h.height);
                let state = if height.is_some_and(|h| h >= self.config.to_height) {
                    StreamState::AtTip
                } else {
                    StreamState::Indexing
                };
                StreamProgress {
                    kind: *kind,
                    height,
                    state,
                }
            })
            .collect();
        IndexerStatus {
            streams,
            store_tip: self.store_tip_height(),
        }
    }

    fn store_tip_height(&self) -> Option<Height> {
        let mut min: Option<Height> = None;
        for kind in StreamKind::PROJECTIONS {
            let height = self.cursors.get(&kind).and_then(|c| c.as_ref()).map(|h| h.height)?;
            min = Some(min.map_or(height, |m| m.min(height)));
        }
        min
    }

    /// The chain header at the aggregate store tip.
    pub fn store_tip(&self) -> Option<ChainedHeader> {
        self.chain.block_at(self.store_tip_height()?)
    }

    fn emit(&self, event: IndexLoopEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    /// Run until the configured range is indexed or cancellation.
    pub async fn run(&mut self) -> Result<(), IndexError> {
        ensure_tables(self.store.as_ref(), &self.tables).await?;

        for kind in StreamKind::PROJECTIONS {
            let checkpoint = self.checkpoints.load(kind, self.chain.as_ref()).await?;
            let cursor = checkpoint.fork(self.chain.as_ref());
            tracing::info!(
                stream = %kind,
                resume = cursor.as_ref().map(|h| h.height),
                "loaded checkpoint"
            );
            self.cursors.insert(kind, cursor);
        }

        if self.config.to_height == 0 {
            self.state = LoopState::Stopped;
            self.emit(IndexLoopEvent::Stopped);
            return Ok(());
        }

        let scheduler = WriteScheduler::new(
            self.store.clone(),
            self.config.scheduler_ready,
            self.config.scheduler_queue,
            self.config.write_retry.clone(),
            self.cancel.clone(),
        );

        self.state = LoopState::Running;
        let mut error_backoff = self.config.error_backoff;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let base = match self.store_tip_height() {
                Some(height) => height.saturating_add(1),
                None => self.config.from_height,
            }
            .max(self.config.from_height);
            let to = base
                .saturating_add(self.config.batch_size - 1)
                .min(self.config.to_height);

            if self.chain.tip().height < base {
                if self.sleep_cancellable(IDLE_POLL).await {
                    break;
                }
                continue;
            }

            self.emit(IndexLoopEvent::BatchStarted { from: base, to });
            let tip_before = self.store_tip_height();
            match self.run_batch(&scheduler, to).await {
                Ok(()) => {
                    error_backoff = self.config.error_backoff;
                    let store_tip = self.store_tip_height();
                    tracing::info!(from = base, to, store_tip, "batch complete");
                    self.emit(IndexLoopEvent::BatchCompleted { store_tip });
                    if store_tip.is_some_and(|h| h >= self.config.to_height) {
                        break;
                    }
                    // No progress: caught up with the chain, or stalled on a
                    // repository gap that the next batch will retry.
                    if store_tip == tip_before && self.sleep_cancellable(IDLE_POLL).await {
                        break;
                    }
                }
                Err(e) if e.is_cancelled() => break,
                Err(e) => {
                    tracing::error!(from = base, to, error = %e, "batch failed, will retry");
                    self.emit(IndexLoopEvent::BatchFailed {
                        error: e.to_string(),
                    });
                    if self.sleep_cancellable(error_backoff).await {
                        break;
                    }
                    error_backoff = (error_backoff * 2).min(self.config.error_backoff_max);
                }
            }
        }

        self.state = LoopState::Draining;
        if let Err(e) = scheduler.wait_drain().await {
            tracing::warn!(error = %e, "outstanding writes failed during drain");
        }
        self.state = LoopState::Stopped;
        self.emit(IndexLoopEvent::Stopped);
        Ok(())
    }

    async fn run_batch(
        &mut self,
        scheduler: &WriteScheduler,
        to: Height,
    ) -> Result<(), IndexError> {
        for i in 0..self.projections.len() {
            let kind = self.projections[i].kind();
            let cursor = self.cursors.get(&kind).cloned().flatten();

            if let Some(height) = cursor.as_ref().map(|c| c.height) {
                if height >= to {
                    self.emit(IndexLoopEvent::StreamAtTip { kind, height });
                    continue;
                }
            }

            // An empty wallet-rule set means the wallet stream has nothing to
            // look at: jump to the end of the window without reading blocks.
            if kind == StreamKind::Wallets && self.rules.is_empty() {
                let reached = to.min(self.chain.tip().height);
                self.checkpoints
                    .save(kind, &self.chain.locator_at(reached))
                    .await?;
                self.cursors.insert(kind, self.chain.block_at(reached));
                continue;
            }

            let mut fetcher = BlockFetcher::new(
                self.chain.clone(),
                self.repository.clone(),
                cursor,
                self.config.from_height,
                to,
                self.config.checkpoint_interval,
                self.cancel.clone(),
            );
            let new_cursor = run_projection(
                self.projections[i].as_ref(),
                &mut fetcher,
                scheduler,
                &self.checkpoints,
                self.config.bulk_partition_threshold,
                self.config.bulk_total_threshold,
            )
            .await?;
            if self.cancel.is_cancelled() {
                return Err(IndexError::Cancelled);
            }
            self.cursors.insert(kind, new_cursor);
        }
        Ok(())
    }

    /// Returns `true` if cancellation fired during the sleep.
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
    use crate::indexer::IndexerBuilder;
    use crate::store::MemoryTableStore;
    use crate::testnet::TestNet;

    fn small_config(to: Height) -> IndexerConfig {
        IndexerBuilder::new()
            .to_height(to)
            .batch_size(10)
            .checkpoint_interval(5)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn indexes_whole_range_and_reports_tip() {
        let net = TestNet::simple_chain(25);
        let store = Arc::new(MemoryTableStore::new());
        let mut index_loop = IndexLoop::new(
            small_config(25),
            net.chain.clone(),
            net.repository.clone(),
            store.clone(),
            Arc::new(WalletRuleSet::new()),
            CancellationToken::new(),
        )
        .unwrap();

        index_loop.run().await.unwrap();
        let status = index_loop.status();
        assert_eq!(status.store_tip, Some(25));
        for stream in status.streams {
            assert_eq!(stream.height, Some(25));
            assert_eq!(stream.state, StreamState::AtTip);
        }
        assert_eq!(store.row_count("blocks"), 26);
        assert_eq!(index_loop.state(), LoopState::Stopped);
    }

    #[tokio::test]
    async fn to_height_zero_exits_immediately() {
        let net = TestNet::simple_chain(5);
        let store = Arc::new(MemoryTableStore::new());
        let mut index_loop = IndexLoop::new(
            small_config(0),
            net.chain.clone(),
            net.repository.clone(),
            store.clone(),
            Arc::new(WalletRuleSet::new()),
            CancellationToken::new(),
        )
        .unwrap();
        index_loop.run().await.unwrap();
        assert_eq!(store.row_count("blocks"), 0);
        assert_eq!(index_loop.state(), LoopState::Stopped);
    }

    #[tokio::test]
    async fn single_block_range() {
        let net = TestNet::simple_chain(10);
        let store = Arc::new(MemoryTableStore::new());
        let config = IndexerBuilder::new()
            .from_height(7)
            .to_height(7)
            .build()
            .unwrap();
        let mut index_loop = IndexLoop::new(
            config,
            net.chain.clone(),
            net.repository.clone(),
            store.clone(),
            Arc::new(WalletRuleSet::new()),
            CancellationToken::new(),
        )
        .unwrap();
        index_loop.run().await.unwrap();
        assert_eq!(store.row_count("blocks"), 1);
        assert_eq!(index_loop.status().store_tip, Some(7));
    }

    #[tokio::test]
    async fn emits_progress_events() {
        let net = TestNet::simple_chain(8);
        let store = Arc::new(MemoryTableStore::new());
        let mut index_loop = IndexLoop::new(
            small_config(8),
            net.chain.clone(),
            net.repository.clone(),
            store,
            Arc::new(WalletRuleSet::new()),
            CancellationToken::new(),
        )
        .unwrap();
        let mut events = index_loop.subscribe();
        index_loop.run().await.unwrap();

        let mut saw_started = false;
        let mut saw_completed = false;
        let mut saw_stopped = false;
        while let Ok(event) = events.try_recv() {
            match event {
                IndexLoopEvent::BatchStarted { .. } => saw_started = true,
                IndexLoopEvent::BatchCompleted { .. } => saw_completed = true,
                IndexLoopEvent::Stopped => saw_stopped = true,
                _ => {}
            }
        }
        assert!(saw_started && saw_completed && saw_stopped);
    }
}
