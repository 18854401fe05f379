//! Projection task template.
//!
//! All projection streams share one shape: pull blocks from a fetcher,
//! project each block into table writes, buffer them, flush at thresholds,
//! and on every checkpoint intent flush, drain the scheduler, then persist
//! the checkpoint — so a locator is only durable once every row at or below
//! its height has been acknowledged by the store.

use crate::bulk::BulkImporter;
use crate::checkpoint::{CheckpointRepository, StreamKind};
use crate::error::IndexError;
use crate::fetcher::{BlockFetcher, Fetched};
use crate::scheduler::WriteScheduler;
use crate::store::TableWrite;
use crate::types::{Block, ChainedHeader, Height};

/// The capability a projection stream implements: turn one block into the
/// table writes of its entity family.
pub trait BlockProjector: Send + Sync {
    fn kind(&self) -> StreamKind;

    fn project(&self, height: Height, block: &Block) -> Vec<TableWrite>;
}

/// Drive one projector over one fetcher run. Returns the stream's new
/// cursor (`None` if nothing was ever processed).
pub async fn run_projection(
    projector: &dyn BlockProjector,
    fetcher: &mut BlockFetcher,
    scheduler: &WriteScheduler,
    checkpoints: &CheckpointRepository,
    partition_threshold: usize,
    total_threshold: usize,
) -> Result<Option<ChainedHeader>, IndexError> {
    let mut bulk = BulkImporter::new(partition_threshold, total_threshold);
    let mut blocks = 0u64;
    let mut rows = 0u64;

    while let Some(fetched) = fetcher.next().await? {
        match fetched {
            Fetched::Block(height, block) => {
                for write in projector.project(height, &block) {
                    rows += 1;
                    bulk.add(write);
                }
                blocks += 1;
                bulk.maybe_flush(scheduler).await?;
            }
            Fetched::SaveIntent(locator) => {
                bulk.flush_all(scheduler).await?;
                scheduler.wait_drain().await?;
                checkpoints.save(projector.kind(), &locator).await?;
            }
        }
    }

    bulk.flush_all(scheduler).await?;
    scheduler.wait_drain().await?;
    tracing::debug!(stream = %projector.kind(), blocks, rows, "projection run complete");
    Ok(fetcher.last_processed().cloned())
}
