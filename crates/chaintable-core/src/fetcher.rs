//! Block fetcher — the checkpoint-anchored block sequence feeding one stream.
//!
//! A fetcher produces a finite ordered run of `(height, block)` from
//! `max(last_processed + 1, from_height)` up to and including `to_height`,
//! interleaved with checkpoint intents every `save_interval` blocks and at
//! the end of the run. A height the chain or the repository cannot resolve
//! ends the run: the cursor stays below the gap so the next batch retries it.
//! Fetchers are constructed fresh each batch.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::chain::{BlockRepository, ChainView};
use crate::error::IndexError;
use crate::locator::BlockLocator;
use crate::types::{Block, ChainedHeader, Height};

/// One emission from a fetcher.
#[derive(Debug, Clone)]
pub enum Fetched {
    /// The next block to project.
    Block(Height, Block),
    /// Persist this locator once all rows at or below its height are
    /// acknowledged.
    SaveIntent(BlockLocator),
}

pub struct BlockFetcher {
    chain: Arc<dyn ChainView>,
    repository: Arc<dyn BlockRepository>,
    cancel: CancellationToken,
    next_height: Height,
    to_height: Height,
    last_processed: Option<ChainedHeader>,
    save_interval: u32,
    since_save: u32,
    pending_intent: Option<BlockLocator>,
    finished: bool,
}

impl BlockFetcher {
    pub fn new(
        chain: Arc<dyn ChainView>,
        repository: Arc<dyn BlockRepository>,
        last_processed: Option<ChainedHeader>,
        from_height: Height,
        to_height: Height,
        save_interval: u32,
        cancel: CancellationToken,
    ) -> Self {
        let resume = last_processed
            .as_ref()
            .map(|h| h.height.saturating_add(1))
            .unwrap_or(0);
        Self {
            chain,
            repository,
            cancel,
            next_height: resume.max(from_height),
            to_height,
            last_processed,
            save_interval: save_interval.max(1),
            since_save: 0,
            pending_intent: None,
            finished: false,
        }
    }

    /// The most recently emitted header — the stream's new cursor.
    pub fn last_processed(&self) -> Option<&ChainedHeader> {
        self.last_processed.as_ref()
    }

    /// Next emission, or `None` when the run is over. Cancellation ends the
    /// run cleanly, discarding any pending intent.
    pub async fn next(&mut self) -> Result<Option<Fetched>, IndexError> {
        if self.cancel.is_cancelled() {
            self.finished = true;
            self.pending_intent = None;
            return Ok(None);
        }
        if let Some(locator) = self.pending_intent.take() {
            return Ok(Some(Fetched::SaveIntent(locator)));
        }
        if self.finished {
            return Ok(None);
        }

        if self.next_height > self.to_height {
            return Ok(self.finish());
        }

        let header = match self.chain.block_at(self.next_height) {
            Some(header) => header,
            None => {
                // Chain has not grown this far yet.
                return Ok(self.finish());
            }
        };

        let block = match self.repository.block(&header.hash).await? {
            Some(block) => block,
            None => {
                tracing::warn!(
                    height = self.next_height,
                    hash = %header.hash,
                    "block missing from repository, leaving gap for next batch"
                );
                return Ok(self.finish());
            }
        };

        let height = self.next_height;
        self.next_height = self.next_height.saturating_add(1);
        self.last_processed = Some(header);
        self.since_save += 1;
        if self.since_save >= self.save_interval {
            self.since_save = 0;
            self.pending_intent = Some(self.locator());
        }
        Ok(Some(Fetched::Block(height, block)))
    }

    fn finish(&mut self) -> Option<Fetched> {
        self.finished = true;
        if self.since_save > 0 && self.last_processed.is_some() {
            self.since_save = 0;
            return Some(Fetched::SaveIntent(self.locator()));
        }
        None
    }

    fn locator(&self) -> BlockLocator {
        let anchor = self
            .last_processed
            .as_ref()
            .expect("locator requires a processed header");
        self.chain.locator_at(anchor.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{HeaderChain, MemoryBlockRepository};
    use crate::types::{BlockHeader, Hash256};

    fn h(n: u32) -> Hash256 {
        let mut b = [0u8; 32];
        b[..4].copy_from_slice(&n.to_be_bytes());
        Hash256(b)
    }

    fn network(tip: Height) -> (Arc<HeaderChain>, Arc<MemoryBlockRepository>) {
        let chain = HeaderChain::new(ChainedHeader {
            height: 0,
            hash: h(1),
            prev_hash: Hash256::ZERO,
            timestamp: 0,
        })
        .unwrap();
        let repo = MemoryBlockRepository::new();
        repo.insert(Block {
            header: BlockHeader {
                hash: h(1),
                prev_hash: Hash256::ZERO,
                timestamp: 0,
            },
            transactions: vec![],
        });
        for height in 1..=tip {
            chain
                .append(ChainedHeader {
                    height,
                    hash: h(height + 1),
                    prev_hash: h(height),
                    timestamp: height as i64 * 600,
                })
                .unwrap();
            repo.insert(Block {
                header: BlockHeader {
                    hash: h(height + 1),
                    prev_hash: h(height),
                    timestamp: height as i64 * 600,
                },
                transactions: vec![],
            });
        }
        (Arc::new(chain), Arc::new(repo))
    }

    async fn drain(fetcher: &mut BlockFetcher) -> (Vec<Height>, Vec<BlockLocator>) {
        let mut heights = Vec::new();
        let mut intents = Vec::new();
        while let Some(fetched) = fetcher.next().await.unwrap() {
            match fetched {
                Fetched::Block(height, _) => heights.push(height),
                Fetched::SaveIntent(locator) => intents.push(locator),
            }
        }
        (heights, intents)
    }

    #[tokio::test]
    async fn emits_bounded_ordered_run() {
        let (chain, repo) = network(20);
        let mut fetcher = BlockFetcher::new(
            chain.clone(),
            repo,
            None,
            0,
            9,
            100,
            CancellationToken::new(),
        );
        let (heights, intents) = drain(&mut fetcher).await;
        assert_eq!(heights, (0..=9).collect::<Vec<_>>());
        // One final intent anchored at the last processed height.
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].tip_hash(), Some(h(10)));
        assert_eq!(fetcher.last_processed().unwrap().height, 9);
    }

    #[tokio::test]
    async fn intent_cadence_follows_save_interval() {
        let (chain, repo) = network(20);
        let mut fetcher =
            BlockFetcher::new(chain, repo, None, 0, 9, 5, CancellationToken::new());

        let mut sequence = Vec::new();
        while let Some(fetched) = fetcher.next().await.unwrap() {
            sequence.push(match fetched {
                Fetched::Block(height, _) => format!("b{height}"),
                Fetched::SaveIntent(_) => "save".to_string(),
            });
        }
        assert_eq!(
            sequence,
            vec![
                "b0", "b1", "b2", "b3", "b4", "save", "b5", "b6", "b7", "b8", "b9", "save"
            ]
        );
    }

    #[tokio::test]
    async fn resumes_after_last_processed() {
        let (chain, repo) = network(20);
        let last = chain.block_at(12);
        let mut fetcher =
            BlockFetcher::new(chain, repo, last, 0, 15, 100, CancellationToken::new());
        let (heights, _) = drain(&mut fetcher).await;
        assert_eq!(heights, vec![13, 14, 15]);
    }

    #[tokio::test]
    async fn from_height_overrides_low_cursor() {
        let (chain, repo) = network(20);
        let last = chain.block_at(3);
        let mut fetcher =
            BlockFetcher::new(chain, repo, last, 10, 12, 100, CancellationToken::new());
        let (heights, _) = drain(&mut fetcher).await;
        assert_eq!(heights, vec![10, 11, 12]);
    }

    #[tokio::test]
    async fn missing_block_ends_run_before_gap() {
        let (chain, repo) = network(20);
        repo.remove(&h(6)); // height 5
        let mut fetcher = BlockFetcher::new(
            chain.clone(),
            repo,
            None,
            0,
            10,
            100,
            CancellationToken::new(),
        );
        let (heights, intents) = drain(&mut fetcher).await;
        assert_eq!(heights, vec![0, 1, 2, 3, 4]);
        // Cursor and intent both pinned below the gap.
        assert_eq!(fetcher.last_processed().unwrap().height, 4);
        assert_eq!(intents.last().unwrap().tip_hash(), Some(h(5)));
    }

    #[tokio::test]
    async fn chain_shorter_than_range_ends_quietly() {
        let (chain, repo) = network(5);
        let mut fetcher =
            BlockFetcher::new(chain, repo, None, 0, 100, 100, CancellationToken::new());
        let (heights, _) = drain(&mut fetcher).await;
        assert_eq!(heights, (0..=5).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn cancellation_ends_run_and_discards_intents() {
        let (chain, repo) = network(20);
        let cancel = CancellationToken::new();
        let mut fetcher =
            BlockFetcher::new(chain, repo, None, 0, 19, 2, cancel.clone());

        // Two blocks queue a save intent; cancel before it is delivered.
        assert!(matches!(
            fetcher.next().await.unwrap(),
            Some(Fetched::Block(0, _))
        ));
        assert!(matches!(
            fetcher.next().await.unwrap(),
            Some(Fetched::Block(1, _))
        ));
        cancel.cancel();
        assert!(fetcher.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn exhausted_range_yields_nothing() {
        let (chain, repo) = network(20);
        let last = chain.block_at(15);
        let mut fetcher =
            BlockFetcher::new(chain, repo, last, 0, 15, 5, CancellationToken::new());
        let (heights, intents) = drain(&mut fetcher).await;
        assert!(heights.is_empty());
        assert!(intents.is_empty());
    }
}
