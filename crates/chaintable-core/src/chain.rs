//! Chain view and block repository seams.
//!
//! The indexing loops consume the host node through two injected interfaces:
//! `ChainView` walks the in-memory best chain and resolves forks against
//! locators, `BlockRepository` fetches full blocks by hash. `HeaderChain` is
//! the in-memory `ChainView` implementation; the chain-sync loop reads it
//! concurrently with whatever appends new headers.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;

use crate::error::IndexError;
use crate::locator::BlockLocator;
use crate::types::{Block, ChainedHeader, Hash256, Height};

// ─── ChainView ───────────────────────────────────────────────────────────────

/// Read access to the best chain. Pure in-memory; safe to query concurrently
/// with new headers being appended.
pub trait ChainView: Send + Sync {
    /// The current best header.
    fn tip(&self) -> ChainedHeader;

    /// The best-chain header at `height`, if the chain has grown that far.
    fn block_at(&self, height: Height) -> Option<ChainedHeader>;

    /// Look up a header by hash — only if it is on the best chain.
    fn header(&self, hash: &Hash256) -> Option<ChainedHeader>;

    /// Walk the locator entries in order and return the first one present on
    /// the best chain, else the genesis header.
    fn find_fork(&self, locator: &BlockLocator) -> ChainedHeader {
        for hash in &locator.hashes {
            if let Some(header) = self.header(hash) {
                return header;
            }
        }
        self.block_at(0).expect("chain always has a genesis header")
    }

    /// Build a locator anchored at `height` (clamped to the tip).
    fn locator_at(&self, height: Height) -> BlockLocator {
        let anchor = height.min(self.tip().height);
        BlockLocator::build(anchor, |h| self.block_at(h).map(|header| header.hash))
    }
}

// ─── HeaderChain ─────────────────────────────────────────────────────────────

struct ChainInner {
    /// Headers by height, genesis first.
    headers: Vec<ChainedHeader>,
    /// Hash → height for best-chain membership checks.
    by_hash: HashMap<Hash256, Height>,
}

/// In-memory best chain. One writer appends; any number of readers observe a
/// consistent `(height, hash)` pair.
pub struct HeaderChain {
    inner: RwLock<ChainInner>,
}

impl HeaderChain {
    /// Create a chain rooted at `genesis` (height must be 0).
    pub fn new(genesis: ChainedHeader) -> Result<Self, IndexError> {
        if genesis.height != 0 {
            return Err(IndexError::Chain("genesis header must be at height 0".into()));
        }
        let mut by_hash = HashMap::new();
        by_hash.insert(genesis.hash, 0);
        Ok(Self {
            inner: RwLock::new(ChainInner {
                headers: vec![genesis],
                by_hash,
            }),
        })
    }

    /// Append a header extending the current tip.
    pub fn append(&self, header: ChainedHeader) -> Result<(), IndexError> {
        let mut inner = self.inner.write().unwrap();
        let tip = inner.headers.last().expect("chain is never empty").clone();
        if !header.extends(&tip) {
            return Err(IndexError::Chain(format!(
                "header {} at height {} does not extend tip {} at height {}",
                header.hash, header.height, tip.hash, tip.height
            )));
        }
        inner.by_hash.insert(header.hash, header.height);
        inner.headers.push(header);
        Ok(())
    }

    /// Number of headers on the chain (tip height + 1). Never zero: a chain
    /// always holds at least its genesis header.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().headers.len()
    }
}

impl ChainView for HeaderChain {
    fn tip(&self) -> ChainedHeader {
        self.inner
            .read()
            .unwrap()
            .headers
            .last()
            .expect("chain is never empty")
            .clone()
    }

    fn block_at(&self, height: Height) -> Option<ChainedHeader> {
        self.inner.read().unwrap().headers.get(height as usize).cloned()
    }

    fn header(&self, hash: &Hash256) -> Option<ChainedHeader> {
        let inner = self.inner.read().unwrap();
        let height = *inner.by_hash.get(hash)?;
        inner.headers.get(height as usize).cloned()
    }
}

// ─── BlockRepository ─────────────────────────────────────────────────────────

/// Fetch full blocks from the node's block store. Callable in parallel from
/// the projection tasks.
#[async_trait]
pub trait BlockRepository: Send + Sync {
    /// Fetch a block by hash. `Ok(None)` means the store does not have it.
    async fn block(&self, hash: &Hash256) -> Result<Option<Block>, IndexError>;
}

// ─── In-memory repository (for testing) ──────────────────────────────────────

/// In-memory block repository for tests and ephemeral chains.
#[derive(Default)]
pub struct MemoryBlockRepository {
    blocks: Mutex<HashMap<Hash256, Block>>,
}

impl MemoryBlockRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, block: Block) {
        self.blocks.lock().unwrap().insert(block.hash(), block);
    }

    /// Remove a block, simulating a store gap.
    pub fn remove(&self, hash: &Hash256) {
        self.blocks.lock().unwrap().remove(hash);
    }
}

#[async_trait]
impl BlockRepository for MemoryBlockRepository {
    async fn block(&self, hash: &Hash256) -> Result<Option<Block>, IndexError> {
        Ok(self.blocks.lock().unwrap().get(hash).cloned())
    }
}
