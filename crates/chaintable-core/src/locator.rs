//! Block locators — the durable form of a stream's position.
//!
//! A locator is an exponentially thinning list of block hashes walking back
//! from a tip: the first ten entries step by one block, then the step doubles
//! until genesis, which is always included. Against a possibly reorganized
//! chain, the first entry still present on the best chain is the deepest
//! shared header.

use serde::{Deserialize, Serialize};

use crate::types::{Hash256, Height};

/// An exponentially thinning list of block hashes, newest first.
///
/// An empty locator means "nothing processed yet" — a fresh checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockLocator {
    pub hashes: Vec<Hash256>,
}

impl BlockLocator {
    /// Build a locator anchored at `tip_height`, resolving hashes through
    /// `hash_at` (heights not resolvable are skipped).
    pub fn build(tip_height: Height, hash_at: impl Fn(Height) -> Option<Hash256>) -> Self {
        let hashes = locator_heights(tip_height)
            .into_iter()
            .filter_map(hash_at)
            .collect();
        Self { hashes }
    }

    /// The hash this locator is anchored at, if any.
    pub fn tip_hash(&self) -> Option<Hash256> {
        self.hashes.first().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }
}

/// The heights a locator anchored at `tip` samples, in walk order.
///
/// Step is 1 for the first ten entries, then doubles. Height 0 is always the
/// final entry.
pub fn locator_heights(tip: Height) -> Vec<Height> {
    let mut heights = Vec::new();
    let mut height = tip as i64;
    let mut step: i64 = 1;
    while height > 0 {
        heights.push(height as Height);
        if heights.len() >= 10 {
            step *= 2;
        }
        height -= step;
    }
    heights.push(0);
    heights
}
