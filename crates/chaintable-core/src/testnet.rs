//! Synthetic chain fixtures — deterministic in-memory chains for tests.

use std::sync::Arc;

use crate::chain::{HeaderChain, MemoryBlockRepository};
use crate::types::{
    Block, BlockHeader, ChainedHeader, Hash256, Height, OutPoint, Script, Transaction, TxIn, TxOut,
};

/// Deterministic block hash for a height.
pub fn block_hash(height: Height) -> Hash256 {
    let mut b = [0u8; 32];
    b[..4].copy_from_slice(&height.to_be_bytes());
    b[31] = 0xb1;
    Hash256(b)
}

/// Deterministic transaction id from a seed.
pub fn txid(seed: u32) -> Hash256 {
    let mut b = [0u8; 32];
    b[..4].copy_from_slice(&seed.to_be_bytes());
    b[31] = 0x71;
    Hash256(b)
}

/// Short deterministic script from a seed.
pub fn script(seed: u8) -> Script {
    Script(vec![0x51, seed])
}

/// A coinbase paying `value` to `to`.
pub fn coinbase(seed: u32, to: Script, value: i64) -> Transaction {
    Transaction {
        txid: txid(seed),
        inputs: vec![TxIn {
            prev_out: OutPoint::null(),
            prev_value: 0,
            prev_script: Script(vec![]),
        }],
        outputs: vec![TxOut { value, script: to }],
    }
}

/// A payment spending one resolved previous output.
pub fn payment(
    seed: u32,
    from: (Hash256, u32, i64, Script),
    to: Vec<(i64, Script)>,
) -> Transaction {
    Transaction {
        txid: txid(seed),
        inputs: vec![TxIn {
            prev_out: OutPoint {
                txid: from.0,
                vout: from.1,
            },
            prev_value: from.2,
            prev_script: from.3,
        }],
        outputs: to
            .into_iter()
            .map(|(value, script)| TxOut { value, script })
            .collect(),
    }
}

/// An in-memory chain plus its block repository.
pub struct TestNet {
    pub chain: Arc<HeaderChain>,
    pub repository: Arc<MemoryBlockRepository>,
}

impl TestNet {
    /// A chain of `tip + 1` blocks, each carrying one coinbase that pays a
    /// script cycling over five addresses.
    pub fn simple_chain(tip: Height) -> Self {
        let blocks = (0..=tip)
            .map(|height| vec![coinbase(height, script((height % 5) as u8), 50)])
            .collect();
        Self::with_blocks(blocks)
    }

    /// Build a chain from explicit per-block transaction lists.
    pub fn with_blocks(per_block: Vec<Vec<Transaction>>) -> Self {
        assert!(!per_block.is_empty(), "a chain needs at least a genesis block");
        let genesis = ChainedHeader {
            height: 0,
            hash: block_hash(0),
            prev_hash: Hash256::ZERO,
            timestamp: 0,
        };
        let chain = Arc::new(HeaderChain::new(genesis).expect("valid genesis"));
        let repository = Arc::new(MemoryBlockRepository::new());

        for (height, transactions) in per_block.into_iter().enumerate() {
            let height = height as Height;
            let header = ChainedHeader {
                height,
                hash: block_hash(height),
                prev_hash: if height == 0 {
                    Hash256::ZERO
                } else {
                    block_hash(height - 1)
                },
                timestamp: height as i64 * 600,
            };
            if height > 0 {
                chain.append(header.clone()).expect("fixture chain extends");
            }
            repository.insert(Block {
                header: BlockHeader {
                    hash: header.hash,
                    prev_hash: header.prev_hash,
                    timestamp: header.timestamp,
                },
                transactions,
            });
        }
        Self { chain, repository }
    }
}
