//! The four projection streams, plus the auxiliary smart-contract rows.

use std::sync::Arc;

use crate::balance::{extract_changes, BalanceChangeEntry, WalletBalanceEntry, WalletRuleSet};
use crate::checkpoint::StreamKind;
use crate::entity::{BlockEntry, SmartContractEntry, TableEntity, TableSet, TransactionEntry};
use crate::store::TableWrite;
use crate::task::BlockProjector;
use crate::types::{Block, Height, Script};

/// Script prefix marking a contract deployment output; the bytes after it
/// are the contract bytecode.
pub const CONTRACT_DEPLOY_PREFIX: [u8; 2] = [0xc0, 0xde];

/// Contract bytecode carried by a deployment script, if any.
pub fn deployment_code(script: &Script) -> Option<&[u8]> {
    script
        .0
        .strip_prefix(&CONTRACT_DEPLOY_PREFIX[..])
        .filter(|code| !code.is_empty())
}

// ─── Blocks ──────────────────────────────────────────────────────────────────

/// One row per block: header plus ordered transaction ids.
pub struct BlockProjection {
    tables: TableSet,
}

impl BlockProjection {
    pub fn new(tables: TableSet) -> Self {
        Self { tables }
    }
}

impl BlockProjector for BlockProjection {
    fn kind(&self) -> StreamKind {
        StreamKind::Blocks
    }

    fn project(&self, height: Height, block: &Block) -> Vec<TableWrite> {
        let entry = BlockEntry {
            height,
            header: block.header.clone(),
            tx_ids: block.transactions.iter().map(|tx| tx.txid).collect(),
        };
        vec![entry.to_write(&self.tables.blocks)]
    }
}

// ─── Transactions ────────────────────────────────────────────────────────────

/// One row per transaction, back-referencing the block; deployment outputs
/// additionally emit a smart-contract detail row.
pub struct TransactionProjection {
    tables: TableSet,
}

impl TransactionProjection {
    pub fn new(tables: TableSet) -> Self {
        Self { tables }
    }
}

impl BlockProjector for TransactionProjection {
    fn kind(&self) -> StreamKind {
        StreamKind::Transactions
    }

    fn project(&self, height: Height, block: &Block) -> Vec<TableWrite> {
        let mut writes = Vec::with_capacity(block.transactions.len());
        for (position, tx) in block.transactions.iter().enumerate() {
            let entry = TransactionEntry {
                height,
                block_hash: block.hash(),
                position: position as u32,
                transaction: tx.clone(),
            };
            writes.push(entry.to_write(&self.tables.transactions));

            for (vout, output) in tx.outputs.iter().enumerate() {
                if let Some(code) = deployment_code(&output.script) {
                    let contract = SmartContractEntry {
                        txid: tx.txid,
                        vout: vout as u32,
                        code: code.to_vec(),
                    };
                    writes.push(contract.to_write(&self.tables.smart_contracts));
                }
            }
        }
        writes
    }
}

// ─── Balances ────────────────────────────────────────────────────────────────

/// One row per (script, transaction) pair touching that script.
pub struct BalanceProjection {
    tables: TableSet,
}

impl BalanceProjection {
    pub fn new(tables: TableSet) -> Self {
        Self { tables }
    }
}

impl BlockProjector for BalanceProjection {
    fn kind(&self) -> StreamKind {
        StreamKind::Balances
    }

    fn project(&self, height: Height, block: &Block) -> Vec<TableWrite> {
        let mut writes = Vec::new();
        for (tx_index, tx) in block.transactions.iter().enumerate() {
            for change in extract_changes(
                height,
                block.hash(),
                block.header.timestamp,
                tx_index as u32,
                tx,
            ) {
                writes.push(BalanceChangeEntry { change }.to_write(&self.tables.balances));
            }
        }
        writes
    }
}

// ─── Wallets ─────────────────────────────────────────────────────────────────

/// Balance changes re-partitioned by matching wallet rule. An empty rule
/// set is short-circuited by the indexing loop before this projector runs.
pub struct WalletProjection {
    tables: TableSet,
    rules: Arc<WalletRuleSet>,
}

impl WalletProjection {
    pub fn new(tables: TableSet, rules: Arc<WalletRuleSet>) -> Self {
        Self { tables, rules }
    }
}

impl BlockProjector for WalletProjection {
    fn kind(&self) -> StreamKind {
        StreamKind::Wallets
    }

    fn project(&self, height: Height, block: &Block) -> Vec<TableWrite> {
        let mut writes = Vec::new();
        for (tx_index, tx) in block.transactions.iter().enumerate() {
            for change in extract_changes(
                height,
                block.hash(),
                block.header.timestamp,
                tx_index as u32,
                tx,
            ) {
                for rule in self.rules.matching(&change.script) {
                    let entry = WalletBalanceEntry {
                        wallet_id: rule.id.clone(),
                        change: change.clone(),
                    };
                    writes.push(entry.to_write(&self.tables.wallets));
                }
            }
        }
        writes
    }
}

/// The four projection streams in their fixed processing order.
pub fn standard_projections(
    tables: &TableSet,
    rules: Arc<WalletRuleSet>,
) -> Vec<Box<dyn BlockProjector>> {
    vec![
        Box::new(BlockProjection::new(tables.clone())),
        Box::new(TransactionProjection::new(tables.clone())),
        Box::new(BalanceProjection::new(tables.clone())),
        Box::new(WalletProjection::new(tables.clone(), rules)),
    ]
}
