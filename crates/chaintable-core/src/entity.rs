//! Table entities — partition/row key derivation and payload serialization.
//!
//! Row identity is deterministic: re-projecting the same block yields the
//! same keys and payloads, so replace-semantics upserts make replays
//! idempotent. Height components are zero-padded so lexicographic row-key
//! order matches chronological order within a partition.

use serde::{Deserialize, Serialize};

use crate::store::{TableRow, TableWrite};
use crate::types::{BlockHeader, ChainedHeader, Hash256, Height, Transaction};

// ─── Table names ─────────────────────────────────────────────────────────────

/// The pipeline's table names under one storage namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSet {
    pub blocks: String,
    pub transactions: String,
    pub balances: String,
    pub wallets: String,
    pub chain: String,
    pub checkpoints: String,
    pub smart_contracts: String,
}

impl TableSet {
    pub fn new(namespace: &str) -> Self {
        Self {
            blocks: format!("{namespace}blocks"),
            transactions: format!("{namespace}transactions"),
            balances: format!("{namespace}balances"),
            wallets: format!("{namespace}wallets"),
            chain: format!("{namespace}chain"),
            checkpoints: format!("{namespace}checkpoints"),
            smart_contracts: format!("{namespace}smartcontracts"),
        }
    }

    pub fn all(&self) -> [&str; 7] {
        [
            &self.blocks,
            &self.transactions,
            &self.balances,
            &self.wallets,
            &self.chain,
            &self.checkpoints,
            &self.smart_contracts,
        ]
    }
}

// ─── Key helpers ─────────────────────────────────────────────────────────────

/// Hash-derived bucket key: the first byte of the hash, as two hex chars.
/// Spreads rows over 256 partitions.
pub fn hash_bucket(hash: &Hash256) -> String {
    hex::encode(&hash.0[..1])
}

/// Heights as 20-digit zero-padded strings so row keys sort numerically.
pub fn padded_height(height: Height) -> String {
    format!("{height:020}")
}

/// Row key for ordered balance changes:
/// `height-blockhashshort-txindex-changeindex`, every numeric piece
/// zero-padded for lexicographic order.
pub fn balance_row_key(
    height: Height,
    block_hash: &Hash256,
    tx_index: u32,
    change_index: u32,
) -> String {
    format!(
        "{}-{}-{tx_index:06}-{change_index:04}",
        padded_height(height),
        block_hash.short()
    )
}

// ─── TableEntity ─────────────────────────────────────────────────────────────

/// The capability set every entity family implements: derive its partition
/// key, derive its row key, serialize its payload.
pub trait TableEntity {
    fn partition_key(&self) -> String;
    fn row_key(&self) -> String;
    fn payload(&self) -> serde_json::Value;

    fn to_row(&self) -> TableRow {
        TableRow {
            partition_key: self.partition_key(),
            row_key: self.row_key(),
            payload: self.payload(),
        }
    }

    fn to_write(&self, table: &str) -> TableWrite {
        TableWrite {
            table: table.to_string(),
            row: self.to_row(),
        }
    }
}

// ─── Block rows ──────────────────────────────────────────────────────────────

/// One row per block: header plus the ordered transaction id list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockEntry {
    pub height: Height,
    pub header: BlockHeader,
    pub tx_ids: Vec<Hash256>,
}

impl TableEntity for BlockEntry {
    fn partition_key(&self) -> String {
        hash_bucket(&self.header.hash)
    }

    fn row_key(&self) -> String {
        self.header.hash.to_hex()
    }

    fn payload(&self) -> serde_json::Value {
        serde_json::json!({
            "height": self.height,
            "header": self.header,
            "tx_ids": self.tx_ids,
        })
    }
}

// ─── Transaction rows ────────────────────────────────────────────────────────

/// One row per transaction, back-referencing its block and position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionEntry {
    pub height: Height,
    pub block_hash: Hash256,
    /// 0-based position within the block.
    pub position: u32,
    pub transaction: Transaction,
}

impl TableEntity for TransactionEntry {
    fn partition_key(&self) -> String {
        hash_bucket(&self.transaction.txid)
    }

    fn row_key(&self) -> String {
        self.transaction.txid.to_hex()
    }

    fn payload(&self) -> serde_json::Value {
        serde_json::json!({
            "raw": self.transaction,
            "block_hash": self.block_hash,
            "height": self.height,
            "position": self.position,
        })
    }
}

// ─── Chain header rows ───────────────────────────────────────────────────────

/// Partition all header rows share in the chain table.
pub const CHAIN_PARTITION: &str = "headers";

/// One row per accepted header, keyed by height.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainHeaderEntry {
    pub header: ChainedHeader,
}

impl TableEntity for ChainHeaderEntry {
    fn partition_key(&self) -> String {
        CHAIN_PARTITION.to_string()
    }

    fn row_key(&self) -> String {
        padded_height(self.header.height)
    }

    fn payload(&self) -> serde_json::Value {
        serde_json::json!({
            "height": self.header.height,
            "hash": self.header.hash,
            "prev_hash": self.header.prev_hash,
            "timestamp": self.header.timestamp,
        })
    }
}

// ─── Smart contract rows ─────────────────────────────────────────────────────

/// Partition holding every smart-contract detail row.
pub const SMART_CONTRACT_PARTITION: &str = "SmartContract";

/// Payload field the writer emits for contract bytecode.
pub const CONTRACT_CODE_FIELD: &str = "CSharpCode";
/// Historical misspelling still accepted on the read path.
pub const CONTRACT_CODE_FIELD_LEGACY: &str = "CShartCode";

/// Auxiliary row emitted when a transaction output carries a contract
/// deployment payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartContractEntry {
    pub txid: Hash256,
    pub vout: u32,
    pub code: Vec<u8>,
}

impl SmartContractEntry {
    /// Read contract bytecode out of a stored payload, accepting both the
    /// corrected and the historical field spelling.
    pub fn code_from_payload(payload: &serde_json::Value) -> Option<Vec<u8>> {
        let field = payload
            .get(CONTRACT_CODE_FIELD)
            .or_else(|| payload.get(CONTRACT_CODE_FIELD_LEGACY))?;
        hex::decode(field.as_str()?).ok()
    }
}

impl TableEntity for SmartContractEntry {
    fn partition_key(&self) -> String {
        SMART_CONTRACT_PARTITION.to_string()
    }

    fn row_key(&self) -> String {
        // Contract-address-derived entry id: deployment outpoint.
        format!("{}-{}", self.txid.short(), self.vout)
    }

    fn payload(&self) -> serde_json::Value {
        serde_json::json!({
            "txid": self.txid,
            "vout": self.vout,
            CONTRACT_CODE_FIELD: hex::encode(&self.code),
        })
    }
}
