//! Chain data model shared across the indexing pipeline.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Block height along the best chain.
pub type Height = u32;

// ─── Hash256 ─────────────────────────────────────────────────────────────────

/// A 256-bit hash (block hash or transaction id), hex-encoded on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    /// Parse from a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, crate::error::IndexError> {
        let bytes = hex::decode(s)
            .map_err(|e| crate::error::IndexError::Chain(format!("bad hash hex: {e}")))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| crate::error::IndexError::Chain("hash must be 32 bytes".into()))?;
        Ok(Self(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 8 hex characters — used as the short form in row keys.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash256({})", self.to_hex())
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash256::from_hex(&s).map_err(|e| D::Error::custom(e.to_string()))
    }
}

// ─── Script ──────────────────────────────────────────────────────────────────

/// An output script — the address identity used by the balance projections.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Script(pub Vec<u8>);

impl Script {
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, crate::error::IndexError> {
        let bytes = hex::decode(s)
            .map_err(|e| crate::error::IndexError::Chain(format!("bad script hex: {e}")))?;
        Ok(Self(bytes))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Script({})", self.to_hex())
    }
}

impl Serialize for Script {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Script {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Script::from_hex(&s).map_err(|e| D::Error::custom(e.to_string()))
    }
}

// ─── Headers and blocks ──────────────────────────────────────────────────────

/// A header placed on the best chain — the chain view's unit of progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainedHeader {
    pub height: Height,
    pub hash: Hash256,
    pub prev_hash: Hash256,
    /// Unix timestamp of the block (seconds since epoch).
    pub timestamp: i64,
}

impl ChainedHeader {
    /// Returns `true` if `self` is the direct child of `parent`.
    pub fn extends(&self, parent: &ChainedHeader) -> bool {
        self.height == parent.height + 1 && self.prev_hash == parent.hash
    }
}

/// Standalone block header as stored inside a full block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub hash: Hash256,
    pub prev_hash: Hash256,
    pub timestamp: i64,
}

/// A reference to a transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

impl OutPoint {
    /// The null outpoint marks a coinbase input.
    pub fn null() -> Self {
        Self {
            txid: Hash256::ZERO,
            vout: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.vout == u32::MAX
    }
}

/// A transaction input, carrying its resolved previous output.
///
/// The block repository resolves inputs before handing blocks to the
/// projections, so balance extraction never needs a UTXO lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    pub prev_out: OutPoint,
    /// Value of the spent output, in minor units.
    pub prev_value: i64,
    /// Script of the spent output.
    pub prev_script: Script,
}

/// A transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    /// Amount in minor units.
    pub value: i64,
    pub script: Script,
}

/// A transaction with resolved inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub txid: Hash256,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
}

impl Transaction {
    /// A coinbase transaction spends only the null outpoint.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.iter().all(|i| i.prev_out.is_null())
    }
}

/// A full block: header plus its ordered transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> Hash256 {
        self.header.hash
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
