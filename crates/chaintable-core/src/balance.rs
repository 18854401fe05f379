//! Ordered balance changes — the per-(script, tx) movement rows, and the
//! wallet rules that tag them into logical wallet partitions.
//!
//! Extraction is pure over a resolved transaction: received amounts come
//! from outputs, sent amounts and spent-output references from resolved
//! inputs. Change indexes are assigned in script byte order, so replays
//! produce identical rows.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::entity::{balance_row_key, TableEntity};
use crate::types::{Hash256, Height, OutPoint, Script, Transaction};

// ─── OrderedBalanceChange ────────────────────────────────────────────────────

/// One balance movement: everything transaction `txid` did to `script`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderedBalanceChange {
    pub height: Height,
    pub block_hash: Hash256,
    /// Block timestamp — the confirmation info carried on the row.
    pub timestamp: i64,
    pub txid: Hash256,
    /// 0-based position of the transaction within its block.
    pub tx_index: u32,
    /// 0-based index of this change within the transaction.
    pub change_index: u32,
    pub script: Script,
    /// Sum of outputs paying `script`, minor units.
    pub received: i64,
    /// Sum of spent outputs previously held by `script`, minor units.
    pub sent: i64,
    /// The outpoints this transaction spent from `script`.
    pub spent_outpoints: Vec<OutPoint>,
}

impl OrderedBalanceChange {
    pub fn net(&self) -> i64 {
        self.received - self.sent
    }
}

/// Extract every balance change a transaction causes, one per script
/// touched, in deterministic script order.
pub fn extract_changes(
    height: Height,
    block_hash: Hash256,
    timestamp: i64,
    tx_index: u32,
    tx: &Transaction,
) -> Vec<OrderedBalanceChange> {
    #[derive(Default)]
    struct Acc {
        received: i64,
        sent: i64,
        spent: Vec<OutPoint>,
    }

    let mut per_script: BTreeMap<Script, Acc> = BTreeMap::new();
    for output in &tx.outputs {
        per_script.entry(output.script.clone()).or_default().received += output.value;
    }
    for input in &tx.inputs {
        if input.prev_out.is_null() {
            continue; // coinbase
        }
        let acc = per_script.entry(input.prev_script.clone()).or_default();
        acc.sent += input.prev_value;
        acc.spent.push(input.prev_out);
    }

    per_script
        .into_iter()
        .enumerate()
        .map(|(change_index, (script, acc))| OrderedBalanceChange {
            height,
            block_hash,
            timestamp,
            txid: tx.txid,
            tx_index,
            change_index: change_index as u32,
            script,
            received: acc.received,
            sent: acc.sent,
            spent_outpoints: acc.spent,
        })
        .collect()
}

fn change_payload(change: &OrderedBalanceChange) -> serde_json::Value {
    serde_json::json!({
        "script": change.script,
        "txid": change.txid,
        "height": change.height,
        "block_hash": change.block_hash,
        "timestamp": change.timestamp,
        "tx_index": change.tx_index,
        "change_index": change.change_index,
        "received": change.received,
        "sent": change.sent,
        "spent_outpoints": change.spent_outpoints,
    })
}

// ─── Entity wrappers ─────────────────────────────────────────────────────────

/// Partition key of a script's balance history.
pub fn balance_partition(script: &Script) -> String {
    format!("s{}", script.to_hex())
}

/// A balance change in the per-script balances table.
#[derive(Debug, Clone)]
pub struct BalanceChangeEntry {
    pub change: OrderedBalanceChange,
}

impl TableEntity for BalanceChangeEntry {
    fn partition_key(&self) -> String {
        balance_partition(&self.change.script)
    }

    fn row_key(&self) -> String {
        balance_row_key(
            self.change.height,
            &self.change.block_hash,
            self.change.tx_index,
            self.change.change_index,
        )
    }

    fn payload(&self) -> serde_json::Value {
        change_payload(&self.change)
    }
}

/// A balance change tagged into a wallet-rule partition.
#[derive(Debug, Clone)]
pub struct WalletBalanceEntry {
    pub wallet_id: String,
    pub change: OrderedBalanceChange,
}

impl TableEntity for WalletBalanceEntry {
    fn partition_key(&self) -> String {
        self.wallet_id.clone()
    }

    fn row_key(&self) -> String {
        balance_row_key(
            self.change.height,
            &self.change.block_hash,
            self.change.tx_index,
            self.change.change_index,
        )
    }

    fn payload(&self) -> serde_json::Value {
        let mut payload = change_payload(&self.change);
        payload["wallet_id"] = serde_json::Value::String(self.wallet_id.clone());
        payload
    }
}

// ─── Wallet rules ────────────────────────────────────────────────────────────

/// A named predicate over scripts: balance changes touching any of the
/// rule's scripts land in the rule's wallet partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletRule {
    pub id: String,
    pub scripts: BTreeSet<Script>,
}

impl WalletRule {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            scripts: BTreeSet::new(),
        }
    }

    pub fn with_script(mut self, script: Script) -> Self {
        self.scripts.insert(script);
        self
    }

    pub fn matches(&self, script: &Script) -> bool {
        self.scripts.contains(script)
    }
}

/// The configured wallet-rule collection. An empty set short-circuits the
/// wallet stream entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletRuleSet {
    rules: Vec<WalletRule>,
}

impl WalletRuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a rule by id.
    pub fn add_rule(&mut self, rule: WalletRule) {
        if let Some(existing) = self.rules.iter_mut().find(|r| r.id == rule.id) {
            *existing = rule;
        } else {
            self.rules.push(rule);
        }
    }

    pub fn get(&self, id: &str) -> Option<&WalletRule> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Every rule matching `script`.
    pub fn matching<'a>(&'a self, script: &'a Script) -> impl Iterator<Item = &'a WalletRule> {
        self.rules.iter().filter(move |rule| rule.matches(script))
    }
}
