//! Chain data and the rows materialised from it.

use alloy_primitives::U256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Chain data ───────────────────────────────────────────────────────────────

/// A block as returned by the chain client.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub number: u64,
    pub hash: String,
    pub parent_hash: String,
    /// Unix timestamp (seconds).
    pub timestamp: i64,
    /// Full transactions; empty when the block was fetched without them.
    pub transactions: Vec<Transaction>,
}

/// A transaction embedded in a block.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub hash: String,
    pub from: String,
    /// `None` for contract creations.
    pub to: Option<String>,
    pub value: U256,
    pub gas_price: Option<U256>,
    pub nonce: u64,
    pub input: String,
    pub block_number: u64,
    pub block_hash: String,
    pub transaction_index: u32,
}

impl Transaction {
    /// Returns `true` if `address` is the sender or the recipient (case-insensitive).
    pub fn touches(&self, address: &str) -> bool {
        self.from.eq_ignore_ascii_case(address)
            || self
                .to
                .as_deref()
                .is_some_and(|to| to.eq_ignore_ascii_case(address))
    }
}

/// Execution outcome of a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    pub gas_used: U256,
    /// `Some(1)` success, `Some(0)` reverted, `None` for pre-Byzantium receipts.
    pub status: Option<i32>,
}

/// A contract log as returned by a log query.
#[derive(Debug, Clone, PartialEq)]
pub struct Log {
    pub address: String,
    pub topics: Vec<String>,
    /// ABI-encoded non-indexed arguments (`0x…`).
    pub data: String,
    pub block_number: u64,
    pub block_hash: String,
    pub transaction_hash: String,
    pub log_index: u64,
    /// Set by the node when the log was dropped from the canonical chain.
    pub removed: bool,
}

// ─── Rows ─────────────────────────────────────────────────────────────────────

/// One decoded contract event. Identity: `(transaction_hash, log_index)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub contract_address: String,
    pub event_name: String,
    pub block_number: u64,
    pub transaction_hash: String,
    pub log_index: u64,
    pub block_hash: String,
    /// Unix timestamp of the parent block.
    pub timestamp: i64,
    pub sender_address: Option<String>,
    pub recipient_address: Option<String>,
    /// Decimal string; wide enough for uint256.
    pub value: Option<String>,
    pub raw_args: serde_json::Value,
}

impl EventRecord {
    pub fn key(&self) -> (&str, u64) {
        (&self.transaction_hash, self.log_index)
    }
}

/// One stored transaction. Identity: `hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub hash: String,
    pub from_address: String,
    pub to_address: Option<String>,
    /// Wei, decimal string.
    pub value: String,
    pub gas_used: Option<String>,
    pub gas_price: Option<String>,
    pub block_number: u64,
    pub block_hash: String,
    pub transaction_index: u32,
    pub nonce: u64,
    pub input: String,
    pub status: Option<i32>,
    pub user_id: Option<String>,
}

impl TransactionRecord {
    /// Build a row from a block transaction and, when fetched, its receipt.
    pub fn from_chain(tx: &Transaction, receipt: Option<&Receipt>, user_id: Option<&str>) -> Self {
        Self {
            hash: tx.hash.clone(),
            from_address: tx.from.clone(),
            to_address: tx.to.clone(),
            value: tx.value.to_string(),
            gas_used: receipt.map(|r| r.gas_used.to_string()),
            gas_price: tx.gas_price.map(|p| p.to_string()),
            block_number: tx.block_number,
            block_hash: tx.block_hash.clone(),
            transaction_index: tx.transaction_index,
            nonce: tx.nonce,
            input: tx.input.clone(),
            status: receipt.and_then(|r| r.status),
            user_id: user_id.map(str::to_string),
        }
    }
}

/// Latest observed balance of an address for one owner. Identity: `(user_id, address)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressBalance {
    pub user_id: Option<String>,
    pub address: String,
    /// Wei, decimal string.
    pub balance: String,
    pub block_number: u64,
    pub last_updated: DateTime<Utc>,
}

impl AddressBalance {
    /// Balance in ether, or the raw string if it is not a decimal integer.
    pub fn formatted_balance(&self) -> String {
        crate::units::format_ether_str(&self.balance).unwrap_or_else(|| self.balance.clone())
    }
}

// ─── Address helpers ──────────────────────────────────────────────────────────

/// Returns `true` for a `0x`-prefixed, 20-byte hex address.
pub fn is_valid_address(address: &str) -> bool {
    match address.strip_prefix("0x").or_else(|| address.strip_prefix("0X")) {
        Some(hex) => hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

/// Returns `true` if the bytecode returned by `eth_getCode` is empty.
pub fn is_empty_code(code: &str) -> bool {
    let hex = code.strip_prefix("0x").unwrap_or(code);
    hex.is_empty() || hex.chars().all(|c| c == '0')
}
