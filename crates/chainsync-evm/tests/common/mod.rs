#![allow(dead_code)]

use std::sync::Arc;

use alloy_primitives::U256;
use chainsync_core::types::{Log, Transaction, TransactionRecord};
use chainsync_core::MockChain;

pub const CONTRACT: &str = "0x7b79995e5f793a07bc00c21412e50ecae098e7f9";
pub const TRANSFER: &str = "Transfer(address indexed from, address indexed to, uint256 value)";
pub const TRANSFER_TOPIC: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";
pub const ALICE: &str = "0xa11ce00000000000000000000000000000000001";
pub const BOB: &str = "0xb0b0000000000000000000000000000000000002";

fn word(tail: &str) -> String {
    format!("0x{tail:0>64}")
}

/// `Transfer(ALICE → BOB, value)` emitted by [`CONTRACT`].
pub fn transfer_log(block: u64, tx_hash: &str, log_index: u64, value: u64) -> Log {
    Log {
        address: CONTRACT.to_string(),
        topics: vec![
            TRANSFER_TOPIC.to_string(),
            word(ALICE.trim_start_matches("0x")),
            word(BOB.trim_start_matches("0x")),
        ],
        data: word(&format!("{value:x}")),
        block_number: block,
        block_hash: format!("0x{block:064x}"),
        transaction_hash: tx_hash.to_string(),
        log_index,
        removed: false,
    }
}

/// A chain at `tip` with [`CONTRACT`] deployed at genesis.
pub fn chain_with_contract(tip: u64) -> Arc<MockChain> {
    let chain = Arc::new(MockChain::new(tip));
    chain.deploy(CONTRACT, 0);
    chain
}

pub fn transfer_tx(hash: &str, block: u64, from: &str, to: &str) -> Transaction {
    Transaction {
        hash: hash.to_string(),
        from: from.to_string(),
        to: Some(to.to_string()),
        value: U256::from(1_000u64),
        gas_price: Some(U256::from(30_000_000_000u64)),
        nonce: block,
        input: "0x".into(),
        block_number: block,
        block_hash: String::new(),
        transaction_index: 0,
    }
}

pub fn stored(tx: &Transaction) -> TransactionRecord {
    TransactionRecord::from_chain(tx, None, None)
}
