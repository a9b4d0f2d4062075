//! An in-process, scriptable chain for tests and local dry runs.
//!
//! Blocks up to the tip exist implicitly (empty, 12 s apart) unless one was
//! added explicitly. Failures can be injected per call or per code probe,
//! and every call is counted.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use alloy_primitives::U256;
use async_trait::async_trait;

use crate::client::ChainClient;
use crate::error::SyncError;
use crate::types::{Block, Log, Receipt, Transaction};

/// Timestamp of block 0 on the mock chain.
pub const GENESIS_TIMESTAMP: i64 = 1_700_000_000;

/// Placeholder bytecode returned for deployed contracts.
pub const MOCK_CODE: &str = "0x6080604052";

#[derive(Default)]
struct State {
    tip: u64,
    latency: Option<Duration>,
    blocks: BTreeMap<u64, Block>,
    logs: Vec<Log>,
    deployments: HashMap<String, u64>,
    balances: HashMap<String, U256>,
    receipts: HashMap<String, Receipt>,
    fail_next: u32,
    failing_code_probes: HashSet<u64>,
    calls: HashMap<&'static str, usize>,
    max_block_fetched: Option<u64>,
}

/// Scriptable [`ChainClient`].
#[derive(Default)]
pub struct MockChain {
    state: Mutex<State>,
}

impl MockChain {
    pub fn new(tip: u64) -> Self {
        let chain = Self::default();
        chain.set_tip(tip);
        chain
    }

    pub fn set_tip(&self, tip: u64) {
        self.state.lock().unwrap().tip = tip;
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().unwrap().latency = Some(latency);
    }

    /// Make `address` have code from `block` onward.
    pub fn deploy(&self, address: &str, block: u64) {
        self.state
            .lock()
            .unwrap()
            .deployments
            .insert(address.to_ascii_lowercase(), block);
    }

    pub fn set_balance(&self, address: &str, wei: U256) {
        self.state
            .lock()
            .unwrap()
            .balances
            .insert(address.to_ascii_lowercase(), wei);
    }

    pub fn set_receipt(&self, hash: &str, receipt: Receipt) {
        self.state.lock().unwrap().receipts.insert(hash.to_string(), receipt);
    }

    pub fn add_log(&self, log: Log) {
        self.state.lock().unwrap().logs.push(log);
    }

    /// Append `tx` to its block, creating the block if needed.
    /// `block_number`, `block_hash` and `transaction_index` are filled in.
    pub fn add_transaction(&self, mut tx: Transaction) {
        let mut state = self.state.lock().unwrap();
        let number = tx.block_number;
        let block = state
            .blocks
            .entry(number)
            .or_insert_with(|| synthetic_block(number));
        tx.block_hash = block.hash.clone();
        tx.transaction_index = block.transactions.len() as u32;
        block.transactions.push(tx);
    }

    /// Fail the next `n` calls, whatever they are, with an RPC error.
    pub fn fail_next(&self, n: u32) {
        self.state.lock().unwrap().fail_next = n;
    }

    /// Fail every `get_code` probe at exactly `block`.
    pub fn fail_code_at(&self, block: u64) {
        self.state.lock().unwrap().failing_code_probes.insert(block);
    }

    /// Number of calls made to `method` (`"get_code"`, `"get_block"`, …).
    pub fn calls(&self, method: &str) -> usize {
        self.state.lock().unwrap().calls.get(method).copied().unwrap_or(0)
    }

    /// Highest block number fetched through `get_block`, if any.
    pub fn highest_block_fetched(&self) -> Option<u64> {
        self.state.lock().unwrap().max_block_fetched
    }

    /// Count the call, apply injected failures and return the latency to wait.
    fn enter(&self, method: &'static str) -> Result<Option<Duration>, SyncError> {
        let mut state = self.state.lock().unwrap();
        *state.calls.entry(method).or_default() += 1;
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(SyncError::Rpc(format!("{method}: injected failure")));
        }
        Ok(state.latency)
    }

    async fn wait(latency: Option<Duration>) {
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

fn synthetic_block(number: u64) -> Block {
    Block {
        number,
        hash: format!("0x{number:064x}"),
        parent_hash: format!("0x{:064x}", number.saturating_sub(1)),
        timestamp: GENESIS_TIMESTAMP + number as i64 * 12,
        transactions: Vec::new(),
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn current_block_height(&self) -> Result<u64, SyncError> {
        let latency = self.enter("current_block_height")?;
        Self::wait(latency).await;
        Ok(self.state.lock().unwrap().tip)
    }

    async fn get_code(&self, address: &str, block: Option<u64>) -> Result<String, SyncError> {
        let latency = self.enter("get_code")?;
        Self::wait(latency).await;
        let state = self.state.lock().unwrap();
        let at = block.unwrap_or(state.tip);
        if state.failing_code_probes.contains(&at) {
            return Err(SyncError::Rpc(format!("get_code at {at}: injected failure")));
        }
        let deployed = state
            .deployments
            .get(&address.to_ascii_lowercase())
            .is_some_and(|from| at >= *from);
        Ok(if deployed { MOCK_CODE.to_string() } else { "0x".to_string() })
    }

    async fn get_block(
        &self,
        number: u64,
        include_transactions: bool,
    ) -> Result<Option<Block>, SyncError> {
        let latency = self.enter("get_block")?;
        Self::wait(latency).await;
        let mut state = self.state.lock().unwrap();
        if number > state.tip {
            return Ok(None);
        }
        state.max_block_fetched = Some(state.max_block_fetched.map_or(number, |m| m.max(number)));
        let mut block = state
            .blocks
            .get(&number)
            .cloned()
            .unwrap_or_else(|| synthetic_block(number));
        if !include_transactions {
            block.transactions.clear();
        }
        Ok(Some(block))
    }

    async fn query_logs(
        &self,
        address: &str,
        topic0: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<Log>, SyncError> {
        let latency = self.enter("query_logs")?;
        Self::wait(latency).await;
        let state = self.state.lock().unwrap();
        let mut logs: Vec<Log> = state
            .logs
            .iter()
            .filter(|l| l.address.eq_ignore_ascii_case(address))
            .filter(|l| l.topics.first().is_some_and(|t| t.eq_ignore_ascii_case(topic0)))
            .filter(|l| (from..=to).contains(&l.block_number))
            .cloned()
            .collect();
        logs.sort_by_key(|l| (l.block_number, l.log_index));
        Ok(logs)
    }

    async fn get_balance(&self, address: &str) -> Result<U256, SyncError> {
        let latency = self.enter("get_balance")?;
        Self::wait(latency).await;
        let state = self.state.lock().unwrap();
        Ok(state
            .balances
            .get(&address.to_ascii_lowercase())
            .copied()
            .unwrap_or(U256::ZERO))
    }

    async fn get_receipt(&self, hash: &str) -> Result<Option<Receipt>, SyncError> {
        let latency = self.enter("get_receipt")?;
        Self::wait(latency).await;
        Ok(self.state.lock().unwrap().receipts.get(hash).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn code_appears_at_deploy_height() {
        let chain = MockChain::new(1_000);
        chain.deploy("0xAA00000000000000000000000000000000000001", 400);
        let addr = "0xaa00000000000000000000000000000000000001";
        assert_eq!(chain.get_code(addr, Some(399)).await.unwrap(), "0x");
        assert_eq!(chain.get_code(addr, Some(400)).await.unwrap(), MOCK_CODE);
        assert_eq!(chain.get_code(addr, None).await.unwrap(), MOCK_CODE);
        assert_eq!(chain.calls("get_code"), 3);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let chain = MockChain::new(5);
        chain.fail_next(2);
        assert!(chain.current_block_height().await.is_err());
        assert!(chain.get_balance("0x01").await.is_err());
        assert_eq!(chain.current_block_height().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn blocks_beyond_tip_are_unknown() {
        let chain = MockChain::new(5);
        assert!(chain.get_block(6, true).await.unwrap().is_none());
        let block = chain.get_block(5, true).await.unwrap().unwrap();
        assert_eq!(block.timestamp, GENESIS_TIMESTAMP + 60);
        assert_eq!(chain.highest_block_fetched(), Some(5));
    }
}
