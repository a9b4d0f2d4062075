//! On-demand backfill of one address's transaction history.
//!
//! 1. Resolve the start block: explicit, else 0 for an EOA, else the
//!    contract's deployment block found by binary search over `eth_getCode`.
//! 2. Walk `[start, end]` in batches, fetching full blocks one at a time
//!    with a throttle between fetches.
//! 3. Keep transactions that touch the address and are not stored yet;
//!    upsert each and return as soon as `target_count` are collected.
//!
//! The window is clamped to `max_blocks_per_call` blocks, so one call has a
//! bounded RPC cost even for an EOA scanned from genesis.

use std::sync::Arc;

use alloy_primitives::U256;
use chrono::Utc;
use serde::Serialize;

use chainsync_core::config::BackfillConfig;
use chainsync_core::error::SyncError;
use chainsync_core::retry::RetryPolicy;
use chainsync_core::store::RelationalStore;
use chainsync_core::types::{
    is_empty_code, is_valid_address, AddressBalance, Block, TransactionRecord,
};
use chainsync_core::units::format_ether;
use chainsync_core::{ChainClient, TimeoutClient};

/// What kind of account an address is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressKind {
    Eoa,
    Contract,
}

/// Parameters of one backfill call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchRequest {
    pub address: String,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    /// Overrides the configured target count.
    pub target_count: Option<usize>,
    pub user_id: Option<String>,
}

impl FetchRequest {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn from_block(mut self, block: u64) -> Self {
        self.from_block = Some(block);
        self
    }

    pub fn to_block(mut self, block: u64) -> Self {
        self.to_block = Some(block);
        self
    }

    pub fn target_count(mut self, n: usize) -> Self {
        self.target_count = Some(n);
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Outcome of [`BackfillFetcher::fetch_transactions`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchReport {
    /// Newly stored transactions, in chain order.
    pub transactions: Vec<TransactionRecord>,
    pub start_block: u64,
    /// Last block of the (clamped) window.
    pub end_block: u64,
    /// Last block actually fetched; `None` if nothing was scanned.
    pub scanned_through: Option<u64>,
    /// Matching transactions that were already stored.
    pub skipped_existing: usize,
}

/// Returned by [`BackfillFetcher::get_balance`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceReport {
    pub address: String,
    /// Wei, decimal string.
    pub balance: String,
    pub block_number: u64,
    /// Ether, e.g. `"1.5"`.
    pub formatted_balance: String,
}

/// Walks an address's history into the relational store.
///
/// Holds no per-call state; concurrent calls are safe.
pub struct BackfillFetcher {
    client: Arc<dyn ChainClient>,
    store: Arc<dyn RelationalStore>,
    config: BackfillConfig,
    block_retry: RetryPolicy,
}

impl BackfillFetcher {
    /// Every client call is bounded by `config.call_timeout_ms`.
    pub fn new(
        client: Arc<dyn ChainClient>,
        store: Arc<dyn RelationalStore>,
        config: BackfillConfig,
    ) -> Self {
        let client: Arc<dyn ChainClient> = Arc::new(TimeoutClient::new(client, config.call_timeout()));
        Self {
            client,
            store,
            block_retry: RetryPolicy::new(config.block_retry.clone()),
            config,
        }
    }

    pub fn config(&self) -> &BackfillConfig {
        &self.config
    }

    pub async fn address_kind(&self, address: &str) -> Result<AddressKind, SyncError> {
        let code = self.client.get_code(address, None).await?;
        Ok(if is_empty_code(&code) {
            AddressKind::Eoa
        } else {
            AddressKind::Contract
        })
    }

    /// Earliest block at which `address` has code.
    ///
    /// Assumes code never disappears once deployed. A failed probe is
    /// treated as "maybe deployed here", which can only move the result
    /// earlier.
    pub async fn contract_creation_block(&self, address: &str) -> Result<u64, SyncError> {
        let tip = self.client.current_block_height().await?;
        let (mut low, mut high) = (0u64, tip);
        let mut creation = tip;

        while low <= high {
            let mid = low + (high - low) / 2;
            let has_code = match self.client.get_code(address, Some(mid)).await {
                Ok(code) => !is_empty_code(&code),
                Err(e) => {
                    tracing::warn!(address, block = mid, error = %e, "code probe failed, narrowing down");
                    true
                }
            };
            if has_code {
                creation = creation.min(mid);
                if mid == 0 {
                    break;
                }
                high = mid - 1;
            } else {
                low = mid + 1;
            }
        }

        tracing::debug!(address, creation, "contract creation block");
        Ok(creation)
    }

    /// `explicit` verbatim, else 0 for an EOA, else the creation block.
    pub async fn determine_start_block(
        &self,
        address: &str,
        explicit: Option<u64>,
    ) -> Result<u64, SyncError> {
        if let Some(block) = explicit {
            return Ok(block);
        }
        match self.address_kind(address).await? {
            AddressKind::Eoa => Ok(0),
            AddressKind::Contract => self.contract_creation_block(address).await,
        }
    }

    /// Collect up to `target_count` new transactions touching the address.
    pub async fn fetch_transactions(&self, req: &FetchRequest) -> Result<FetchReport, SyncError> {
        if !is_valid_address(&req.address) {
            return Err(SyncError::Configuration(format!("invalid address '{}'", req.address)));
        }
        if self.config.max_blocks_per_call == Some(0) {
            return Err(SyncError::Configuration("max_blocks_per_call must be at least 1".into()));
        }
        let address = req.address.to_ascii_lowercase();
        let target = req.target_count.unwrap_or(self.config.target_count);

        let start = self.determine_start_block(&address, req.from_block).await?;
        let requested_end = match req.to_block {
            Some(block) => block,
            None => self.client.current_block_height().await?,
        };
        let end = match self.config.max_blocks_per_call {
            Some(max) => requested_end.min(start.saturating_add(max - 1)),
            None => requested_end,
        };

        let mut report = FetchReport {
            transactions: Vec::new(),
            start_block: start,
            end_block: end,
            scanned_through: None,
            skipped_existing: 0,
        };
        if start > end || target == 0 {
            return Ok(report);
        }

        tracing::info!(%address, start, end, target, "backfill starting");
        let batch = self.config.batch_size.max(1);
        let mut batch_start = start;
        'scan: loop {
            let batch_end = batch_start.saturating_add(batch - 1).min(end);
            tracing::debug!(batch_start, batch_end, "backfill batch");

            for number in batch_start..=batch_end {
                if let Some(block) = self.fetch_block(number).await? {
                    self.collect(&block, &address, target, req.user_id.as_deref(), &mut report)
                        .await?;
                }
                report.scanned_through = Some(number);
                if report.transactions.len() >= target {
                    break 'scan;
                }
                if number < end && !self.config.throttle().is_zero() {
                    tokio::time::sleep(self.config.throttle()).await;
                }
            }

            if batch_end >= end {
                break;
            }
            batch_start = batch_end + 1;
        }

        tracing::info!(
            %address,
            stored = report.transactions.len(),
            skipped = report.skipped_existing,
            scanned_through = ?report.scanned_through,
            "backfill complete"
        );
        Ok(report)
    }

    async fn collect(
        &self,
        block: &Block,
        address: &str,
        target: usize,
        user_id: Option<&str>,
        report: &mut FetchReport,
    ) -> Result<(), SyncError> {
        for tx in block.transactions.iter().filter(|tx| tx.touches(address)) {
            if report.transactions.len() >= target {
                break;
            }
            if self.store.exists_transaction(&tx.hash).await? {
                tracing::debug!(hash = %tx.hash, "transaction already stored, skipping");
                report.skipped_existing += 1;
                continue;
            }
            let receipt = if self.config.fetch_receipts {
                self.client.get_receipt(&tx.hash).await?
            } else {
                None
            };
            let record = TransactionRecord::from_chain(tx, receipt.as_ref(), user_id);
            self.store.upsert_transaction(&record).await?;
            report.transactions.push(record);
        }
        Ok(())
    }

    async fn fetch_block(&self, number: u64) -> Result<Option<Block>, SyncError> {
        let mut failures = 0;
        loop {
            match self.client.get_block(number, true).await {
                Ok(block) => return Ok(block),
                Err(e) if e.is_retryable() => {
                    failures += 1;
                    match self.block_retry.next_delay(failures) {
                        Some(delay) => {
                            tracing::warn!(
                                block = number,
                                attempt = failures,
                                delay_ms = delay.as_millis() as u64,
                                error = %e,
                                "block fetch failed, retrying"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => return Err(e),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Current native balance plus the height it was read at.
    pub async fn get_balance(&self, address: &str) -> Result<BalanceReport, SyncError> {
        if !is_valid_address(address) {
            return Err(SyncError::Configuration(format!("invalid address '{address}'")));
        }
        let balance = self.client.get_balance(address).await?;
        let block_number = self.client.current_block_height().await?;
        Ok(BalanceReport {
            address: address.to_ascii_lowercase(),
            balance: balance.to_string(),
            block_number,
            formatted_balance: format_ether(balance),
        })
    }

    /// Replace the snapshot for `(user_id, address)`.
    pub async fn store_balance(
        &self,
        address: &str,
        balance: U256,
        block_number: u64,
        user_id: Option<&str>,
    ) -> Result<AddressBalance, SyncError> {
        let row = AddressBalance {
            user_id: user_id.map(str::to_string),
            address: address.to_ascii_lowercase(),
            balance: balance.to_string(),
            block_number,
            last_updated: Utc::now(),
        };
        self.store.upsert_balance(&row).await?;
        Ok(row)
    }

    /// [`get_balance`](Self::get_balance) followed by [`store_balance`](Self::store_balance).
    pub async fn refresh_balance(
        &self,
        address: &str,
        user_id: Option<&str>,
    ) -> Result<BalanceReport, SyncError> {
        let report = self.get_balance(address).await?;
        let wei = U256::from_str_radix(&report.balance, 10)
            .map_err(|e| SyncError::Other(format!("balance '{}': {e}", report.balance)))?;
        self.store_balance(address, wei, report.block_number, user_id).await?;
        Ok(report)
    }
}
