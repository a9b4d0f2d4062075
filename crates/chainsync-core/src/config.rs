//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryConfig;

/// Configuration for the event indexer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Blocks per `eth_getLogs` range. Trades round-trips against response size.
    pub chunk_size: u64,
    /// Delay between poll iterations while healthy (milliseconds).
    pub poll_interval_ms: u64,
    /// Backoff and ceiling for failed iterations.
    pub retry: RetryConfig,
    /// Time budget for each chain client call (milliseconds).
    pub call_timeout_ms: u64,
    /// First block to index when `start` is called without one.
    pub default_start_block: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 2_000,
            poll_interval_ms: 5_000,
            retry: RetryConfig::default(),
            call_timeout_ms: 30_000,
            default_start_block: 0,
        }
    }
}

impl IndexerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Configuration for the backfill fetcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackfillConfig {
    /// Blocks per outer batch.
    pub batch_size: u64,
    /// New transactions to collect before returning early.
    pub target_count: usize,
    /// Pause between consecutive block fetches (milliseconds).
    pub throttle_ms: u64,
    /// Upper bound on blocks scanned by one call; `None` scans the whole window.
    pub max_blocks_per_call: Option<u64>,
    /// Retries for a single block fetch.
    pub block_retry: RetryConfig,
    /// Fetch receipts so `gas_used` and `status` are populated.
    pub fetch_receipts: bool,
    /// Time budget for each chain client call (milliseconds).
    pub call_timeout_ms: u64,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            target_count: 5,
            throttle_ms: 300,
            max_blocks_per_call: Some(10_000),
            block_retry: RetryConfig {
                max_attempts: 3,
                base_delay_ms: 500,
                multiplier: 2.0,
                max_delay_ms: 5_000,
            },
            fetch_receipts: false,
            call_timeout_ms: 30_000,
        }
    }
}

impl BackfillConfig {
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}
