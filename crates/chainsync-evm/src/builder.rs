//! Fluent builder API for creating event indexers.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chainsync_core::MockChain;
//! use chainsync_evm::IndexerBuilder;
//! # fn stores() -> (Arc<dyn chainsync_core::RelationalStore>, Arc<dyn chainsync_core::CursorStore>) { unimplemented!() }
//!
//! let (events, cursors) = stores();
//! let indexer = IndexerBuilder::new()
//!     .chunk_size(500)
//!     .poll_interval_ms(12_000)
//!     .max_retries(8)
//!     .build(Arc::new(MockChain::new(0)), events, cursors);
//! ```

use std::sync::Arc;

use chainsync_core::config::IndexerConfig;
use chainsync_core::cursor::CursorStore;
use chainsync_core::retry::RetryConfig;
use chainsync_core::store::RelationalStore;
use chainsync_core::ChainClient;

use crate::indexer::EventIndexer;

/// Fluent builder for [`IndexerConfig`] and [`EventIndexer`].
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn from_config(config: IndexerConfig) -> Self {
        Self { config }
    }

    /// Set the number of blocks per `eth_getLogs` range.
    pub fn chunk_size(mut self, blocks: u64) -> Self {
        self.config.chunk_size = blocks;
        self
    }

    /// Set the delay between healthy poll iterations in milliseconds.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// Set the number of consecutive failed iterations that stop the indexer.
    pub fn max_retries(mut self, attempts: u32) -> Self {
        self.config.retry.max_attempts = attempts;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set the time budget for each chain client call in milliseconds.
    pub fn call_timeout_ms(mut self, ms: u64) -> Self {
        self.config.call_timeout_ms = ms;
        self
    }

    /// Set the start block used when `start` is called without one.
    pub fn default_start_block(mut self, block: u64) -> Self {
        self.config.default_start_block = block;
        self
    }

    pub fn build_config(self) -> IndexerConfig {
        self.config
    }

    pub fn build(
        self,
        client: Arc<dyn ChainClient>,
        events: Arc<dyn RelationalStore>,
        cursors: Arc<dyn CursorStore>,
    ) -> EventIndexer {
        EventIndexer::new(client, events, cursors, self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let cfg = IndexerBuilder::new().build_config();
        assert_eq!(cfg.chunk_size, 2_000);
        assert_eq!(cfg.poll_interval_ms, 5_000);
        assert_eq!(cfg.retry.max_attempts, 5);
    }

    #[test]
    fn builder_custom() {
        let cfg = IndexerBuilder::new()
            .chunk_size(10)
            .poll_interval_ms(1_000)
            .max_retries(2)
            .call_timeout_ms(500)
            .default_start_block(19_000_000)
            .build_config();

        assert_eq!(cfg.chunk_size, 10);
        assert_eq!(cfg.poll_interval_ms, 1_000);
        assert_eq!(cfg.retry.max_attempts, 2);
        assert_eq!(cfg.call_timeout_ms, 500);
        assert_eq!(cfg.default_start_block, 19_000_000);
    }
}
