//! The `ChainClient` trait: everything the engines need from a node.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::U256;
use async_trait::async_trait;

use crate::error::SyncError;
use crate::types::{Block, Log, Receipt};

/// Read access to an EVM chain.
///
/// Every call may fail with a transient [`SyncError::Rpc`]. The trait is
/// object-safe and is normally held as `Arc<dyn ChainClient>`.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current chain tip.
    async fn current_block_height(&self) -> Result<u64, SyncError>;

    /// Deployed bytecode (`0x…`) at `block`, or at the tip when `None`.
    async fn get_code(&self, address: &str, block: Option<u64>) -> Result<String, SyncError>;

    /// Block by number; `None` if the node does not know it yet.
    async fn get_block(
        &self,
        number: u64,
        include_transactions: bool,
    ) -> Result<Option<Block>, SyncError>;

    /// Logs emitted by `address` with `topic0` in `[from, to]`.
    async fn query_logs(
        &self,
        address: &str,
        topic0: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<Log>, SyncError>;

    /// Native balance in wei at the tip.
    async fn get_balance(&self, address: &str) -> Result<U256, SyncError>;

    /// Receipt of a mined transaction.
    async fn get_receipt(&self, _hash: &str) -> Result<Option<Receipt>, SyncError> {
        Ok(None)
    }
}

/// Bounds every call of the wrapped client with a fixed timeout.
///
/// An elapsed call becomes [`SyncError::Timeout`], which callers treat like
/// any other transient failure.
#[derive(Clone)]
pub struct TimeoutClient {
    inner: Arc<dyn ChainClient>,
    timeout: Duration,
}

impl TimeoutClient {
    pub fn new(inner: Arc<dyn ChainClient>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, SyncError>> + Send,
    ) -> Result<T, SyncError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout {
                ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

#[async_trait]
impl ChainClient for TimeoutClient {
    async fn current_block_height(&self) -> Result<u64, SyncError> {
        self.bounded(self.inner.current_block_height()).await
    }

    async fn get_code(&self, address: &str, block: Option<u64>) -> Result<String, SyncError> {
        self.bounded(self.inner.get_code(address, block)).await
    }

    async fn get_block(
        &self,
        number: u64,
        include_transactions: bool,
    ) -> Result<Option<Block>, SyncError> {
        self.bounded(self.inner.get_block(number, include_transactions))
            .await
    }

    async fn query_logs(
        &self,
        address: &str,
        topic0: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<Log>, SyncError> {
        self.bounded(self.inner.query_logs(address, topic0, from, to))
            .await
    }

    async fn get_balance(&self, address: &str) -> Result<U256, SyncError> {
        self.bounded(self.inner.get_balance(address)).await
    }

    async fn get_receipt(&self, hash: &str) -> Result<Option<Receipt>, SyncError> {
        self.bounded(self.inner.get_receipt(hash)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockChain;

    #[tokio::test(start_paused = true)]
    async fn slow_call_times_out() {
        let chain = Arc::new(MockChain::new(10));
        chain.set_latency(Duration::from_secs(60));
        let client = TimeoutClient::new(chain, Duration::from_secs(1));

        let err = client.current_block_height().await.unwrap_err();
        assert!(matches!(err, SyncError::Timeout { ms: 1000 }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn fast_call_passes_through() {
        let chain = Arc::new(MockChain::new(42));
        let client = TimeoutClient::new(chain, Duration::from_secs(1));
        assert_eq!(client.current_block_height().await.unwrap(), 42);
    }
}
