//! Error types shared by the indexer and the backfill fetcher.

use thiserror::Error;

/// Errors that can occur while syncing chain data.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Bad input or a contract that is not deployed. Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Network or node-side failure.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// A chain client call exceeded its time budget.
    #[error("RPC call timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// A single log or transaction could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A store read or write failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("{0}")]
    Other(String),
}

impl SyncError {
    /// Returns `true` for network failures and timeouts.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rpc(_) | Self::Timeout { .. })
    }

    /// Returns `true` if a later attempt at the same work may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Configuration(_) | Self::Decode(_))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Prefix the message with `context`, keeping the variant.
    pub fn context(self, context: impl std::fmt::Display) -> Self {
        match self {
            Self::Configuration(m) => Self::Configuration(format!("{context}: {m}")),
            Self::Rpc(m) => Self::Rpc(format!("{context}: {m}")),
            Self::Decode(m) => Self::Decode(format!("{context}: {m}")),
            Self::Persistence(m) => Self::Persistence(format!("{context}: {m}")),
            Self::Other(m) => Self::Other(format!("{context}: {m}")),
            timeout @ Self::Timeout { .. } => timeout,
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(SyncError::Rpc("connection reset".into()).is_transient());
        assert!(SyncError::Timeout { ms: 30_000 }.is_transient());
        assert!(!SyncError::Persistence("disk full".into()).is_transient());
        assert!(SyncError::Persistence("disk full".into()).is_retryable());
        assert!(!SyncError::Configuration("bad address".into()).is_retryable());
        assert!(!SyncError::Decode("short data".into()).is_retryable());
    }

    #[test]
    fn context_keeps_variant() {
        let e = SyncError::Rpc("connection reset".into()).context("eth_getCode");
        assert!(e.is_transient());
        assert_eq!(e.to_string(), "RPC error: eth_getCode: connection reset");
        let t = SyncError::Timeout { ms: 10 }.context("eth_getCode");
        assert!(matches!(t, SyncError::Timeout { ms: 10 }));
    }
}
