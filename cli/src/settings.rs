//! Command-line flags, then environment variables, then defaults.

use anyhow::{anyhow, bail, Context, Result};
use chainsync_core::IndexerConfig;
use chainsync_evm::IndexerBuilder;

use crate::logging::LogConfig;

pub const DEFAULT_EVENT: &str = "Transfer(address indexed from, address indexed to, uint256 value)";

/// Raw command-line arguments after the subcommand.
pub struct Args<'a> {
    args: &'a [String],
}

impl<'a> Args<'a> {
    pub fn new(args: &'a [String]) -> Self {
        Self { args }
    }

    pub fn flag(&self, name: &str) -> Option<String> {
        let pos = self.args.iter().position(|a| a == name)?;
        self.args.get(pos + 1).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.args.iter().any(|a| a == name)
    }

    pub fn required(&self, name: &str) -> Result<String> {
        self.flag(name).ok_or_else(|| anyhow!("{name} is required"))
    }

    pub fn number<T>(&self, name: &str) -> Result<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        self.flag(name)
            .map(|v| v.parse().with_context(|| format!("{name} '{v}'")))
            .transpose()
    }
}

/// Settings shared by every command.
#[derive(Debug, Clone)]
pub struct Settings {
    pub rpc_url: Option<String>,
    /// `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub contract_address: Option<String>,
    pub event_signature: String,
    pub start_block: Option<u64>,
    pub indexer: IndexerConfig,
    pub log: LogConfig,
}

impl Settings {
    pub fn from_env(args: &Args<'_>) -> Result<Self> {
        Self::resolve(args, |key| std::env::var(key).ok())
    }

    pub fn resolve(args: &Args<'_>, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let pick = |flag: &str, key: &str| args.flag(flag).or_else(|| env(key)).filter(|v| !v.is_empty());
        let pick_u64 = |flag: &str, key: &str| -> Result<Option<u64>> {
            pick(flag, key)
                .map(|v| v.parse::<u64>().with_context(|| format!("{flag} / {key} '{v}'")))
                .transpose()
        };

        let mut builder = IndexerBuilder::new();
        if let Some(chunk) = pick_u64("--chunk-size", "CHUNK_SIZE")? {
            if chunk == 0 {
                bail!("chunk size must be at least 1");
            }
            builder = builder.chunk_size(chunk);
        }
        if let Some(ms) = pick_u64("--poll-interval-ms", "POLL_INTERVAL_MS")? {
            builder = builder.poll_interval_ms(ms);
        }

        let log = LogConfig {
            level: pick("--log-level", "LOG_LEVEL").unwrap_or_else(|| "info".into()),
            json: args.has("--log-json")
                || env("LOG_JSON").is_some_and(|v| matches!(v.as_str(), "1" | "true" | "yes")),
            ..LogConfig::default()
        };

        Ok(Self {
            rpc_url: pick("--rpc-url", "ETHEREUM_RPC_URL"),
            database_url: pick("--database-url", "DATABASE_URL"),
            contract_address: pick("--contract", "CONTRACT_ADDRESS"),
            event_signature: pick("--event", "EVENT_SIGNATURE").unwrap_or_else(|| DEFAULT_EVENT.into()),
            start_block: pick_u64("--start-block", "START_BLOCK")?,
            indexer: builder.build_config(),
            log,
        })
    }

    pub fn rpc_url(&self) -> Result<&str> {
        self.rpc_url
            .as_deref()
            .ok_or_else(|| anyhow!("an RPC endpoint is required (--rpc-url or ETHEREUM_RPC_URL)"))
    }

    pub fn contract_address(&self) -> Result<&str> {
        self.contract_address
            .as_deref()
            .ok_or_else(|| anyhow!("a contract is required (--contract or CONTRACT_ADDRESS)"))
    }
}
