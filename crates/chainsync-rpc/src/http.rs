//! HTTP JSON-RPC chain client backed by `reqwest`.
//!
//! Transport failures (connection errors, HTTP 429/5xx) are retried a few
//! times with exponential backoff before surfacing as [`SyncError::Rpc`].
//! JSON-RPC error objects are returned immediately.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::U256;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use chainsync_core::error::SyncError;
use chainsync_core::retry::{RetryConfig, RetryPolicy};
use chainsync_core::types::{Block, Log, Receipt, Transaction};
use chainsync_core::ChainClient;

use crate::request::{JsonRpcRequest, JsonRpcResponse};

/// Configuration for [`HttpChainClient`].
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Transport-level retry; separate from the engines' own retry policy.
    pub retry: RetryConfig,
    pub request_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig {
                max_attempts: 3,
                base_delay_ms: 250,
                multiplier: 2.0,
                max_delay_ms: 2_000,
            },
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// [`ChainClient`] over HTTP JSON-RPC.
pub struct HttpChainClient {
    url: String,
    http: reqwest::Client,
    retry: RetryPolicy,
    request_timeout: Duration,
    next_id: AtomicU64,
}

enum SendError {
    Retryable(SyncError),
    Fatal(SyncError),
}

impl HttpChainClient {
    pub fn new(url: impl Into<String>, config: HttpClientConfig) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SyncError::Configuration(format!("http client: {e}")))?;

        Ok(Self {
            url: url.into(),
            http,
            retry: RetryPolicy::new(config.retry),
            request_timeout: config.request_timeout,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn default_for(url: impl Into<String>) -> Result<Self, SyncError> {
        Self::new(url, HttpClientConfig::default())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Issue one JSON-RPC call and return its `result`.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, SyncError> {
        let req = JsonRpcRequest::new(self.next_id.fetch_add(1, Ordering::Relaxed), method, params);

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.send_once(&req).await {
                Ok(resp) => {
                    return resp
                        .into_result()
                        .map_err(|e| SyncError::Rpc(format!("{method}: {e}")));
                }
                Err(SendError::Retryable(e)) => match self.retry.next_delay(attempt) {
                    Some(delay) => {
                        tracing::warn!(
                            method,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            url = %self.url,
                            "retrying request"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::error!(method, attempt, error = %e, url = %self.url, "max retries exceeded");
                        return Err(e);
                    }
                },
                Err(SendError::Fatal(e)) => return Err(e),
            }
        }
    }

    async fn send_once(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, SendError> {
        let resp = self.http.post(&self.url).json(req).send().await.map_err(|e| {
            if e.is_timeout() {
                SendError::Retryable(SyncError::Timeout {
                    ms: self.request_timeout.as_millis() as u64,
                })
            } else {
                SendError::Retryable(SyncError::Rpc(format!("{}: {e}", req.method)))
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let err = SyncError::Rpc(format!("{}: HTTP {}: {body}", req.method, status.as_u16()));
            return if status.as_u16() == 429 || status.is_server_error() {
                Err(SendError::Retryable(err))
            } else {
                Err(SendError::Fatal(err))
            };
        }

        resp.json::<JsonRpcResponse>()
            .await
            .map_err(|e| SendError::Fatal(SyncError::Rpc(format!("{}: invalid response: {e}", req.method))))
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn current_block_height(&self) -> Result<u64, SyncError> {
        let v = self.call("eth_blockNumber", vec![]).await?;
        parse_quantity(&v)
    }

    async fn get_code(&self, address: &str, block: Option<u64>) -> Result<String, SyncError> {
        let v = self
            .call("eth_getCode", vec![json!(address), block_tag(block)])
            .await?;
        v.as_str()
            .map(str::to_string)
            .ok_or_else(|| malformed("eth_getCode", &v))
    }

    async fn get_block(
        &self,
        number: u64,
        include_transactions: bool,
    ) -> Result<Option<Block>, SyncError> {
        let v = self
            .call(
                "eth_getBlockByNumber",
                vec![json!(to_hex(number)), json!(include_transactions)],
            )
            .await?;
        if v.is_null() {
            return Ok(None);
        }
        block_from_json(&v).map(Some)
    }

    async fn query_logs(
        &self,
        address: &str,
        topic0: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<Log>, SyncError> {
        let filter = json!({
            "address": address,
            "topics": [topic0],
            "fromBlock": to_hex(from),
            "toBlock": to_hex(to),
        });
        let v = self.call("eth_getLogs", vec![filter]).await?;
        let raw: Vec<RawLog> =
            serde_json::from_value(v).map_err(|e| SyncError::Rpc(format!("eth_getLogs: {e}")))?;
        raw.into_iter().map(RawLog::into_log).collect()
    }

    async fn get_balance(&self, address: &str) -> Result<U256, SyncError> {
        let v = self
            .call("eth_getBalance", vec![json!(address), json!("latest")])
            .await?;
        parse_u256(&v)
    }

    async fn get_receipt(&self, hash: &str) -> Result<Option<Receipt>, SyncError> {
        let v = self
            .call("eth_getTransactionReceipt", vec![json!(hash)])
            .await?;
        if v.is_null() {
            return Ok(None);
        }
        Ok(Some(Receipt {
            gas_used: parse_u256(&v["gasUsed"])?,
            status: v["status"]
                .as_str()
                .map(|s| parse_hex_u64(s).map(|n| n as i32))
                .transpose()?,
        }))
    }
}

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: String,
    pub block_hash: String,
    pub transaction_hash: String,
    pub log_index: String,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RawLog {
    pub fn into_log(self) -> Result<Log, SyncError> {
        Ok(Log {
            block_number: parse_hex_u64(&self.block_number)?,
            log_index: parse_hex_u64(&self.log_index)?,
            removed: self.removed.unwrap_or(false),
            address: self.address,
            topics: self.topics,
            data: self.data,
            block_hash: self.block_hash,
            transaction_hash: self.transaction_hash,
        })
    }
}

fn to_hex(n: u64) -> String {
    format!("0x{n:x}")
}

fn block_tag(block: Option<u64>) -> Value {
    match block {
        Some(n) => json!(to_hex(n)),
        None => json!("latest"),
    }
}

fn malformed(method: &str, v: &Value) -> SyncError {
    SyncError::Rpc(format!("{method}: unexpected result {v}"))
}

/// Parse a hex quantity (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> Result<u64, SyncError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16).map_err(|e| SyncError::Rpc(format!("invalid quantity '{s}': {e}")))
}

fn parse_quantity(v: &Value) -> Result<u64, SyncError> {
    v.as_str()
        .ok_or_else(|| malformed("quantity", v))
        .and_then(parse_hex_u64)
}

fn parse_u256(v: &Value) -> Result<U256, SyncError> {
    let s = v.as_str().ok_or_else(|| malformed("quantity", v))?;
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 16).map_err(|e| SyncError::Rpc(format!("invalid quantity '{s}': {e}")))
}

fn str_field(v: &Value, key: &str) -> Result<String, SyncError> {
    v[key]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| SyncError::Rpc(format!("missing field '{key}'")))
}

/// Convert an `eth_getBlockByNumber` result into a [`Block`].
///
/// When the block was fetched without transactions the `transactions`
/// array holds hashes only and is dropped. A malformed transaction is
/// logged and left out; a malformed header fails the whole block.
pub fn block_from_json(v: &Value) -> Result<Block, SyncError> {
    let number = parse_quantity(&v["number"])?;
    let transactions = v["transactions"]
        .as_array()
        .map(|txs| {
            txs.iter()
                .filter(|tx| tx.is_object())
                .filter_map(|tx| match transaction_from_json(tx) {
                    Ok(tx) => Some(tx),
                    Err(e) => {
                        tracing::warn!(
                            block = number,
                            hash = tx["hash"].as_str().unwrap_or("<none>"),
                            error = %e,
                            "skipping malformed transaction"
                        );
                        None
                    }
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    Ok(Block {
        number,
        hash: str_field(v, "hash")?,
        parent_hash: str_field(v, "parentHash")?,
        timestamp: parse_quantity(&v["timestamp"])? as i64,
        transactions,
    })
}

/// Convert one full transaction object. Field errors are [`SyncError::Decode`].
pub fn transaction_from_json(v: &Value) -> Result<Transaction, SyncError> {
    parse_transaction(v).map_err(|e| match e {
        SyncError::Rpc(msg) => SyncError::Decode(format!("transaction: {msg}")),
        other => other,
    })
}

fn parse_transaction(v: &Value) -> Result<Transaction, SyncError> {
    Ok(Transaction {
        hash: str_field(v, "hash")?,
        from: str_field(v, "from")?,
        to: v["to"].as_str().map(str::to_string),
        value: parse_u256(&v["value"])?,
        gas_price: match &v["gasPrice"] {
            Value::Null => None,
            p => Some(parse_u256(p)?),
        },
        nonce: parse_quantity(&v["nonce"])?,
        input: v["input"].as_str().unwrap_or("0x").to_string(),
        block_number: parse_quantity(&v["blockNumber"])?,
        block_hash: str_field(v, "blockHash")?,
        transaction_index: parse_quantity(&v["transactionIndex"])? as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hex_quantities() {
        assert_eq!(parse_hex_u64("0x1").unwrap(), 1);
        assert_eq!(parse_hex_u64("0xff").unwrap(), 255);
        assert_eq!(parse_hex_u64("0x").unwrap(), 0);
        assert!(parse_hex_u64("0xzz").is_err());
        assert_eq!(
            parse_u256(&json!("0xde0b6b3a7640000")).unwrap(),
            U256::from(1_000_000_000_000_000_000u128)
        );
    }

    #[test]
    fn raw_log_conversion() {
        let raw: RawLog = serde_json::from_value(json!({
            "address": "0x7b79995e5f793a07bc00c21412e50ecae098e7f9",
            "topics": ["0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"],
            "data": "0x",
            "blockNumber": "0x12a05f200",
            "blockHash": "0xbb",
            "transactionHash": "0xabc",
            "logIndex": "0x2",
            "transactionIndex": "0x0"
        }))
        .unwrap();
        let log = raw.into_log().unwrap();
        assert_eq!(log.block_number, 5_000_000_000);
        assert_eq!(log.log_index, 2);
        assert!(!log.removed);
    }

    #[test]
    fn block_with_transactions() {
        let block = block_from_json(&json!({
            "number": "0x68",
            "hash": "0xb104",
            "parentHash": "0xb103",
            "timestamp": "0x65537f00",
            "transactions": [{
                "hash": "0x01",
                "from": "0xaa",
                "to": null,
                "value": "0x0",
                "nonce": "0x3",
                "input": "0x6080",
                "blockNumber": "0x68",
                "blockHash": "0xb104",
                "transactionIndex": "0x0"
            }]
        }))
        .unwrap();
        assert_eq!(block.number, 104);
        assert_eq!(block.timestamp, 0x6553_7f00);
        assert_eq!(block.transactions.len(), 1);
        assert_eq!(block.transactions[0].to, None);
        assert_eq!(block.transactions[0].gas_price, None);
    }

    #[test]
    fn malformed_transaction_is_dropped_not_the_block() {
        let good = json!({
            "hash": "0x01",
            "from": "0xaa",
            "to": "0xbb",
            "value": "0x3e8",
            "nonce": "0x0",
            "blockNumber": "0x68",
            "blockHash": "0xb104",
            "transactionIndex": "0x0"
        });
        let mut bad = good.clone();
        bad["hash"] = json!("0x02");
        bad["transactionIndex"] = json!("0x1");
        bad.as_object_mut().unwrap().remove("from");

        let block = block_from_json(&json!({
            "number": "0x68",
            "hash": "0xb104",
            "parentHash": "0xb103",
            "timestamp": "0x65537f00",
            "transactions": [good, bad.clone()]
        }))
        .unwrap();
        assert_eq!(block.transactions.len(), 1);
        assert_eq!(block.transactions[0].hash, "0x01");
        assert_eq!(block.transactions[0].value, U256::from(1_000u64));

        let err = transaction_from_json(&bad).unwrap_err();
        assert!(matches!(err, SyncError::Decode(_)), "{err:?}");
        assert!(!err.is_retryable());
    }

    #[test]
    fn malformed_header_fails_the_block() {
        let err = block_from_json(&json!({
            "number": "0x68",
            "parentHash": "0xb103",
            "timestamp": "0x0",
            "transactions": []
        }))
        .unwrap_err();
        assert!(matches!(err, SyncError::Rpc(_)));
    }

    #[test]
    fn block_with_hashes_only() {
        let block = block_from_json(&json!({
            "number": "0x1",
            "hash": "0xb1",
            "parentHash": "0xb0",
            "timestamp": "0x0",
            "transactions": ["0x01", "0x02"]
        }))
        .unwrap();
        assert!(block.transactions.is_empty());
    }

    #[test]
    fn new_client() {
        let client = HttpChainClient::default_for("http://127.0.0.1:8545").unwrap();
        assert_eq!(client.url(), "http://127.0.0.1:8545");
    }
}
