//! Relational storage capabilities: the write side used by the engines and
//! the read side used by operators.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::types::{AddressBalance, EventRecord, TransactionRecord};

/// Idempotent writes keyed by immutable chain identity.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Insert on first sight of `(transaction_hash, log_index)`; afterwards
    /// refresh block number, timestamp, raw args, sender, recipient and value.
    async fn upsert_event(&self, event: &EventRecord) -> Result<(), SyncError>;

    async fn exists_transaction(&self, hash: &str) -> Result<bool, SyncError>;

    /// Insert on first sight of `hash`; afterwards refresh only gas used and status.
    async fn upsert_transaction(&self, tx: &TransactionRecord) -> Result<(), SyncError>;

    /// Replace the snapshot for `(user_id, address)`.
    async fn upsert_balance(&self, balance: &AddressBalance) -> Result<(), SyncError>;
}

/// Filters for [`RecordQueries::find_events`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventQuery {
    pub contract_address: Option<String>,
    pub event_name: Option<String>,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    pub sender_address: Option<String>,
    pub recipient_address: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl EventQuery {
    pub fn contract(address: impl Into<String>) -> Self {
        Self {
            contract_address: Some(address.into()),
            ..Self::default()
        }
    }

    pub fn blocks(mut self, from: Option<u64>, to: Option<u64>) -> Self {
        self.from_block = from;
        self.to_block = to;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns `true` if `event` satisfies every filter (pagination aside).
    pub fn matches(&self, event: &EventRecord) -> bool {
        fn eq(filter: &Option<String>, value: Option<&str>) -> bool {
            filter
                .as_deref()
                .map_or(true, |f| value.is_some_and(|v| v.eq_ignore_ascii_case(f)))
        }
        eq(&self.contract_address, Some(&event.contract_address))
            && eq(&self.event_name, Some(&event.event_name))
            && eq(&self.sender_address, event.sender_address.as_deref())
            && eq(&self.recipient_address, event.recipient_address.as_deref())
            && self.from_block.map_or(true, |b| event.block_number >= b)
            && self.to_block.map_or(true, |b| event.block_number <= b)
    }
}

/// Bucket width for volume aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Hourly,
    Daily,
    Monthly,
}

impl Interval {
    /// Start of the bucket containing unix timestamp `ts` (UTC).
    pub fn bucket_start(&self, ts: i64) -> DateTime<Utc> {
        let at = Utc.timestamp_opt(ts, 0).single().unwrap_or_default();
        let start = match self {
            Self::Hourly => ts - ts.rem_euclid(3_600),
            Self::Daily => ts - ts.rem_euclid(86_400),
            Self::Monthly => Utc
                .with_ymd_and_hms(at.year(), at.month(), 1, 0, 0, 0)
                .single()
                .map_or(ts, |d| d.timestamp()),
        };
        Utc.timestamp_opt(start, 0).single().unwrap_or(at)
    }

    /// Postgres `DATE_TRUNC` unit.
    pub fn trunc_unit(&self) -> &'static str {
        match self {
            Self::Hourly => "hour",
            Self::Daily => "day",
            Self::Monthly => "month",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Monthly => "monthly",
        })
    }
}

impl FromStr for Interval {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "monthly" => Ok(Self::Monthly),
            other => Err(SyncError::Configuration(format!(
                "invalid interval '{other}' (supported: hourly, daily, monthly)"
            ))),
        }
    }
}

/// One aggregation bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeBucket {
    pub interval_start: DateTime<Utc>,
    pub total_events: u64,
    /// Sum of event values in wei, decimal string.
    pub total_value_wei: String,
}

/// One page of results plus pagination metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, page: u32, limit: u32, total: u64) -> Self {
        let pages = if limit == 0 { 0 } else { total.div_ceil(u64::from(limit)) };
        Self { items, page, limit, total, pages }
    }
}

/// Normalise 1-based `page`/`limit` into an `(offset, limit)` pair.
pub fn page_window(page: u32, limit: u32) -> (u64, u32) {
    let page = page.max(1);
    let limit = limit.max(1);
    (u64::from(page - 1) * u64::from(limit), limit)
}

/// Read side over the materialised rows.
#[async_trait]
pub trait RecordQueries: Send + Sync {
    /// Events matching `query`, newest block first.
    async fn find_events(&self, query: &EventQuery) -> Result<Vec<EventRecord>, SyncError>;

    /// Event count and summed value per time bucket, oldest bucket first.
    async fn aggregate_volume(
        &self,
        contract_address: &str,
        interval: Interval,
        from_ts: Option<i64>,
        to_ts: Option<i64>,
    ) -> Result<Vec<VolumeBucket>, SyncError>;

    /// Transactions stored for `user_id`, newest first.
    async fn user_transactions(
        &self,
        user_id: &str,
        page: u32,
        limit: u32,
    ) -> Result<Page<TransactionRecord>, SyncError>;

    /// Balance snapshots for `user_id`, most recently updated first.
    async fn user_balances(&self, user_id: &str) -> Result<Vec<AddressBalance>, SyncError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(block: u64, sender: &str) -> EventRecord {
        EventRecord {
            contract_address: "0xAAAA".into(),
            event_name: "Transfer".into(),
            block_number: block,
            transaction_hash: "0x01".into(),
            log_index: 0,
            block_hash: "0xb".into(),
            timestamp: 0,
            sender_address: Some(sender.into()),
            recipient_address: None,
            value: Some("1".into()),
            raw_args: json!({}),
        }
    }

    #[test]
    fn query_filters() {
        let q = EventQuery::contract("0xaaaa").blocks(Some(10), Some(20));
        assert!(q.matches(&event(10, "0x1")));
        assert!(q.matches(&event(20, "0x1")));
        assert!(!q.matches(&event(21, "0x1")));

        let q = EventQuery {
            recipient_address: Some("0x2".into()),
            ..EventQuery::default()
        };
        assert!(!q.matches(&event(1, "0x1")));
    }

    #[test]
    fn buckets() {
        // 2024-03-15T13:45:10Z
        let ts = 1_710_510_310;
        assert_eq!(Interval::Hourly.bucket_start(ts).to_rfc3339(), "2024-03-15T13:00:00+00:00");
        assert_eq!(Interval::Daily.bucket_start(ts).to_rfc3339(), "2024-03-15T00:00:00+00:00");
        assert_eq!(Interval::Monthly.bucket_start(ts).to_rfc3339(), "2024-03-01T00:00:00+00:00");
    }

    #[test]
    fn interval_parsing() {
        assert_eq!("Daily".parse::<Interval>().unwrap(), Interval::Daily);
        assert!("weekly".parse::<Interval>().unwrap_err().is_configuration());
    }

    #[test]
    fn pagination() {
        let page: Page<u8> = Page::new(vec![], 2, 10, 25);
        assert_eq!(page.pages, 3);
        assert_eq!(page_window(0, 0), (0, 1));
        assert_eq!(page_window(3, 10), (20, 10));
    }
}
