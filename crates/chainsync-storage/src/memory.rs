//! In-memory storage backend.
//!
//! Holds the cursor and all rows in RAM. Used by tests and by the CLI when
//! no database URL is configured. All data is lost when the process exits.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use alloy_primitives::U256;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use chainsync_core::cursor::{Cursor, CursorStore};
use chainsync_core::error::SyncError;
use chainsync_core::store::{
    page_window, EventQuery, Interval, Page, RecordQueries, RelationalStore, VolumeBucket,
};
use chainsync_core::types::{AddressBalance, EventRecord, TransactionRecord};

/// Write counters, for asserting idempotency in tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub events_inserted: usize,
    pub events_updated: usize,
    pub transactions_inserted: usize,
    pub transactions_updated: usize,
    pub cursor_writes: usize,
}

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    cursor: Mutex<Option<Cursor>>,
    events: Mutex<HashMap<(String, u64), EventRecord>>,
    transactions: Mutex<HashMap<String, TransactionRecord>>,
    balances: Mutex<HashMap<(Option<String>, String), AddressBalance>>,
    stats: Mutex<WriteStats>,
    failing_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with a persistence error.
    pub fn set_failing_writes(&self, failing: bool) {
        self.failing_writes.store(failing, Ordering::SeqCst);
    }

    /// Snapshot of the stored cursor.
    pub fn cursor(&self) -> Option<Cursor> {
        self.cursor.lock().unwrap().clone()
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.lock().unwrap().len()
    }

    /// All events, ordered by block number then log index.
    pub fn events(&self) -> Vec<EventRecord> {
        let mut events: Vec<EventRecord> = self.events.lock().unwrap().values().cloned().collect();
        events.sort_by_key(|e| (e.block_number, e.log_index));
        events
    }

    pub fn event(&self, tx_hash: &str, log_index: u64) -> Option<EventRecord> {
        self.events
            .lock()
            .unwrap()
            .get(&(tx_hash.to_string(), log_index))
            .cloned()
    }

    pub fn transaction(&self, hash: &str) -> Option<TransactionRecord> {
        self.transactions.lock().unwrap().get(hash).cloned()
    }

    pub fn stats(&self) -> WriteStats {
        *self.stats.lock().unwrap()
    }

    /// Seed a transaction without counting it as an engine write.
    pub fn seed_transaction(&self, tx: TransactionRecord) {
        self.transactions.lock().unwrap().insert(tx.hash.clone(), tx);
    }

    fn check_writable(&self) -> Result<(), SyncError> {
        if self.failing_writes.load(Ordering::SeqCst) {
            return Err(SyncError::Persistence("in-memory store: writes disabled".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CursorStore for InMemoryStore {
    async fn read(&self) -> Result<Option<Cursor>, SyncError> {
        Ok(self.cursor.lock().unwrap().clone())
    }

    async fn upsert(&self, cursor: &Cursor) -> Result<(), SyncError> {
        self.check_writable()?;
        *self.cursor.lock().unwrap() = Some(cursor.clone());
        self.stats.lock().unwrap().cursor_writes += 1;
        Ok(())
    }
}

#[async_trait]
impl RelationalStore for InMemoryStore {
    async fn upsert_event(&self, event: &EventRecord) -> Result<(), SyncError> {
        self.check_writable()?;
        let key = (event.transaction_hash.clone(), event.log_index);
        let mut events = self.events.lock().unwrap();
        let mut stats = self.stats.lock().unwrap();
        match events.get_mut(&key) {
            Some(existing) => {
                existing.block_number = event.block_number;
                existing.timestamp = event.timestamp;
                existing.raw_args = event.raw_args.clone();
                existing.sender_address = event.sender_address.clone();
                existing.recipient_address = event.recipient_address.clone();
                existing.value = event.value.clone();
                stats.events_updated += 1;
            }
            None => {
                events.insert(key, event.clone());
                stats.events_inserted += 1;
            }
        }
        Ok(())
    }

    async fn exists_transaction(&self, hash: &str) -> Result<bool, SyncError> {
        Ok(self.transactions.lock().unwrap().contains_key(hash))
    }

    async fn upsert_transaction(&self, tx: &TransactionRecord) -> Result<(), SyncError> {
        self.check_writable()?;
        let mut txs = self.transactions.lock().unwrap();
        let mut stats = self.stats.lock().unwrap();
        match txs.get_mut(&tx.hash) {
            Some(existing) => {
                existing.gas_used = tx.gas_used.clone();
                existing.status = tx.status;
                stats.transactions_updated += 1;
            }
            None => {
                txs.insert(tx.hash.clone(), tx.clone());
                stats.transactions_inserted += 1;
            }
        }
        Ok(())
    }

    async fn upsert_balance(&self, balance: &AddressBalance) -> Result<(), SyncError> {
        self.check_writable()?;
        let key = (balance.user_id.clone(), balance.address.to_ascii_lowercase());
        self.balances.lock().unwrap().insert(key, balance.clone());
        Ok(())
    }
}

#[async_trait]
impl RecordQueries for InMemoryStore {
    async fn find_events(&self, query: &EventQuery) -> Result<Vec<EventRecord>, SyncError> {
        let mut events: Vec<EventRecord> = self
            .events
            .lock()
            .unwrap()
            .values()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        events.sort_by(|a, b| {
            b.block_number
                .cmp(&a.block_number)
                .then(b.log_index.cmp(&a.log_index))
        });
        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.limit.map_or(usize::MAX, |l| l as usize);
        Ok(events.into_iter().skip(offset).take(limit).collect())
    }

    async fn aggregate_volume(
        &self,
        contract_address: &str,
        interval: Interval,
        from_ts: Option<i64>,
        to_ts: Option<i64>,
    ) -> Result<Vec<VolumeBucket>, SyncError> {
        let mut buckets: BTreeMap<DateTime<Utc>, (u64, U256)> = BTreeMap::new();
        for event in self.events.lock().unwrap().values() {
            if !event.contract_address.eq_ignore_ascii_case(contract_address)
                || from_ts.is_some_and(|from| event.timestamp < from)
                || to_ts.is_some_and(|to| event.timestamp > to)
            {
                continue;
            }
            let value = event
                .value
                .as_deref()
                .and_then(|v| U256::from_str_radix(v, 10).ok())
                .unwrap_or(U256::ZERO);
            let bucket = buckets.entry(interval.bucket_start(event.timestamp)).or_default();
            bucket.0 += 1;
            bucket.1 = bucket.1.saturating_add(value);
        }
        Ok(buckets
            .into_iter()
            .map(|(interval_start, (total_events, total))| VolumeBucket {
                interval_start,
                total_events,
                total_value_wei: total.to_string(),
            })
            .collect())
    }

    async fn user_transactions(
        &self,
        user_id: &str,
        page: u32,
        limit: u32,
    ) -> Result<Page<TransactionRecord>, SyncError> {
        let (offset, limit) = page_window(page, limit);
        let mut txs: Vec<TransactionRecord> = self
            .transactions
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.user_id.as_deref() == Some(user_id))
            .cloned()
            .collect();
        txs.sort_by(|a, b| {
            b.block_number
                .cmp(&a.block_number)
                .then(b.transaction_index.cmp(&a.transaction_index))
        });
        let total = txs.len() as u64;
        let items = txs
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok(Page::new(items, page.max(1), limit, total))
    }

    async fn user_balances(&self, user_id: &str) -> Result<Vec<AddressBalance>, SyncError> {
        let mut balances: Vec<AddressBalance> = self
            .balances
            .lock()
            .unwrap()
            .values()
            .filter(|b| b.user_id.as_deref() == Some(user_id))
            .cloned()
            .collect();
        balances.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        Ok(balances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(tx: &str, log_index: u64, block: u64, ts: i64, value: &str) -> EventRecord {
        EventRecord {
            contract_address: "0xc0ffee0000000000000000000000000000000001".into(),
            event_name: "Transfer".into(),
            block_number: block,
            transaction_hash: tx.into(),
            log_index,
            block_hash: format!("0xb{block}"),
            timestamp: ts,
            sender_address: Some("0xaa".into()),
            recipient_address: Some("0xbb".into()),
            value: Some(value.into()),
            raw_args: json!({ "value": value }),
        }
    }

    fn tx(hash: &str, block: u64, index: u32, user: Option<&str>) -> TransactionRecord {
        TransactionRecord {
            hash: hash.into(),
            from_address: "0xaa".into(),
            to_address: Some("0xbb".into()),
            value: "1".into(),
            gas_used: None,
            gas_price: Some("20".into()),
            block_number: block,
            block_hash: format!("0xb{block}"),
            transaction_index: index,
            nonce: 0,
            input: "0x".into(),
            status: None,
            user_id: user.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn event_upsert_is_idempotent() {
        let store = InMemoryStore::new();
        let e = event("0xabc", 2, 104, 0, "10");
        store.upsert_event(&e).await.unwrap();
        store.upsert_event(&e).await.unwrap();

        let mut moved = e.clone();
        moved.value = Some("11".into());
        moved.event_name = "Other".into();
        store.upsert_event(&moved).await.unwrap();

        assert_eq!(store.event_count(), 1);
        let stored = store.event("0xabc", 2).unwrap();
        assert_eq!(stored.value.as_deref(), Some("11"));
        assert_eq!(stored.event_name, "Transfer");
        assert_eq!(store.stats().events_inserted, 1);
        assert_eq!(store.stats().events_updated, 2);
    }

    #[tokio::test]
    async fn transaction_upsert_refreshes_only_receipt_fields() {
        let store = InMemoryStore::new();
        store.upsert_transaction(&tx("0x01", 5, 0, None)).await.unwrap();

        let mut again = tx("0x01", 6, 9, Some("u"));
        again.gas_used = Some("21000".into());
        again.status = Some(1);
        store.upsert_transaction(&again).await.unwrap();

        let stored = store.transaction("0x01").unwrap();
        assert_eq!(stored.block_number, 5);
        assert_eq!(stored.user_id, None);
        assert_eq!(stored.gas_used.as_deref(), Some("21000"));
        assert_eq!(stored.status, Some(1));
        assert!(store.exists_transaction("0x01").await.unwrap());
        assert!(!store.exists_transaction("0x02").await.unwrap());
    }

    #[tokio::test]
    async fn failing_writes_surface_as_persistence_errors() {
        let store = InMemoryStore::new();
        store.set_failing_writes(true);
        let err = store.upsert_event(&event("0x1", 0, 1, 0, "1")).await.unwrap_err();
        assert!(matches!(err, SyncError::Persistence(_)));
        assert_eq!(store.event_count(), 0);
    }

    #[tokio::test]
    async fn find_events_newest_first_with_paging() {
        let store = InMemoryStore::new();
        for i in 0..5u64 {
            store.upsert_event(&event(&format!("0x{i}"), 0, 100 + i, 0, "1")).await.unwrap();
        }
        let q = EventQuery::contract("0xC0FFEE0000000000000000000000000000000001")
            .blocks(Some(101), None)
            .limit(2);
        let found = store.find_events(&q).await.unwrap();
        assert_eq!(found.iter().map(|e| e.block_number).collect::<Vec<_>>(), vec![104, 103]);

        let q = EventQuery { offset: Some(3), ..q };
        let found = store.find_events(&q).await.unwrap();
        assert_eq!(found.iter().map(|e| e.block_number).collect::<Vec<_>>(), vec![101]);
    }

    #[tokio::test]
    async fn volume_buckets_sum_values() {
        let store = InMemoryStore::new();
        let day = 86_400;
        store.upsert_event(&event("0x1", 0, 1, 10, "1000000000000000000")).await.unwrap();
        store.upsert_event(&event("0x2", 0, 2, 20, "500000000000000000")).await.unwrap();
        store.upsert_event(&event("0x3", 0, 3, day + 5, "7")).await.unwrap();

        let contract = "0xc0ffee0000000000000000000000000000000001";
        let buckets = store
            .aggregate_volume(contract, Interval::Daily, None, None)
            .await
            .unwrap();
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].interval_start.timestamp(), 0);
        assert_eq!(buckets[0].total_events, 2);
        assert_eq!(buckets[0].total_value_wei, "1500000000000000000");
        assert_eq!(buckets[1].total_value_wei, "7");

        let buckets = store
            .aggregate_volume(contract, Interval::Daily, Some(15), Some(day))
            .await
            .unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].total_events, 1);
    }

    #[tokio::test]
    async fn user_transactions_paginate() {
        let store = InMemoryStore::new();
        for (i, block) in [10u64, 12, 11].into_iter().enumerate() {
            store
                .upsert_transaction(&tx(&format!("0x{i}"), block, 0, Some("alice")))
                .await
                .unwrap();
        }
        store.upsert_transaction(&tx("0xff", 99, 0, Some("bob"))).await.unwrap();

        let page = store.user_transactions("alice", 1, 2).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.pages, 2);
        assert_eq!(page.items.iter().map(|t| t.block_number).collect::<Vec<_>>(), vec![12, 11]);

        let page = store.user_transactions("alice", 2, 2).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].block_number, 10);
    }

    #[tokio::test]
    async fn balances_are_last_write_wins() {
        let store = InMemoryStore::new();
        let mut b = AddressBalance {
            user_id: Some("alice".into()),
            address: "0xAA".into(),
            balance: "1".into(),
            block_number: 1,
            last_updated: Utc::now(),
        };
        store.upsert_balance(&b).await.unwrap();
        b.address = "0xaa".into();
        b.balance = "2000000000000000000".into();
        b.block_number = 2;
        store.upsert_balance(&b).await.unwrap();

        let balances = store.user_balances("alice").await.unwrap();
        assert_eq!(balances.len(), 1);
        assert_eq!(balances[0].block_number, 2);
        assert_eq!(balances[0].formatted_balance(), "2.0");
    }

    #[tokio::test]
    async fn cursor_round_trip() {
        let store = InMemoryStore::new();
        assert!(store.read().await.unwrap().is_none());
        let cursor = Cursor::seeded("0xaa", "Transfer(address,address,uint256)", 100);
        store.upsert(&cursor).await.unwrap();
        assert_eq!(store.read().await.unwrap(), Some(cursor));
    }
}
