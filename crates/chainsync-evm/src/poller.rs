//! One poll iteration of the event indexer.
//!
//! ```text
//! tip ← chain height
//! from ← max(requested start, cursor + 1)
//! from > tip  → caught up
//! to ← min(from + chunk − 1, tip)
//! logs[from..=to] → decode → upsert by (tx hash, log index)
//! cursor ← to
//! ```
//!
//! The cursor is written only after every event of the range is stored, so
//! a failed iteration leaves it untouched and the same range is retried.

use std::collections::HashMap;
use std::sync::Arc;

use chainsync_core::cursor::{Cursor, CursorStore};
use chainsync_core::error::SyncError;
use chainsync_core::layout::EventLayout;
use chainsync_core::store::RelationalStore;
use chainsync_core::types::EventRecord;
use chainsync_core::ChainClient;

/// Result of a successful iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing new; the cursor is already at the tip.
    CaughtUp { tip: u64 },
    Processed(RangeReport),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeReport {
    pub from: u64,
    pub to: u64,
    pub tip: u64,
    /// Events upserted.
    pub stored: usize,
    /// Logs skipped (removed or undecodable).
    pub skipped: usize,
}

/// Scans one chunk of blocks per call and advances the cursor.
pub struct RangePoller {
    client: Arc<dyn ChainClient>,
    store: Arc<dyn RelationalStore>,
    cursors: Arc<dyn CursorStore>,
    layout: EventLayout,
    contract_address: String,
    requested_start: u64,
    chunk_size: u64,
}

impl RangePoller {
    pub fn new(
        client: Arc<dyn ChainClient>,
        store: Arc<dyn RelationalStore>,
        cursors: Arc<dyn CursorStore>,
        layout: EventLayout,
        contract_address: impl Into<String>,
        requested_start: u64,
        chunk_size: u64,
    ) -> Self {
        Self {
            client,
            store,
            cursors,
            layout,
            contract_address: contract_address.into().to_ascii_lowercase(),
            requested_start,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn layout(&self) -> &EventLayout {
        &self.layout
    }

    /// Run one iteration. Callers must not run two concurrently.
    pub async fn tick(&self) -> Result<TickOutcome, SyncError> {
        let tip = self.client.current_block_height().await?;
        let mut cursor = self.load_cursor().await?;

        let from = self.requested_start.max(cursor.next_block());
        if from > tip {
            tracing::debug!(tip, next = from, "caught up, waiting for new blocks");
            return Ok(TickOutcome::CaughtUp { tip });
        }
        let to = from.saturating_add(self.chunk_size - 1).min(tip);

        tracing::info!(from, to, tip, "indexing range");
        let logs = self
            .client
            .query_logs(&self.contract_address, self.layout.topic0(), from, to)
            .await?;

        let mut timestamps: HashMap<u64, i64> = HashMap::new();
        let mut stored = 0;
        let mut skipped = 0;
        for log in &logs {
            if log.removed {
                skipped += 1;
                continue;
            }
            let decoded = match self.layout.decode(log) {
                Ok(decoded) => decoded,
                Err(e) => {
                    tracing::warn!(
                        tx = %log.transaction_hash,
                        log_index = log.log_index,
                        error = %e,
                        "skipping undecodable log"
                    );
                    skipped += 1;
                    continue;
                }
            };
            let timestamp = self.block_timestamp(&mut timestamps, log.block_number).await?;
            let record = EventRecord {
                contract_address: self.contract_address.clone(),
                event_name: decoded.name.clone(),
                block_number: log.block_number,
                transaction_hash: log.transaction_hash.clone(),
                log_index: log.log_index,
                block_hash: log.block_hash.clone(),
                timestamp,
                sender_address: decoded.sender.clone(),
                recipient_address: decoded.recipient.clone(),
                value: decoded.value.clone(),
                raw_args: decoded.args_json(),
            };
            self.store.upsert_event(&record).await?;
            stored += 1;
        }

        cursor.advance(to);
        self.cursors.upsert(&cursor).await?;

        tracing::info!(from, to, stored, skipped, "range complete");
        Ok(TickOutcome::Processed(RangeReport { from, to, tip, stored, skipped }))
    }

    async fn load_cursor(&self) -> Result<Cursor, SyncError> {
        self.cursors
            .read()
            .await?
            .ok_or_else(|| SyncError::Persistence("indexer cursor is missing".into()))
    }

    async fn block_timestamp(
        &self,
        cache: &mut HashMap<u64, i64>,
        number: u64,
    ) -> Result<i64, SyncError> {
        if let Some(ts) = cache.get(&number) {
            return Ok(*ts);
        }
        let block = self
            .client
            .get_block(number, false)
            .await?
            .ok_or_else(|| SyncError::Rpc(format!("block {number} not found")))?;
        cache.insert(number, block.timestamp);
        Ok(block.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainsync_core::mock::{MockChain, GENESIS_TIMESTAMP};
    use chainsync_storage::InMemoryStore;

    use crate::testutil::{seeded_store, transfer_log, CONTRACT, TRANSFER};

    fn poller(chain: &Arc<MockChain>, store: &Arc<InMemoryStore>, start: u64, chunk: u64) -> RangePoller {
        RangePoller::new(
            chain.clone(),
            store.clone(),
            store.clone(),
            EventLayout::parse(TRANSFER).unwrap(),
            CONTRACT,
            start,
            chunk,
        )
    }

    #[tokio::test]
    async fn processes_chunk_and_advances_cursor() {
        let chain = Arc::new(MockChain::new(125));
        chain.add_log(transfer_log(104, "0xabc", 2));
        let store = seeded_store(100).await;
        let p = poller(&chain, &store, 100, 10);

        let out = p.tick().await.unwrap();
        assert_eq!(
            out,
            TickOutcome::Processed(RangeReport { from: 100, to: 109, tip: 125, stored: 1, skipped: 0 })
        );
        assert_eq!(store.cursor().unwrap().last_processed_block, Some(109));

        let rows = store.events();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].timestamp, GENESIS_TIMESTAMP + 104 * 12);
        assert_eq!(rows[0].value.as_deref(), Some("1000"));
        assert_eq!(rows[0].contract_address, CONTRACT.to_ascii_lowercase());
    }

    #[tokio::test]
    async fn caught_up_leaves_cursor() {
        let chain = Arc::new(MockChain::new(50));
        let store = seeded_store(51).await;
        let writes = store.stats().cursor_writes;
        let p = poller(&chain, &store, 0, 10);

        assert_eq!(p.tick().await.unwrap(), TickOutcome::CaughtUp { tip: 50 });
        assert_eq!(store.cursor().unwrap().last_processed_block, Some(50));
        assert_eq!(store.stats().cursor_writes, writes);
        assert_eq!(chain.calls("query_logs"), 0);
    }

    #[tokio::test]
    async fn undecodable_and_removed_logs_are_skipped() {
        let chain = Arc::new(MockChain::new(20));
        let mut bad = transfer_log(5, "0xbad", 0);
        bad.data = "0x12".into();
        let mut removed = transfer_log(6, "0xgone", 0);
        removed.removed = true;
        chain.add_log(bad);
        chain.add_log(removed);
        chain.add_log(transfer_log(7, "0xgood", 1));

        let store = seeded_store(0).await;
        let p = poller(&chain, &store, 0, 100);

        match p.tick().await.unwrap() {
            TickOutcome::Processed(r) => assert_eq!((r.stored, r.skipped, r.to), (1, 2, 20)),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(store.events()[0].transaction_hash, "0xgood");
    }

    #[tokio::test]
    async fn rpc_failure_leaves_cursor() {
        let chain = Arc::new(MockChain::new(20));
        chain.add_log(transfer_log(3, "0x1", 0));
        let store = seeded_store(0).await;
        let p = poller(&chain, &store, 0, 100);

        chain.fail_next(2);
        assert!(p.tick().await.unwrap_err().is_transient());
        assert!(p.tick().await.is_err());
        assert_eq!(store.cursor().unwrap().last_processed_block, None);

        p.tick().await.unwrap();
        assert_eq!(store.cursor().unwrap().last_processed_block, Some(20));
    }

    #[tokio::test]
    async fn persistence_failure_leaves_cursor() {
        let chain = Arc::new(MockChain::new(20));
        chain.add_log(transfer_log(3, "0x1", 0));
        let store = seeded_store(0).await;
        let p = poller(&chain, &store, 0, 100);

        store.set_failing_writes(true);
        let err = p.tick().await.unwrap_err();
        assert!(matches!(err, SyncError::Persistence(_)));
        assert_eq!(store.cursor().unwrap().last_processed_block, None);
        assert_eq!(store.event_count(), 0);
    }
}
