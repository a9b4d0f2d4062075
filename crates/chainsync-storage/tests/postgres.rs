//! Postgres backend tests. Require a live database:
//!
//! ```sh
//! DATABASE_URL=postgres://localhost/chainsync_test \
//!     cargo test -p chainsync-storage --features postgres -- --ignored
//! ```
#![cfg(feature = "postgres")]

use chainsync_core::{Cursor, CursorStore, EventQuery, EventRecord, RecordQueries, RelationalStore};
use chainsync_storage::PostgresStore;
use serde_json::json;

async fn store() -> PostgresStore {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    PostgresStore::connect(&url).await.unwrap()
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn event_upsert_round_trip() {
    let store = store().await;
    let tx_hash = format!("0x{:064x}", chrono::Utc::now().timestamp_nanos_opt().unwrap_or(1));
    let mut event = EventRecord {
        contract_address: "0x7b79995e5f793a07bc00c21412e50ecae098e7f9".into(),
        event_name: "Transfer".into(),
        block_number: 104,
        transaction_hash: tx_hash.clone(),
        log_index: 2,
        block_hash: "0xb104".into(),
        timestamp: 1_700_000_000,
        sender_address: Some("0xaa".into()),
        recipient_address: Some("0xbb".into()),
        value: Some("1000000000000000000".into()),
        raw_args: json!({ "value": "1000000000000000000" }),
    };
    store.upsert_event(&event).await.unwrap();
    event.value = Some("2".into());
    store.upsert_event(&event).await.unwrap();

    let found = store
        .find_events(&EventQuery::contract(&event.contract_address).blocks(Some(104), Some(104)))
        .await
        .unwrap();
    let ours: Vec<_> = found.iter().filter(|e| e.transaction_hash == tx_hash).collect();
    assert_eq!(ours.len(), 1);
    assert_eq!(ours[0].value.as_deref(), Some("2"));
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn cursor_round_trip() {
    let store = store().await;
    let mut cursor = Cursor::seeded("0x7b79995e5f793a07bc00c21412e50ecae098e7f9", "Transfer(address,address,uint256)", 100);
    cursor.advance(150);
    store.upsert(&cursor).await.unwrap();
    let loaded = store.read().await.unwrap().unwrap();
    assert_eq!(loaded.last_processed_block, Some(150));
}
