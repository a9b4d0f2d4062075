//! Backfill fetcher behaviour against a scripted chain and the in-memory store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chainsync_core::{BackfillConfig, MockChain};
use chainsync_evm::{BackfillFetcher, FetchRequest};
use chainsync_storage::InMemoryStore;

use common::*;

fn fetcher(chain: &Arc<MockChain>, store: &Arc<InMemoryStore>, config: BackfillConfig) -> BackfillFetcher {
    BackfillFetcher::new(chain.clone(), store.clone(), config)
}

fn max_probes(tip: u64) -> usize {
    // ceil(log2(tip + 1)) + 1
    (64 - tip.leading_zeros()) as usize + 1
}

#[tokio::test]
async fn binary_search_finds_exact_deployment_block() {
    let tip = 1_000_000;
    for deployed_at in [0, 1, 2, 123_457, 999_999, 1_000_000] {
        let chain = Arc::new(MockChain::new(tip));
        chain.deploy(ALICE, deployed_at);
        let store = Arc::new(InMemoryStore::new());
        let f = fetcher(&chain, &store, BackfillConfig::default());

        let start = f.determine_start_block(ALICE, None).await.unwrap();
        assert_eq!(start, deployed_at);

        // One classification probe plus the search itself.
        let probes = chain.calls("get_code") - 1;
        assert!(
            probes <= max_probes(tip),
            "{probes} probes for deployment at {deployed_at}"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn stops_after_target_count() {
    let chain = Arc::new(MockChain::new(2_000));
    for i in 0..100u64 {
        chain.add_transaction(transfer_tx(&format!("0x{i:04x}"), 10 + i, ALICE, BOB));
    }
    let store = Arc::new(InMemoryStore::new());
    let f = fetcher(&chain, &store, BackfillConfig::default());

    let started = tokio::time::Instant::now();
    let report = f
        .fetch_transactions(&FetchRequest::new(ALICE).from_block(0).to_block(1_000))
        .await
        .unwrap();

    assert_eq!(report.transactions.len(), 5);
    assert_eq!(store.transaction_count(), 5);
    assert_eq!(report.scanned_through, Some(14));
    assert_eq!(chain.highest_block_fetched(), Some(14));
    assert!(report.end_block > 14);

    // Throttled between the 15 block fetches.
    assert!(started.elapsed() >= Duration::from_millis(300 * 14));
}

#[tokio::test]
async fn already_stored_transactions_are_skipped() {
    let chain = Arc::new(MockChain::new(100));
    let txs: Vec<_> = (0..5u64)
        .map(|i| transfer_tx(&format!("0x{i:02x}"), 20 + i, BOB, ALICE))
        .collect();
    for tx in &txs {
        chain.add_transaction(tx.clone());
    }
    let store = Arc::new(InMemoryStore::new());
    for tx in &txs[..3] {
        store.seed_transaction(stored(tx));
    }
    let config = BackfillConfig { throttle_ms: 0, ..BackfillConfig::default() };
    let f = fetcher(&chain, &store, config);

    let report = f
        .fetch_transactions(&FetchRequest::new(ALICE).from_block(20).to_block(30))
        .await
        .unwrap();

    let hashes: Vec<_> = report.transactions.iter().map(|t| t.hash.as_str()).collect();
    assert_eq!(hashes, vec!["0x03", "0x04"]);
    assert_eq!(report.skipped_existing, 3);
    assert_eq!(store.stats().transactions_inserted, 2);
    assert_eq!(store.stats().transactions_updated, 0);
    assert_eq!(store.transaction_count(), 5);
}

#[tokio::test]
async fn contract_backfill_starts_at_deployment() {
    let chain = Arc::new(MockChain::new(5_000));
    chain.deploy(ALICE, 4_200);
    chain.add_transaction(transfer_tx("0xbefore", 4_100, BOB, ALICE));
    chain.add_transaction(transfer_tx("0xafter", 4_300, BOB, ALICE));
    let store = Arc::new(InMemoryStore::new());
    let config = BackfillConfig { throttle_ms: 0, ..BackfillConfig::default() };
    let f = fetcher(&chain, &store, config);

    let report = f.fetch_transactions(&FetchRequest::new(ALICE)).await.unwrap();
    assert_eq!(report.start_block, 4_200);
    assert_eq!(report.end_block, 5_000);
    let hashes: Vec<_> = report.transactions.iter().map(|t| t.hash.as_str()).collect();
    assert_eq!(hashes, vec!["0xafter"]);
}

#[tokio::test]
async fn concurrent_backfills_of_one_address_do_not_duplicate() {
    let chain = Arc::new(MockChain::new(50));
    for i in 0..4u64 {
        chain.add_transaction(transfer_tx(&format!("0x{i:02x}"), 5 + i, ALICE, BOB));
    }
    let store = Arc::new(InMemoryStore::new());
    let config = BackfillConfig { throttle_ms: 0, ..BackfillConfig::default() };
    let f = Arc::new(fetcher(&chain, &store, config));

    let req = FetchRequest::new(ALICE).from_block(0).to_block(50);
    let (a, b) = tokio::join!(f.fetch_transactions(&req), f.fetch_transactions(&req));
    a.unwrap();
    b.unwrap();
    assert_eq!(store.transaction_count(), 4);
}
