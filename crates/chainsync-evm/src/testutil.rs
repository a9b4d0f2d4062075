use std::sync::Arc;

use chainsync_core::cursor::{Cursor, CursorStore};
use chainsync_core::types::Log;
use chainsync_storage::InMemoryStore;

pub const CONTRACT: &str = "0x7B79995e5f793A07Bc00c21412e50Ecae098E7f9";
pub const TRANSFER: &str = "Transfer(address indexed from, address indexed to, uint256 value)";
pub const TRANSFER_TOPIC: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

fn word(tail: &str) -> String {
    format!("0x{tail:0>64}")
}

/// A `Transfer(0x…01 → 0x…02, 1000)` log from [`CONTRACT`].
pub fn transfer_log(block: u64, tx_hash: &str, log_index: u64) -> Log {
    Log {
        address: CONTRACT.to_string(),
        topics: vec![TRANSFER_TOPIC.into(), word("01"), word("02")],
        data: word("3e8"),
        block_number: block,
        block_hash: format!("0x{block:064x}"),
        transaction_hash: tx_hash.to_string(),
        log_index,
        removed: false,
    }
}

/// A store whose cursor is positioned just before `start_block`.
pub async fn seeded_store(start_block: u64) -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    let mut cursor = Cursor::seeded(CONTRACT, "Transfer(address,address,uint256)", start_block);
    cursor.is_running = true;
    store.upsert(&cursor).await.unwrap();
    store
}
