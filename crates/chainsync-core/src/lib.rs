//! chainsync-core: foundation for the event indexer and backfill fetcher.
//!
//! # Architecture
//!
//! ```text
//! EventIndexer ──┐                    ┌── CursorStore      (singleton cursor)
//!                ├── ChainClient ─────┤
//! BackfillFetcher┘   (TimeoutClient)  └── RelationalStore  (events / transactions / balances)
//! ```
//!
//! This crate holds what both engines share: record types, the error
//! taxonomy, the capability traits, the retry policy, engine configuration
//! and event layouts.

pub mod client;
pub mod config;
pub mod cursor;
pub mod error;
pub mod layout;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod retry;
pub mod store;
pub mod types;
pub mod units;

pub use client::{ChainClient, TimeoutClient};
pub use config::{BackfillConfig, IndexerConfig};
pub use cursor::{Cursor, CursorStore};
pub use error::SyncError;
pub use layout::{ArgValue, DecodedLog, EventLayout};
#[cfg(any(test, feature = "mock"))]
pub use mock::MockChain;
pub use retry::{RetryConfig, RetryPolicy};
pub use store::{EventQuery, Interval, Page, RecordQueries, RelationalStore, VolumeBucket};
pub use types::{
    AddressBalance, Block, EventRecord, Log, Receipt, Transaction, TransactionRecord,
};
pub use units::format_ether;
