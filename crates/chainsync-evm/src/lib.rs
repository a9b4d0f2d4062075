//! chainsync-evm: the two chain sync engines.
//!
//! - [`EventIndexer`] tails one contract event into the relational store,
//!   advancing a durable cursor one chunk at a time.
//! - [`BackfillFetcher`] walks one address's transaction history on demand,
//!   from an inferred start block, stopping after a few new transactions.

pub mod backfill;
pub mod builder;
pub mod indexer;
pub mod poller;

#[cfg(test)]
mod testutil;

pub use backfill::{AddressKind, BackfillFetcher, BalanceReport, FetchReport, FetchRequest};
pub use builder::IndexerBuilder;
pub use chainsync_core::units::format_ether;
pub use indexer::{EventIndexer, IndexerState, IndexerStatus, StartReport};
pub use poller::{RangePoller, RangeReport, TickOutcome};
