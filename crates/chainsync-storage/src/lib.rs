//! chainsync-storage: storage backends for ChainSync.
//!
//! Each backend implements all three storage capabilities from
//! `chainsync-core`: [`CursorStore`](chainsync_core::CursorStore),
//! [`RelationalStore`](chainsync_core::RelationalStore) and
//! [`RecordQueries`](chainsync_core::RecordQueries).
//!
//! Backends:
//! - [`memory`]: in-memory (dev/testing, no persistence)
//! - `postgres`: PostgreSQL via `sqlx` (feature `postgres`)

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryStore;

#[cfg(feature = "postgres")]
pub use postgres::{PostgresOptions, PostgresStore};
