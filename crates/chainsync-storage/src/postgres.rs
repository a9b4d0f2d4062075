//! PostgreSQL storage backend for ChainSync.
//!
//! Persists the indexer cursor, events, transactions and balance snapshots.
//! Uses `sqlx` with connection pooling.
//!
//! # Feature Flag
//! Requires the `postgres` feature:
//! ```toml
//! chainsync-storage = { version = "0.2", features = ["postgres"] }
//! ```
//!
//! # Schema
//! Created on connect if missing:
//! - `indexer_state`: the singleton cursor (id `global`)
//! - `events`: decoded contract events, unique on `(transaction_hash, log_index)`
//! - `transactions`: backfilled transactions, unique on `hash`
//! - `address_balances`: latest balance per `(user_id, address)`
//!
//! Balance rows without an owner are stored with an empty `user_id`, so the
//! uniqueness constraint also holds for them.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use chainsync_core::cursor::{Cursor, CursorStore, CURSOR_ID};
use chainsync_core::error::SyncError;
use chainsync_core::store::{
    page_window, EventQuery, Interval, Page, RecordQueries, RelationalStore, VolumeBucket,
};
use chainsync_core::types::{AddressBalance, EventRecord, TransactionRecord};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS indexer_state (
        id                   TEXT        PRIMARY KEY,
        last_processed_block BIGINT,
        is_running           BOOLEAN     NOT NULL DEFAULT FALSE,
        error_count          BIGINT      NOT NULL DEFAULT 0,
        last_error           TEXT,
        contract_address     VARCHAR(42) NOT NULL,
        event_signature      TEXT        NOT NULL,
        created_at           TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at           TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )",
    "CREATE TABLE IF NOT EXISTS events (
        id                SERIAL PRIMARY KEY,
        contract_address  VARCHAR(42)   NOT NULL,
        event_name        VARCHAR(100)  NOT NULL,
        block_number      BIGINT        NOT NULL,
        transaction_hash  VARCHAR(66)   NOT NULL,
        log_index         BIGINT        NOT NULL,
        block_hash        VARCHAR(66)   NOT NULL,
        timestamp         BIGINT        NOT NULL,
        sender_address    VARCHAR(42),
        recipient_address VARCHAR(42),
        value             NUMERIC(78, 0),
        raw_args_json     JSONB,
        indexed_at        TIMESTAMPTZ   DEFAULT NOW(),
        CONSTRAINT unique_event_log UNIQUE (transaction_hash, log_index)
    )",
    "CREATE INDEX IF NOT EXISTS idx_events_contract_address ON events (contract_address)",
    "CREATE INDEX IF NOT EXISTS idx_events_block_number ON events (block_number)",
    "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events (timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_events_sender_address ON events (sender_address)",
    "CREATE INDEX IF NOT EXISTS idx_events_recipient_address ON events (recipient_address)",
    "CREATE INDEX IF NOT EXISTS idx_events_event_name ON events (event_name)",
    "CREATE TABLE IF NOT EXISTS transactions (
        id                SERIAL PRIMARY KEY,
        user_id           VARCHAR(64),
        hash              VARCHAR(66) UNIQUE NOT NULL,
        from_address      VARCHAR(42) NOT NULL,
        to_address        VARCHAR(42),
        value             VARCHAR(80) NOT NULL,
        gas_used          VARCHAR(80),
        gas_price         VARCHAR(80),
        block_number      BIGINT      NOT NULL,
        block_hash        VARCHAR(66) NOT NULL,
        transaction_index INTEGER     NOT NULL,
        nonce             BIGINT      NOT NULL,
        input             TEXT,
        status            INTEGER,
        created_at        TIMESTAMPTZ DEFAULT NOW(),
        updated_at        TIMESTAMPTZ DEFAULT NOW()
    )",
    "CREATE TABLE IF NOT EXISTS address_balances (
        id           SERIAL PRIMARY KEY,
        user_id      VARCHAR(64) NOT NULL DEFAULT '',
        address      VARCHAR(42) NOT NULL,
        balance      VARCHAR(80) NOT NULL,
        block_number BIGINT      NOT NULL,
        last_updated TIMESTAMPTZ DEFAULT NOW(),
        UNIQUE (user_id, address)
    )",
    "CREATE INDEX IF NOT EXISTS idx_transactions_user_id ON transactions (user_id)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_from_address ON transactions (from_address)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_to_address ON transactions (to_address)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_block_number ON transactions (block_number)",
    "CREATE INDEX IF NOT EXISTS idx_address_balances_user_id ON address_balances (user_id)",
    "CREATE INDEX IF NOT EXISTS idx_address_balances_address ON address_balances (address)",
];

const EVENT_COLUMNS: &str = "contract_address, event_name, block_number, transaction_hash, log_index,
    block_hash, timestamp, sender_address, recipient_address, value::TEXT AS value, raw_args_json";

const TRANSACTION_COLUMNS: &str = "hash, from_address, to_address, value, gas_used, gas_price,
    block_number, block_hash, transaction_index, nonce, input, status, user_id";

/// Connection options for the Postgres backend.
#[derive(Debug, Clone)]
pub struct PostgresOptions {
    /// Maximum number of connections in the pool (default: 10)
    pub max_connections: u32,
    /// Minimum number of idle connections to keep open (default: 1)
    pub min_connections: u32,
    /// Connection timeout in seconds (default: 5)
    pub connect_timeout_secs: u64,
}

impl Default for PostgresOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 5,
        }
    }
}

/// PostgreSQL-backed store. Cheap to clone; wraps a connection pool.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

fn db_err(e: sqlx::Error) -> SyncError {
    SyncError::Persistence(e.to_string())
}

impl PostgresStore {
    /// Connect with default options and initialise the schema.
    ///
    /// URL format: `postgresql://[user[:password]@][host][:port][/dbname]`
    pub async fn connect(database_url: &str) -> Result<Self, SyncError> {
        Self::connect_with_options(database_url, PostgresOptions::default()).await
    }

    pub async fn connect_with_options(
        database_url: &str,
        opts: PostgresOptions,
    ) -> Result<Self, SyncError> {
        let pool = PgPoolOptions::new()
            .max_connections(opts.max_connections)
            .min_connections(opts.min_connections)
            .acquire_timeout(Duration::from_secs(opts.connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| SyncError::Persistence(format!("postgres connect: {e}")))?;

        let store = Self { pool };
        store.init_schema().await?;
        info!("PostgresStore connected and schema initialized");
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), SyncError> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await.map_err(db_err)?;
        }
        debug!("PostgresStore schema initialized");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn cursor_from_row(row: &PgRow) -> Result<Cursor, sqlx::Error> {
    Ok(Cursor {
        id: row.try_get("id")?,
        last_processed_block: row
            .try_get::<Option<i64>, _>("last_processed_block")?
            .map(|b| b as u64),
        is_running: row.try_get("is_running")?,
        error_count: row.try_get::<i64, _>("error_count")? as u64,
        last_error: row.try_get("last_error")?,
        contract_address: row.try_get("contract_address")?,
        event_signature: row.try_get("event_signature")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn event_from_row(row: &PgRow) -> Result<EventRecord, sqlx::Error> {
    Ok(EventRecord {
        contract_address: row.try_get("contract_address")?,
        event_name: row.try_get("event_name")?,
        block_number: row.try_get::<i64, _>("block_number")? as u64,
        transaction_hash: row.try_get("transaction_hash")?,
        log_index: row.try_get::<i64, _>("log_index")? as u64,
        block_hash: row.try_get("block_hash")?,
        timestamp: row.try_get("timestamp")?,
        sender_address: row.try_get("sender_address")?,
        recipient_address: row.try_get("recipient_address")?,
        value: row.try_get("value")?,
        raw_args: row
            .try_get::<Option<serde_json::Value>, _>("raw_args_json")?
            .unwrap_or(serde_json::Value::Null),
    })
}

fn transaction_from_row(row: &PgRow) -> Result<TransactionRecord, sqlx::Error> {
    Ok(TransactionRecord {
        hash: row.try_get("hash")?,
        from_address: row.try_get("from_address")?,
        to_address: row.try_get("to_address")?,
        value: row.try_get("value")?,
        gas_used: row.try_get("gas_used")?,
        gas_price: row.try_get("gas_price")?,
        block_number: row.try_get::<i64, _>("block_number")? as u64,
        block_hash: row.try_get("block_hash")?,
        transaction_index: row.try_get::<i32, _>("transaction_index")? as u32,
        nonce: row.try_get::<i64, _>("nonce")? as u64,
        input: row.try_get::<Option<String>, _>("input")?.unwrap_or_default(),
        status: row.try_get("status")?,
        user_id: row.try_get("user_id")?,
    })
}

fn balance_from_row(row: &PgRow) -> Result<AddressBalance, sqlx::Error> {
    let user_id: String = row.try_get("user_id")?;
    Ok(AddressBalance {
        user_id: (!user_id.is_empty()).then_some(user_id),
        address: row.try_get("address")?,
        balance: row.try_get("balance")?,
        block_number: row.try_get::<i64, _>("block_number")? as u64,
        last_updated: row
            .try_get::<Option<DateTime<Utc>>, _>("last_updated")?
            .unwrap_or_default(),
    })
}

// ─── CursorStore ──────────────────────────────────────────────────────────────

#[async_trait]
impl CursorStore for PostgresStore {
    async fn read(&self) -> Result<Option<Cursor>, SyncError> {
        let row = sqlx::query("SELECT * FROM indexer_state WHERE id = $1")
            .bind(CURSOR_ID)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(cursor_from_row).transpose().map_err(db_err)
    }

    async fn upsert(&self, cursor: &Cursor) -> Result<(), SyncError> {
        sqlx::query(
            "INSERT INTO indexer_state
                (id, last_processed_block, is_running, error_count, last_error,
                 contract_address, event_signature, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (id) DO UPDATE SET
                last_processed_block = EXCLUDED.last_processed_block,
                is_running           = EXCLUDED.is_running,
                error_count          = EXCLUDED.error_count,
                last_error           = EXCLUDED.last_error,
                contract_address     = EXCLUDED.contract_address,
                event_signature      = EXCLUDED.event_signature,
                updated_at           = EXCLUDED.updated_at",
        )
        .bind(&cursor.id)
        .bind(cursor.last_processed_block.map(|b| b as i64))
        .bind(cursor.is_running)
        .bind(cursor.error_count as i64)
        .bind(&cursor.last_error)
        .bind(&cursor.contract_address)
        .bind(&cursor.event_signature)
        .bind(cursor.created_at)
        .bind(cursor.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        debug!(block = ?cursor.last_processed_block, running = cursor.is_running, "cursor saved");
        Ok(())
    }
}

// ─── RelationalStore ──────────────────────────────────────────────────────────

#[async_trait]
impl RelationalStore for PostgresStore {
    async fn upsert_event(&self, event: &EventRecord) -> Result<(), SyncError> {
        sqlx::query(
            "INSERT INTO events
                (contract_address, event_name, block_number, transaction_hash, log_index,
                 block_hash, timestamp, sender_address, recipient_address, value, raw_args_json)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10::NUMERIC, $11)
             ON CONFLICT (transaction_hash, log_index) DO UPDATE SET
                block_number      = EXCLUDED.block_number,
                timestamp         = EXCLUDED.timestamp,
                raw_args_json     = EXCLUDED.raw_args_json,
                sender_address    = EXCLUDED.sender_address,
                recipient_address = EXCLUDED.recipient_address,
                value             = EXCLUDED.value",
        )
        .bind(&event.contract_address)
        .bind(&event.event_name)
        .bind(event.block_number as i64)
        .bind(&event.transaction_hash)
        .bind(event.log_index as i64)
        .bind(&event.block_hash)
        .bind(event.timestamp)
        .bind(&event.sender_address)
        .bind(&event.recipient_address)
        .bind(&event.value)
        .bind(&event.raw_args)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn exists_transaction(&self, hash: &str) -> Result<bool, SyncError> {
        let row = sqlx::query("SELECT EXISTS (SELECT 1 FROM transactions WHERE hash = $1) AS found")
            .bind(hash)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        row.try_get("found").map_err(db_err)
    }

    async fn upsert_transaction(&self, tx: &TransactionRecord) -> Result<(), SyncError> {
        sqlx::query(
            "INSERT INTO transactions
                (hash, from_address, to_address, value, gas_used, gas_price, block_number,
                 block_hash, transaction_index, nonce, input, status, user_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
             ON CONFLICT (hash) DO UPDATE SET
                gas_used   = EXCLUDED.gas_used,
                status     = EXCLUDED.status,
                updated_at = NOW()",
        )
        .bind(&tx.hash)
        .bind(&tx.from_address)
        .bind(&tx.to_address)
        .bind(&tx.value)
        .bind(&tx.gas_used)
        .bind(&tx.gas_price)
        .bind(tx.block_number as i64)
        .bind(&tx.block_hash)
        .bind(tx.transaction_index as i32)
        .bind(tx.nonce as i64)
        .bind(&tx.input)
        .bind(tx.status)
        .bind(&tx.user_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn upsert_balance(&self, balance: &AddressBalance) -> Result<(), SyncError> {
        sqlx::query(
            "INSERT INTO address_balances (user_id, address, balance, block_number, last_updated)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (user_id, address) DO UPDATE SET
                balance      = EXCLUDED.balance,
                block_number = EXCLUDED.block_number,
                last_updated = EXCLUDED.last_updated",
        )
        .bind(balance.user_id.as_deref().unwrap_or(""))
        .bind(balance.address.to_ascii_lowercase())
        .bind(&balance.balance)
        .bind(balance.block_number as i64)
        .bind(balance.last_updated)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

// ─── RecordQueries ────────────────────────────────────────────────────────────

#[async_trait]
impl RecordQueries for PostgresStore {
    async fn find_events(&self, query: &EventQuery) -> Result<Vec<EventRecord>, SyncError> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE ($1::TEXT IS NULL OR LOWER(contract_address) = LOWER($1))
               AND ($2::TEXT IS NULL OR event_name = $2)
               AND ($3::BIGINT IS NULL OR block_number >= $3)
               AND ($4::BIGINT IS NULL OR block_number <= $4)
               AND ($5::TEXT IS NULL OR LOWER(sender_address) = LOWER($5))
               AND ($6::TEXT IS NULL OR LOWER(recipient_address) = LOWER($6))
             ORDER BY block_number DESC, log_index DESC
             LIMIT $7 OFFSET $8"
        );
        let rows = sqlx::query(&sql)
            .bind(&query.contract_address)
            .bind(&query.event_name)
            .bind(query.from_block.map(|b| b as i64))
            .bind(query.to_block.map(|b| b as i64))
            .bind(&query.sender_address)
            .bind(&query.recipient_address)
            .bind(query.limit.map(i64::from))
            .bind(i64::from(query.offset.unwrap_or(0)))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.iter()
            .map(event_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)
    }

    async fn aggregate_volume(
        &self,
        contract_address: &str,
        interval: Interval,
        from_ts: Option<i64>,
        to_ts: Option<i64>,
    ) -> Result<Vec<VolumeBucket>, SyncError> {
        let rows = sqlx::query(
            "SELECT
                DATE_TRUNC($2, TO_TIMESTAMP(timestamp)) AS interval_start,
                COUNT(*) AS total_events,
                COALESCE(SUM(value), 0)::TEXT AS total_value_wei
             FROM events
             WHERE LOWER(contract_address) = LOWER($1)
               AND ($3::BIGINT IS NULL OR timestamp >= $3)
               AND ($4::BIGINT IS NULL OR timestamp <= $4)
             GROUP BY interval_start
             ORDER BY interval_start ASC",
        )
        .bind(contract_address)
        .bind(interval.trunc_unit())
        .bind(from_ts)
        .bind(to_ts)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| {
                Ok(VolumeBucket {
                    interval_start: row.try_get("interval_start")?,
                    total_events: row.try_get::<i64, _>("total_events")? as u64,
                    total_value_wei: row.try_get("total_value_wei")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(db_err)
    }

    async fn user_transactions(
        &self,
        user_id: &str,
        page: u32,
        limit: u32,
    ) -> Result<Page<TransactionRecord>, SyncError> {
        let (offset, limit) = page_window(page, limit);
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions
             WHERE user_id = $1
             ORDER BY block_number DESC, transaction_index DESC
             LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .bind(i64::from(limit))
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        let items = rows
            .iter()
            .map(transaction_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        let total: i64 = sqlx::query("SELECT COUNT(*) AS total FROM transactions WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .and_then(|row| row.try_get("total"))
            .map_err(db_err)?;

        Ok(Page::new(items, page.max(1), limit, total as u64))
    }

    async fn user_balances(&self, user_id: &str) -> Result<Vec<AddressBalance>, SyncError> {
        let rows = sqlx::query(
            "SELECT user_id, address, balance, block_number, last_updated
             FROM address_balances
             WHERE user_id = $1
             ORDER BY last_updated DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter()
            .map(balance_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)
    }
}
