//! The event indexer: lifecycle, scheduling and retry around [`RangePoller`].
//!
//! ```text
//! Stopped ──start()──▶ Starting ──first tick ok──▶ Running ──stop()──▶ Stopping ──▶ Stopped
//!                         │                          │
//!                         └── config error ──────────┴── retry ceiling / config error ──▶ Stopped
//! ```
//!
//! A single worker task owns the schedule: it sleeps, runs one tick under
//! the cursor lease, then picks the next delay (poll interval when healthy,
//! exponential backoff after a failure). Ticks never overlap.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use chainsync_core::config::IndexerConfig;
use chainsync_core::cursor::{Cursor, CursorStore};
use chainsync_core::error::SyncError;
use chainsync_core::layout::EventLayout;
use chainsync_core::retry::RetryPolicy;
use chainsync_core::store::RelationalStore;
use chainsync_core::types::{is_empty_code, is_valid_address};
use chainsync_core::{ChainClient, TimeoutClient};

use crate::poller::{RangePoller, TickOutcome};

/// Lifecycle state of an [`EventIndexer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Returned by [`EventIndexer::start`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartReport {
    pub status: IndexerState,
    pub contract_address: String,
    pub event_signature: String,
    /// First block the indexer will (or did) scan.
    pub start_block: u64,
}

/// Returned by [`EventIndexer::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexerStatus {
    pub is_running: bool,
    pub state: IndexerState,
    pub persisted_cursor: Option<u64>,
    /// `None` when the chain client is unreachable.
    pub chain_tip: Option<u64>,
    pub contract_address: Option<String>,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct RunTarget {
    contract_address: String,
    event_signature: String,
    start_block: u64,
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

enum Next {
    After(Duration),
    Halt,
}

struct Inner {
    client: Arc<dyn ChainClient>,
    store: Arc<dyn RelationalStore>,
    cursors: Arc<dyn CursorStore>,
    config: IndexerConfig,
    retry: RetryPolicy,
    state: Mutex<IndexerState>,
    target: Mutex<Option<RunTarget>>,
    /// Held for the duration of every tick and every cursor write.
    lease: tokio::sync::Mutex<()>,
    /// Serialises start/stop and owns the worker task.
    worker: tokio::sync::Mutex<Option<Worker>>,
}

/// Continuously materialises one contract event into the relational store.
///
/// Cheap to clone; clones share the same worker and state.
#[derive(Clone)]
pub struct EventIndexer {
    inner: Arc<Inner>,
}

impl EventIndexer {
    /// Every client call is bounded by `config.call_timeout_ms`.
    pub fn new(
        client: Arc<dyn ChainClient>,
        store: Arc<dyn RelationalStore>,
        cursors: Arc<dyn CursorStore>,
        config: IndexerConfig,
    ) -> Self {
        let client: Arc<dyn ChainClient> = Arc::new(TimeoutClient::new(client, config.call_timeout()));
        Self {
            inner: Arc::new(Inner {
                client,
                store,
                cursors,
                retry: RetryPolicy::new(config.retry.clone()),
                config,
                state: Mutex::new(IndexerState::Stopped),
                target: Mutex::new(None),
                lease: tokio::sync::Mutex::new(()),
                worker: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.inner.config
    }

    pub fn state(&self) -> IndexerState {
        self.inner.state()
    }

    /// Validate the target, run one iteration synchronously and schedule the rest.
    ///
    /// Returns the current status without doing anything if the indexer is
    /// already starting or running. Configuration problems (bad address, no
    /// contract code, unparsable event) are returned as errors.
    pub async fn start(
        &self,
        contract_address: &str,
        start_block: Option<u64>,
        event_signature: &str,
    ) -> Result<StartReport, SyncError> {
        let mut worker = self.inner.worker.lock().await;

        let state = self.inner.state();
        if matches!(state, IndexerState::Running | IndexerState::Starting) {
            tracing::info!(?state, "indexer already running");
            return self.inner.report(state);
        }
        // A worker that halted on its own is still parked here.
        if let Some(old) = worker.take() {
            old.cancel.cancel();
            if let Err(e) = old.handle.await {
                tracing::error!(error = %e, "previous indexer worker panicked");
            }
        }

        self.inner.set_state(IndexerState::Starting);
        let poller = match self.inner.prepare(contract_address, start_block, event_signature).await {
            Ok(poller) => Arc::new(poller),
            Err(e) => {
                self.inner.set_state(IndexerState::Stopped);
                tracing::error!(contract = contract_address, error = %e, "indexer failed to start");
                return Err(e);
            }
        };

        let mut failures = 0;
        match self.inner.run_tick(&poller, &mut failures).await {
            Next::Halt => self.inner.report(IndexerState::Stopped),
            Next::After(delay) => {
                self.inner.set_state(IndexerState::Running);
                let cancel = CancellationToken::new();
                let handle = tokio::spawn(run_worker(
                    self.inner.clone(),
                    poller,
                    cancel.clone(),
                    delay,
                    failures,
                ));
                *worker = Some(Worker { cancel, handle });
                self.inner.report(IndexerState::Running)
            }
        }
    }

    /// Cancel the schedule, wait for an in-flight iteration, and persist
    /// `is_running = false`. No-op when already stopped.
    pub async fn stop(&self) -> Result<(), SyncError> {
        let mut worker = self.inner.worker.lock().await;
        let Some(w) = worker.take() else {
            return Ok(());
        };

        let was_running = self.inner.state() == IndexerState::Running;
        if was_running {
            self.inner.set_state(IndexerState::Stopping);
        }
        w.cancel.cancel();
        if let Err(e) = w.handle.await {
            tracing::error!(error = %e, "indexer worker panicked");
        }
        if !was_running {
            // Already halted by the worker itself.
            return Ok(());
        }

        let result = self.inner.mark_stopped().await;
        self.inner.set_state(IndexerState::Stopped);
        tracing::info!("indexer stopped");
        result
    }

    /// Pure read of the indexer's progress. Never fails: an unreachable
    /// chain reports `chain_tip: None`.
    pub async fn status(&self) -> IndexerStatus {
        let state = self.inner.state();
        let cursor = match self.inner.cursors.read().await {
            Ok(cursor) => cursor,
            Err(e) => {
                tracing::warn!(error = %e, "cursor unavailable for status");
                None
            }
        };
        let chain_tip = match self.inner.client.current_block_height().await {
            Ok(tip) => Some(tip),
            Err(e) => {
                tracing::debug!(error = %e, "chain tip unavailable for status");
                None
            }
        };
        let target = self.inner.target();

        IndexerStatus {
            is_running: matches!(state, IndexerState::Running | IndexerState::Starting),
            state,
            persisted_cursor: cursor.as_ref().and_then(|c| c.last_processed_block),
            chain_tip,
            contract_address: target
                .map(|t| t.contract_address)
                .or_else(|| cursor.as_ref().map(|c| c.contract_address.clone())),
            error_count: cursor.as_ref().map_or(0, |c| c.error_count),
            last_error: cursor.as_ref().and_then(|c| c.last_error.clone()),
            last_updated: cursor.as_ref().map(|c| c.updated_at),
        }
    }
}

async fn run_worker(
    inner: Arc<Inner>,
    poller: Arc<RangePoller>,
    cancel: CancellationToken,
    mut delay: Duration,
    mut failures: u32,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("indexer worker cancelled");
                break;
            }
            _ = tokio::time::sleep(delay) => {}
        }
        match inner.run_tick(&poller, &mut failures).await {
            Next::After(next) => delay = next,
            Next::Halt => break,
        }
    }
}

impl Inner {
    fn state(&self) -> IndexerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: IndexerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn target(&self) -> Option<RunTarget> {
        self.target.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn report(&self, status: IndexerState) -> Result<StartReport, SyncError> {
        let target = self
            .target()
            .ok_or_else(|| SyncError::Other("indexer has no target".into()))?;
        Ok(StartReport {
            status,
            contract_address: target.contract_address,
            event_signature: target.event_signature,
            start_block: target.start_block,
        })
    }

    async fn prepare(
        &self,
        contract_address: &str,
        start_block: Option<u64>,
        event_signature: &str,
    ) -> Result<RangePoller, SyncError> {
        if !is_valid_address(contract_address) {
            return Err(SyncError::Configuration(format!(
                "invalid contract address '{contract_address}'"
            )));
        }
        if self.config.chunk_size == 0 {
            return Err(SyncError::Configuration("chunk_size must be at least 1".into()));
        }
        let layout = EventLayout::parse(event_signature)?;
        let address = contract_address.to_ascii_lowercase();

        // Transient failures keep their variant so callers can retry `start`.
        let code = self
            .client
            .get_code(&address, None)
            .await
            .map_err(|e| e.context(format!("contract code check for {address}")))?;
        if is_empty_code(&code) {
            return Err(SyncError::Configuration(format!(
                "no contract code at {address}"
            )));
        }

        let requested = start_block.unwrap_or(self.config.default_start_block);
        let _lease = self.lease.lock().await;
        let mut cursor = match self.cursors.read().await? {
            Some(c)
                if c.contract_address.eq_ignore_ascii_case(&address)
                    && c.event_signature == layout.signature() =>
            {
                tracing::info!(block = ?c.last_processed_block, "resuming from cursor");
                c
            }
            Some(c) => {
                tracing::warn!(
                    previous = %c.contract_address,
                    previous_event = %c.event_signature,
                    "stored cursor tracks a different event, starting over"
                );
                Cursor {
                    created_at: c.created_at,
                    ..Cursor::seeded(&address, layout.signature(), requested)
                }
            }
            None => Cursor::seeded(&address, layout.signature(), requested),
        };
        cursor.is_running = true;
        cursor.touch();
        self.cursors.upsert(&cursor).await?;

        let first_block = requested.max(cursor.next_block());
        tracing::info!(
            contract = %address,
            event = %layout.signature(),
            start_block = first_block,
            chunk_size = self.config.chunk_size,
            "indexer starting"
        );
        *self.target.lock().unwrap_or_else(PoisonError::into_inner) = Some(RunTarget {
            contract_address: address.clone(),
            event_signature: layout.signature().to_string(),
            start_block: first_block,
        });

        Ok(RangePoller::new(
            self.client.clone(),
            self.store.clone(),
            self.cursors.clone(),
            layout,
            address,
            requested,
            self.config.chunk_size,
        ))
    }

    /// One iteration under the lease, followed by the scheduling decision.
    async fn run_tick(&self, poller: &RangePoller, failures: &mut u32) -> Next {
        let _lease = self.lease.lock().await;
        match poller.tick().await {
            Ok(outcome) => {
                if *failures > 0 {
                    tracing::info!(after_failures = *failures, "indexer recovered");
                }
                *failures = 0;
                if let TickOutcome::Processed(report) = outcome {
                    tracing::debug!(to = report.to, tip = report.tip, "tick complete");
                }
                Next::After(self.config.poll_interval())
            }
            Err(e) => {
                *failures += 1;
                self.record_failure(&e).await;
                if e.is_configuration() {
                    tracing::error!(error = %e, "configuration error, stopping indexer");
                    self.halt().await;
                    return Next::Halt;
                }
                match self.retry.next_delay(*failures) {
                    Some(delay) => {
                        tracing::warn!(
                            attempt = *failures,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "poll iteration failed, retrying"
                        );
                        Next::After(delay)
                    }
                    None => {
                        tracing::error!(
                            attempts = *failures,
                            error = %e,
                            "max retries exceeded, stopping indexer"
                        );
                        self.halt().await;
                        Next::Halt
                    }
                }
            }
        }
    }

    async fn record_failure(&self, error: &SyncError) {
        let result = async {
            if let Some(mut cursor) = self.cursors.read().await? {
                cursor.error_count += 1;
                cursor.last_error = Some(error.to_string());
                cursor.touch();
                self.cursors.upsert(&cursor).await?;
            }
            Ok::<_, SyncError>(())
        }
        .await;
        if let Err(e) = result {
            tracing::warn!(error = %e, "could not record indexer failure");
        }
    }

    /// Stop from inside a tick: persist `is_running = false`, keep the cursor.
    async fn halt(&self) {
        if let Err(e) = self.write_stopped().await {
            tracing::warn!(error = %e, "could not persist stopped state");
        }
        self.set_state(IndexerState::Stopped);
    }

    async fn mark_stopped(&self) -> Result<(), SyncError> {
        let _lease = self.lease.lock().await;
        self.write_stopped().await
    }

    async fn write_stopped(&self) -> Result<(), SyncError> {
        if let Some(mut cursor) = self.cursors.read().await? {
            cursor.is_running = false;
            cursor.touch();
            self.cursors.upsert(&cursor).await?;
        }
        Ok(())
    }
}
