//! # Sync Orchestrator
//!
//! Ties push updates from the channel and the periodic reconciliation poll
//! to the cache and to the application's event emitter.
//!
//! ## Data Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Orchestrator                                │
//! │                                                                         │
//! │  PUSH (low latency, best effort)                                       │
//! │  ConnectionManager ── "match_events" ──► bust "match:{matchId}:"       │
//! │                                          emit ChangeEvent::Pushed       │
//! │                                                                         │
//! │  POLL (every 30s, durability backstop)                                 │
//! │  started = now()                                                       │
//! │  ReconcileSource.fetch_pending(last_sync) ──► [delta, delta, ...]      │
//! │     decode all ── any bad record ──► abort, last_sync unchanged        │
//! │     for each delta in order:                                           │
//! │        bust "{entity}:{entityId}:"                                     │
//! │        emit ChangeEvent::Reconciled                                    │
//! │     CursorStore.save(last_sync = started)                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use pitchside_core::{entity_prefix, SyncDelta};
use pitchside_store::{CursorStore, LAST_SYNC_CURSOR};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::QueryCache;
use crate::connection::ConnectionManager;
use crate::error::{SyncError, SyncResult};
use crate::events::{ChangeEvent, SyncEventEmitter, SyncStatus};
use crate::lock;
use crate::offline::OfflineQueue;
use crate::protocol::{InboundMessage, TOPIC_MATCH_EVENTS};
use crate::pubsub::Subscription;

/// Where reconciliation deltas come from.
#[async_trait]
pub trait ReconcileSource: Send + Sync {
    /// Raw delta records changed since `last_sync` (epoch ms), oldest first.
    async fn fetch_pending(&self, last_sync: i64) -> SyncResult<Vec<Value>>;
}

/// Collaborators the orchestrator drives.
pub struct OrchestratorDeps {
    pub connection: ConnectionManager,
    pub cache: Arc<QueryCache>,
    pub source: Arc<dyn ReconcileSource>,
    pub cursors: Arc<dyn CursorStore>,
    pub emitter: Arc<dyn SyncEventEmitter>,
    /// Reported in [`SyncStatus::pending_offline`] when present.
    pub offline: Option<OfflineQueue>,
}

#[derive(Default)]
struct OrchestratorState {
    last_sync: Option<i64>,
    last_error: Option<String>,
    ticker: Option<JoinHandle<()>>,
    status_watch: Option<JoinHandle<()>>,
    push: Option<Subscription>,
}

struct OrchestratorInner {
    deps: OrchestratorDeps,
    interval: Duration,
    state: Mutex<OrchestratorState>,
    reconciling: tokio::sync::Mutex<()>,
}

/// Orchestrator handle. Cheap to clone.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl SyncOrchestrator {
    pub fn new(deps: OrchestratorDeps, interval: Duration) -> Self {
        SyncOrchestrator {
            inner: Arc::new(OrchestratorInner {
                deps,
                interval,
                state: Mutex::new(OrchestratorState::default()),
                reconciling: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Restores the cursor, subscribes to pushes, opens the channel and
    /// starts the reconciliation interval. Calling it twice is a no-op.
    pub async fn start(&self) -> SyncResult<()> {
        if lock(&self.inner.state).ticker.is_some() {
            debug!("Orchestrator already running");
            return Ok(());
        }

        let restored = self.inner.deps.cursors.load_cursor(LAST_SYNC_CURSOR).await?;
        let push = self.subscribe_push();
        let status_watch = self.spawn_status_watch();
        let ticker = self.spawn_ticker();

        {
            let mut state = lock(&self.inner.state);
            if state.ticker.is_some() {
                // Lost a race with a concurrent start
                ticker.abort();
                status_watch.abort();
                return Ok(());
            }
            if state.last_sync.is_none() {
                state.last_sync = restored;
            }
            state.push = Some(push);
            state.ticker = Some(ticker);
            state.status_watch = Some(status_watch);
        }

        info!(
            last_sync = ?restored,
            interval_secs = self.inner.interval.as_secs(),
            "Sync orchestrator started"
        );
        self.inner.deps.connection.connect();
        Ok(())
    }

    fn subscribe_push(&self) -> Subscription {
        let cache = Arc::clone(&self.inner.deps.cache);
        let emitter = Arc::clone(&self.inner.deps.emitter);

        self.inner
            .deps
            .connection
            .subscribe(TOPIC_MATCH_EVENTS, move |message| {
                if let Some(match_id) = message.match_id() {
                    let removed = cache.invalidate_pattern(&entity_prefix("match", match_id));
                    debug!(match_id, removed, "Match event busted cache");
                }
                emitter.emit_change(&ChangeEvent::Pushed {
                    topic: message.topic().to_string(),
                    payload: message.payload().clone(),
                });
            })
    }

    fn spawn_ticker(&self) -> JoinHandle<()> {
        let weak: Weak<OrchestratorInner> = Arc::downgrade(&self.inner);
        let period = self.inner.interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let orchestrator = SyncOrchestrator { inner };
                if let Err(e) = orchestrator.reconcile_now().await {
                    warn!(?e, "Reconciliation failed, retrying next interval");
                }
            }
        })
    }

    fn spawn_status_watch(&self) -> JoinHandle<()> {
        let weak: Weak<OrchestratorInner> = Arc::downgrade(&self.inner);
        let mut changes = self.inner.deps.connection.state_changes();

        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                SyncOrchestrator { inner }.emit_status();
            }
        })
    }

    /// Runs one reconciliation pass. Returns how many deltas were applied.
    pub async fn reconcile_now(&self) -> SyncResult<usize> {
        let _running = self.inner.reconciling.lock().await;

        match self.reconcile_once().await {
            Ok(applied) => {
                self.emit_status();
                Ok(applied)
            }
            Err(e) => {
                lock(&self.inner.state).last_error = Some(e.to_string());
                self.emit_status();
                Err(e)
            }
        }
    }

    async fn reconcile_once(&self) -> SyncResult<usize> {
        let deps = &self.inner.deps;
        let since = lock(&self.inner.state).last_sync.unwrap_or(0);
        let started_at = Utc::now().timestamp_millis();

        let records = deps.source.fetch_pending(since).await?;
        let deltas = records
            .into_iter()
            .map(serde_json::from_value::<SyncDelta>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| SyncError::InvalidMessage(format!("Bad delta record: {e}")))?;

        for delta in &deltas {
            deps.cache.invalidate_pattern(&delta.cache_prefix());
            deps.emitter.emit_change(&ChangeEvent::Reconciled(delta.clone()));
        }

        deps.cursors.save_cursor(LAST_SYNC_CURSOR, started_at).await?;
        {
            let mut state = lock(&self.inner.state);
            state.last_sync = Some(started_at);
            state.last_error = None;
        }

        if !deltas.is_empty() {
            info!(applied = deltas.len(), since, "Reconciled server changes");
        }
        Ok(deltas.len())
    }

    /// Joins the match room and calls `callback` for that match's events.
    /// Dropping the handle leaves the room.
    pub fn subscribe_to_match<F>(&self, match_id: &str, callback: F) -> MatchSubscription
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        let connection = &self.inner.deps.connection;
        connection.join_match(match_id);

        let wanted = match_id.to_string();
        let subscription = connection.subscribe(TOPIC_MATCH_EVENTS, move |message| {
            if message.match_id() == Some(wanted.as_str()) {
                callback(message);
            }
        });

        MatchSubscription {
            match_id: match_id.to_string(),
            connection: connection.clone(),
            _subscription: subscription,
        }
    }

    pub fn get_status(&self) -> SyncStatus {
        let deps = &self.inner.deps;
        let connection_state = deps.connection.state();
        let state = lock(&self.inner.state);

        SyncStatus {
            connection_state,
            is_connected: deps.connection.is_connected(),
            last_sync: state.last_sync,
            pending_offline: deps.offline.as_ref().map(|q| q.status().pending).unwrap_or(0),
            cached_entries: deps.cache.len(),
            last_error: state.last_error.clone(),
            reconcile_running: state.ticker.as_ref().is_some_and(|t| !t.is_finished()),
        }
    }

    fn emit_status(&self) {
        self.inner.deps.emitter.emit_status(&self.get_status());
    }

    /// Stops the interval, drops the push subscription and disconnects the
    /// channel. Safe to call more than once.
    pub fn cleanup(&self) {
        let (ticker, status_watch, push) = {
            let mut state = lock(&self.inner.state);
            (state.ticker.take(), state.status_watch.take(), state.push.take())
        };

        let was_running = ticker.is_some();
        if let Some(ticker) = ticker {
            ticker.abort();
        }
        if let Some(watch) = status_watch {
            watch.abort();
        }
        drop(push);

        self.inner.deps.connection.disconnect();
        if was_running {
            info!("Sync orchestrator stopped");
            self.emit_status();
        }
    }
}

/// Room membership for one match. Sends `leave_match` when dropped.
#[must_use = "dropping a MatchSubscription leaves the match immediately"]
pub struct MatchSubscription {
    match_id: String,
    connection: ConnectionManager,
    _subscription: Subscription,
}

impl MatchSubscription {
    pub fn match_id(&self) -> &str {
        &self.match_id
    }
}

impl Drop for MatchSubscription {
    fn drop(&mut self) {
        self.connection.leave_match(&self.match_id);
    }
}
