//! # Offline Durability Queue
//!
//! Persisted FIFO of user mutations made while the channel was down.
//!
//! ## Replay Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Offline Queue Replay                              │
//! │                                                                         │
//! │  enqueue(action, payload)                                              │
//! │     │  store.append(item)  ── returns only once durable                │
//! │     ▼                                                                   │
//! │  [ A ][ B ][ C ]  ◄── front                                            │
//! │     │                                                                   │
//! │     │  set_online(true) / enqueue while online                         │
//! │     ▼                                                                   │
//! │  drain(): while online                                                 │
//! │     take front ──► handler[action].handle(item)                        │
//! │        │                                                                │
//! │        ├── Ok              → remove                                    │
//! │        ├── Err, retries<max → retry_count+1, move to BACK              │
//! │        └── Err, retries=max → remove, emit_replay_failure              │
//! │     store.persist(snapshot) after every settled item                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A failing item moves behind later items, so later successes can overtake
//! it. Items are never dropped without either succeeding or producing exactly
//! one terminal [`ReplayFailure`] report.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use pitchside_core::{OfflineAction, OfflineQueueItem, QueueStatus, ReplayFailure};
use pitchside_store::DurableQueue;
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::events::SyncEventEmitter;

/// Replays one queued action against its remote collaborator.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, item: &OfflineQueueItem) -> SyncResult<()>;
}

struct QueueInner {
    store: Arc<dyn DurableQueue>,
    items: Mutex<VecDeque<OfflineQueueItem>>,
    /// Set while the store lags behind `items` after a failed persist.
    store_stale: AtomicBool,
    handlers: RwLock<HashMap<OfflineAction, Arc<dyn ActionHandler>>>,
    max_retries: u32,
    emitter: Arc<dyn SyncEventEmitter>,
    status_tx: watch::Sender<QueueStatus>,
}

/// Offline queue handle. Cheap to clone.
#[derive(Clone)]
pub struct OfflineQueue {
    inner: Arc<QueueInner>,
}

impl OfflineQueue {
    /// Opens the queue on `store`, restoring whatever it holds.
    ///
    /// The queue starts offline; call [`set_online`](Self::set_online) once
    /// the network state is known.
    pub async fn open(
        store: Arc<dyn DurableQueue>,
        max_retries: u32,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> SyncResult<Self> {
        let restored = store.drain_in_order().await?;
        info!(
            backend = store.backend_name(),
            restored = restored.len(),
            "Offline queue opened"
        );

        let (status_tx, _) = watch::channel(QueueStatus {
            pending: restored.len(),
            is_online: false,
            is_draining: false,
        });

        Ok(OfflineQueue {
            inner: Arc::new(QueueInner {
                store,
                items: Mutex::new(restored.into()),
                store_stale: AtomicBool::new(false),
                handlers: RwLock::new(HashMap::new()),
                max_retries,
                emitter,
                status_tx,
            }),
        })
    }

    /// Registers the replay handler for `action`, replacing any previous one.
    pub fn register_handler(&self, action: OfflineAction, handler: Arc<dyn ActionHandler>) {
        self.inner
            .handlers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(action, handler);
    }

    /// Appends a mutation. Returns once the durable store holds it.
    ///
    /// If the queue is online a drain starts immediately.
    pub async fn enqueue(&self, action: OfflineAction, payload: Value) -> SyncResult<OfflineQueueItem> {
        let item = OfflineQueueItem::new(action, payload);
        {
            let mut items = self.inner.items.lock().await;
            self.inner.store.append(&item).await?;
            items.push_back(item.clone());
            let pending = items.len();
            self.inner.status_tx.send_modify(|s| s.pending = pending);
            debug!(id = %item.id, %action, pending, "Queued offline action");
        }

        if self.status().is_online {
            self.spawn_drain();
        }
        Ok(item)
    }

    pub fn status(&self) -> QueueStatus {
        *self.inner.status_tx.borrow()
    }

    pub fn status_changes(&self) -> watch::Receiver<QueueStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Current queue contents, front first.
    pub async fn snapshot(&self) -> Vec<OfflineQueueItem> {
        self.inner.items.lock().await.iter().cloned().collect()
    }

    /// Records a network transition. Going online starts a drain.
    pub fn set_online(&self, online: bool) {
        let changed = self.inner.status_tx.send_if_modified(|s| {
            let changed = s.is_online != online;
            s.is_online = online;
            changed
        });
        if !changed {
            return;
        }

        info!(online, "Offline queue network state changed");
        if online {
            self.spawn_drain();
        }
    }

    fn spawn_drain(&self) {
        let queue = self.clone();
        tokio::spawn(async move {
            if let Err(e) = queue.drain().await {
                warn!(?e, "Offline queue drain stopped");
            }
        });
    }

    /// Replays queued items in order until the queue is empty or the network
    /// goes away. Returns how many items settled (succeeded or were dropped).
    ///
    /// Only one drain runs at a time; a second call returns `Ok(0)`.
    pub async fn drain(&self) -> SyncResult<usize> {
        let mut settled = 0usize;
        loop {
            let started = self.inner.status_tx.send_if_modified(|s| {
                if s.is_draining {
                    return false;
                }
                s.is_draining = true;
                true
            });
            if !started {
                debug!("Drain already running");
                return Ok(settled);
            }

            settled += {
                let _guard = DrainGuard(&self.inner.status_tx);
                self.drain_pass().await?
            };

            // An enqueue racing the end of the pass saw `is_draining` set
            let pending = self.inner.items.lock().await.len();
            if !self.status().is_online || pending == 0 {
                return Ok(settled);
            }
        }
    }

    async fn drain_pass(&self) -> SyncResult<usize> {
        if self.inner.store_stale.load(Ordering::Acquire) {
            let mut items = self.inner.items.lock().await;
            self.persist_snapshot(&mut items).await?;
            debug!(pending = items.len(), "Stale queue snapshot rewritten");
        }

        let mut settled = 0usize;
        loop {
            if !self.status().is_online {
                debug!("Went offline, pausing drain");
                break;
            }

            let Some(item) = self.inner.items.lock().await.front().cloned() else {
                break;
            };

            let outcome = self.replay(&item).await;

            let (failure, persisted) = {
                let mut items = self.inner.items.lock().await;
                if let Some(pos) = items.iter().position(|queued| queued.id == item.id) {
                    items.remove(pos);
                }

                let failure = match outcome {
                    Ok(()) => {
                        debug!(id = %item.id, action = %item.action, "Offline action replayed");
                        settled += 1;
                        None
                    }
                    Err(e) if !item.retries_exhausted(self.inner.max_retries) => {
                        let mut retried = item;
                        retried.retry_count += 1;
                        warn!(
                            id = %retried.id,
                            action = %retried.action,
                            retry_count = retried.retry_count,
                            ?e,
                            "Offline replay failed, moving to back of queue"
                        );
                        items.push_back(retried);
                        None
                    }
                    Err(e) => {
                        error!(
                            id = %item.id,
                            action = %item.action,
                            retry_count = item.retry_count,
                            ?e,
                            "Offline replay failed permanently, dropping item"
                        );
                        settled += 1;
                        Some(ReplayFailure {
                            item,
                            error: e.to_string(),
                        })
                    }
                };

                let persisted = self.persist_snapshot(&mut items).await;
                (failure, persisted)
            };

            if let Some(failure) = failure {
                self.inner.emitter.emit_replay_failure(&failure);
            }
            persisted?;
        }

        Ok(settled)
    }

    /// Writes `items` to the store and publishes the pending count.
    ///
    /// The count tracks memory even when the write fails; the store is then
    /// marked stale and rewritten at the start of the next pass.
    async fn persist_snapshot(&self, items: &mut VecDeque<OfflineQueueItem>) -> SyncResult<()> {
        let result = self.inner.store.persist(items.make_contiguous()).await;
        let pending = items.len();
        self.inner.status_tx.send_modify(|s| s.pending = pending);

        match result {
            Ok(()) => {
                self.inner.store_stale.store(false, Ordering::Release);
                Ok(())
            }
            Err(e) => {
                self.inner.store_stale.store(true, Ordering::Release);
                error!(?e, pending, "Failed to persist offline queue snapshot");
                Err(e.into())
            }
        }
    }

    async fn replay(&self, item: &OfflineQueueItem) -> SyncResult<()> {
        let handler = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&item.action)
            .cloned();

        match handler {
            Some(handler) => handler.handle(item).await,
            None => Err(SyncError::NoHandler(item.action.to_string())),
        }
    }
}

/// Clears `is_draining` however the drain exits.
struct DrainGuard<'a>(&'a watch::Sender<QueueStatus>);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|s| s.is_draining = false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoOpEmitter;
    use pitchside_store::MemoryQueue;
    use serde_json::json;

    struct AlwaysOk;

    #[async_trait]
    impl ActionHandler for AlwaysOk {
        async fn handle(&self, _item: &OfflineQueueItem) -> SyncResult<()> {
            Ok(())
        }
    }

    async fn open_queue(store: Arc<MemoryQueue>) -> OfflineQueue {
        OfflineQueue::open(store, 3, Arc::new(NoOpEmitter)).await.unwrap()
    }

    #[tokio::test]
    async fn test_enqueue_persists_before_returning() {
        let store = Arc::new(MemoryQueue::new());
        let queue = open_queue(store.clone()).await;

        let item = queue.enqueue(OfflineAction::Sync, json!({"n": 1})).await.unwrap();
        assert_eq!(item.retry_count, 0);

        let stored = store.drain_in_order().await.unwrap();
        assert_eq!(stored, vec![item]);
        assert_eq!(queue.status().pending, 1);
        assert!(!queue.status().is_online);
    }

    #[tokio::test]
    async fn test_open_restores_snapshot() {
        let store = Arc::new(MemoryQueue::new());
        let seeded = OfflineQueueItem::new(OfflineAction::UpdateProfile, json!({}));
        store.append(&seeded).await.unwrap();

        let queue = open_queue(store).await;
        assert_eq!(queue.status().pending, 1);
        assert_eq!(queue.snapshot().await, vec![seeded]);
    }

    #[tokio::test]
    async fn test_drain_offline_is_noop() {
        let queue = open_queue(Arc::new(MemoryQueue::new())).await;
        queue.register_handler(OfflineAction::Sync, Arc::new(AlwaysOk));
        queue.enqueue(OfflineAction::Sync, json!({})).await.unwrap();

        assert_eq!(queue.drain().await.unwrap(), 0);
        assert_eq!(queue.status().pending, 1);
    }

    #[tokio::test]
    async fn test_online_drain_empties_store() {
        let store = Arc::new(MemoryQueue::new());
        let queue = open_queue(store.clone()).await;
        queue.register_handler(OfflineAction::Sync, Arc::new(AlwaysOk));
        queue.enqueue(OfflineAction::Sync, json!({"n": 1})).await.unwrap();
        queue.enqueue(OfflineAction::Sync, json!({"n": 2})).await.unwrap();

        let mut status = queue.status_changes();
        queue.set_online(true);
        status
            .wait_for(|s| s.pending == 0 && !s.is_draining)
            .await
            .unwrap();

        assert!(store.drain_in_order().await.unwrap().is_empty());
    }
}
