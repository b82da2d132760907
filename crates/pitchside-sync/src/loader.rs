//! # Priority Loader
//!
//! Cache-first loading with request deduplication and tiered prefetch.
//!
//! ## Load Path
//! ```text
//! load_progressively(key, loader, opts)
//!    │
//!    ├── cache hit ─────────────────────────────► value
//!    ├── key in flight ──► await shared future ──► same result as the owner
//!    └── otherwise
//!          spawn ─► retry_with_backoff(loader) ─► Ok: cache.set(key)
//!                                              └► remove in-flight entry
//! ```
//!
//! ## Preload Tiers
//! ```text
//! priority ≥ 8  HIGH    ──► join_all, awaited
//!                             │ (whole tier settles)
//! priority 5–7  MEDIUM  ──► join_all, awaited
//!                             │
//! priority < 5  LOW     ──► spawned, never awaited
//! ```
//!
//! Cancellation is coarse: [`PriorityLoader::shutdown`] aborts every in-flight
//! load and background preload. One load cannot be cancelled on its own.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::{join_all, BoxFuture, FutureExt, Shared};
use pitchside_core::{CacheKey, PriorityTier};
use serde_json::Value;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use crate::cache::QueryCache;
use crate::config::LoaderSettings;
use crate::error::{SyncError, SyncResult};
use crate::lazy::{self, ElementId, LazyLoadHandle, ViewportObserver};
use crate::lock;
use crate::retry::retry_with_backoff;

type SharedLoad = Shared<BoxFuture<'static, SyncResult<Value>>>;

/// Loader function for one resource.
pub type LoadFn = Arc<dyn Fn() -> BoxFuture<'static, SyncResult<Value>> + Send + Sync>;

/// Per-call load options.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Cache lifetime. `None` uses the cache's default TTL.
    pub ttl: Option<Duration>,
    /// Numeric priority; see [`PriorityTier::from_priority`].
    pub priority: u8,
    /// Retries after the first failure. `None` uses the loader default.
    pub retries: Option<u32>,
}

/// One entry for [`PriorityLoader::preload_critical`].
#[derive(Clone)]
pub struct PreloadResource {
    pub key: String,
    pub priority: u8,
    pub ttl: Option<Duration>,
    pub loader: LoadFn,
}

impl PreloadResource {
    pub fn new<F, Fut>(key: impl Into<String>, priority: u8, loader: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SyncResult<Value>> + Send + 'static,
    {
        PreloadResource {
            key: key.into(),
            priority,
            ttl: None,
            loader: Arc::new(move || loader().boxed()),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn tier(&self) -> PriorityTier {
        PriorityTier::from_priority(self.priority)
    }
}

impl std::fmt::Debug for PreloadResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreloadResource")
            .field("key", &self.key)
            .field("priority", &self.priority)
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// Outcome of a preload pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreloadSummary {
    /// High and medium items that loaded.
    pub loaded: usize,
    /// High and medium items that failed after retries.
    pub failed: usize,
    /// Low items handed to the background.
    pub deferred: usize,
}

struct InFlight {
    id: u64,
    future: SharedLoad,
    abort: AbortHandle,
}

struct LoaderInner {
    cache: Arc<QueryCache>,
    in_flight: Mutex<HashMap<String, InFlight>>,
    background: Mutex<Vec<JoinHandle<()>>>,
    next_id: AtomicU64,
    retries: u32,
    base_delay: Duration,
}

/// Priority loader handle. Cheap to clone.
#[derive(Clone)]
pub struct PriorityLoader {
    inner: Arc<LoaderInner>,
}

impl PriorityLoader {
    pub fn new(cache: Arc<QueryCache>, settings: &LoaderSettings) -> Self {
        PriorityLoader {
            inner: Arc::new(LoaderInner {
                cache,
                in_flight: Mutex::new(HashMap::new()),
                background: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                retries: settings.retries,
                base_delay: settings.base_delay(),
            }),
        }
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.inner.cache
    }

    /// Keys with a load currently running.
    pub fn in_flight(&self) -> usize {
        lock(&self.inner.in_flight).len()
    }

    /// Loads `key` through the cache, joining an identical in-flight load.
    pub async fn load_progressively<F, Fut>(
        &self,
        key: &str,
        loader: F,
        options: LoadOptions,
    ) -> SyncResult<Value>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SyncResult<Value>> + Send + 'static,
    {
        if let Some(hit) = self.inner.cache.get(key) {
            return Ok(hit);
        }

        let shared = {
            let mut in_flight = lock(&self.inner.in_flight);
            if let Some(existing) = in_flight.get(key) {
                debug!(key, "Joining in-flight load");
                existing.future.clone()
            } else if let Some(hit) = self.inner.cache.get(key) {
                // Finished between the first lookup and taking the lock
                return Ok(hit);
            } else {
                let entry = self.spawn_load(key, loader, options);
                let future = entry.future.clone();
                in_flight.insert(key.to_string(), entry);
                future
            }
        };

        shared.await
    }

    /// [`load_progressively`](Self::load_progressively) keyed by an entity
    /// query, so callers passing the same params in any order share one load.
    pub async fn load_query<F, Fut>(
        &self,
        key: &CacheKey,
        loader: F,
        options: LoadOptions,
    ) -> SyncResult<Value>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SyncResult<Value>> + Send + 'static,
    {
        self.load_progressively(&key.to_string(), loader, options).await
    }

    fn spawn_load<F, Fut>(&self, key: &str, loader: F, options: LoadOptions) -> InFlight
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SyncResult<Value>> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let ttl = options.ttl.unwrap_or_else(|| self.inner.cache.default_ttl());
        let retries = options.retries.unwrap_or(self.inner.retries);
        let base_delay = self.inner.base_delay;
        let inner = Arc::clone(&self.inner);
        let owned_key = key.to_string();

        debug!(key, id, priority = options.priority, "Starting load");
        let task = tokio::spawn(async move {
            let result = retry_with_backoff(&owned_key, base_delay, retries, &loader).await;
            if let Ok(value) = &result {
                inner.cache.set(&owned_key, value.clone(), ttl);
            }

            let mut in_flight = lock(&inner.in_flight);
            if in_flight.get(&owned_key).is_some_and(|entry| entry.id == id) {
                in_flight.remove(&owned_key);
            }
            result
        });
        let abort = task.abort_handle();

        let future = async move {
            match task.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(SyncError::ShuttingDown),
                Err(e) => Err(SyncError::Internal(format!("load task failed: {e}"))),
            }
        }
        .boxed()
        .shared();

        InFlight { id, future, abort }
    }

    /// Tiered prefetch: high, then medium, each fully settled before the
    /// next starts; low is started in the background and not awaited.
    pub async fn preload_critical(&self, resources: Vec<PreloadResource>) -> PreloadSummary {
        let mut tiers: HashMap<PriorityTier, Vec<PreloadResource>> = HashMap::new();
        for resource in resources {
            tiers.entry(resource.tier()).or_default().push(resource);
        }

        let mut summary = PreloadSummary::default();
        for tier in [PriorityTier::High, PriorityTier::Medium] {
            let batch = tiers.remove(&tier).unwrap_or_default();
            if batch.is_empty() {
                continue;
            }
            debug!(?tier, count = batch.len(), "Preloading tier");

            let results = join_all(batch.into_iter().map(|resource| {
                let key = resource.key.clone();
                async move { (key, self.load_resource(resource).await) }
            }))
            .await;

            for (key, result) in results {
                match result {
                    Ok(_) => summary.loaded += 1,
                    Err(e) => {
                        warn!(key, ?e, ?tier, "Preload failed");
                        summary.failed += 1;
                    }
                }
            }
        }

        let low = tiers.remove(&PriorityTier::Low).unwrap_or_default();
        summary.deferred = low.len();
        if !low.is_empty() {
            let mut background = lock(&self.inner.background);
            background.retain(|handle| !handle.is_finished());
            for resource in low {
                let loader = self.clone();
                background.push(tokio::spawn(async move {
                    let key = resource.key.clone();
                    if let Err(e) = loader.load_resource(resource).await {
                        warn!(key, ?e, "Background preload failed");
                    }
                }));
            }
        }

        info!(
            loaded = summary.loaded,
            failed = summary.failed,
            deferred = summary.deferred,
            "Critical preload finished"
        );
        summary
    }

    async fn load_resource(&self, resource: PreloadResource) -> SyncResult<Value> {
        let options = LoadOptions {
            ttl: resource.ttl,
            priority: resource.priority,
            retries: None,
        };
        let loader = resource.loader;
        self.load_progressively(&resource.key, move || loader(), options)
            .await
    }

    /// Runs `loader` once for each element matching `selector` when it first
    /// becomes visible.
    pub fn setup_lazy_loading<F, Fut>(
        &self,
        observer: Arc<dyn ViewportObserver>,
        selector: &str,
        loader: F,
    ) -> LazyLoadHandle
    where
        F: Fn(ElementId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SyncResult<()>> + Send + 'static,
    {
        lazy::setup(observer, selector, loader)
    }

    /// Aborts every in-flight load and background preload. Their waiters
    /// receive [`SyncError::ShuttingDown`].
    pub fn shutdown(&self) {
        let in_flight: Vec<InFlight> = lock(&self.inner.in_flight)
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        let background: Vec<JoinHandle<()>> = lock(&self.inner.background).drain(..).collect();

        info!(
            in_flight = in_flight.len(),
            background = background.len(),
            "Shutting down loader"
        );
        for entry in in_flight {
            entry.abort.abort();
        }
        for handle in background {
            handle.abort();
        }
    }
}
