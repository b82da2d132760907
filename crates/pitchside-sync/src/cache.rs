//! # Read-Through Query Cache
//!
//! TTL cache of JSON values keyed by `{kind}:{id}:{query}:{hash}` strings.
//!
//! ```text
//! cache_query(key, producer, ttl)
//!    │
//!    ├── hit, fresh   ──► cached value             (producer not called)
//!    ├── hit, stale   ──► evict, fall through
//!    └── miss         ──► producer().await
//!                            ├── Ok(v)  ──► store (key, v, now, ttl) ──► v
//!                            └── Err(e) ──► Err(e)  (nothing stored)
//!
//! invalidate_pattern("player:42:")  ──► drop every key with that prefix
//! ```
//!
//! Staleness is checked on read (`now - stored_at > ttl`), so a stale entry
//! is never returned even before [`QueryCache::purge_expired`] runs. With
//! `max_entries` set the least recently used entry is evicted on overflow.

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use lru::LruCache;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::CacheSettings;
use crate::lock;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_stale(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) > self.ttl
    }
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries discarded because their TTL elapsed.
    pub expired: u64,
    /// Entries discarded by the LRU bound.
    pub evicted: u64,
}

struct State {
    entries: LruCache<String, CacheEntry>,
    stats: CacheStats,
}

pub struct QueryCache {
    state: Mutex<State>,
    default_ttl: Duration,
}

impl QueryCache {
    /// `max_entries = None` keeps every entry until its TTL elapses.
    pub fn new(default_ttl: Duration, max_entries: Option<usize>) -> Self {
        let entries = match max_entries.and_then(NonZeroUsize::new) {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };
        QueryCache {
            state: Mutex::new(State {
                entries,
                stats: CacheStats::default(),
            }),
            default_ttl,
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(settings.default_ttl(), settings.max_entries)
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Returns the value under `key` if present and unexpired.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let mut guard = lock(&self.state);
        let state = &mut *guard;

        let stale = match state.entries.get(key) {
            Some(entry) if !entry.is_stale(now) => {
                let value = entry.value.clone();
                state.stats.hits += 1;
                return Some(value);
            }
            Some(_) => true,
            None => false,
        };

        if stale {
            state.entries.pop(key);
            state.stats.expired += 1;
            debug!(key, "Cache entry expired");
        }
        state.stats.misses += 1;
        None
    }

    /// Typed [`get`](Self::get). A value that does not convert counts as a miss.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                debug!(key, %e, "Cached value has a different shape, treating as miss");
                None
            }
        }
    }

    /// Stores `value` under `key` for `ttl`.
    pub fn set(&self, key: &str, value: Value, ttl: Duration) {
        let entry = CacheEntry {
            value,
            stored_at: Instant::now(),
            ttl,
        };
        let mut state = lock(&self.state);
        if let Some((evicted, _)) = state.entries.push(key.to_string(), entry) {
            if evicted != key {
                state.stats.evicted += 1;
                debug!(key = %evicted, "Cache entry evicted");
            }
        }
    }

    /// Read-through lookup: cached value if fresh, otherwise `producer()`.
    ///
    /// A producer error is returned as-is and nothing is cached.
    pub async fn cache_query<T, E, F, Fut>(&self, key: &str, ttl: Duration, producer: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get_as::<T>(key) {
            return Ok(hit);
        }

        let produced = producer().await?;
        match serde_json::to_value(&produced) {
            Ok(value) => self.set(key, value, ttl),
            Err(e) => warn!(key, %e, "Produced value is not JSON-representable, not caching"),
        }
        Ok(produced)
    }

    /// Removes every entry whose key starts with `prefix`. Returns how many.
    pub fn invalidate_pattern(&self, prefix: &str) -> usize {
        let mut state = lock(&self.state);
        let doomed: Vec<String> = state
            .entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            state.entries.pop(key);
        }
        if !doomed.is_empty() {
            debug!(prefix, removed = doomed.len(), "Cache prefix invalidated");
        }
        doomed.len()
    }

    pub fn clear(&self) {
        lock(&self.state).entries.clear();
    }

    /// Drops every stale entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = lock(&self.state);
        let stale: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_stale(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &stale {
            state.entries.pop(key);
        }
        state.stats.expired += stale.len() as u64;
        stale.len()
    }

    pub fn stats(&self) -> CacheStats {
        lock(&self.state).stats
    }

    /// Entries held, including stale ones not yet purged.
    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache() -> QueryCache {
        QueryCache::new(Duration::from_secs(300), None)
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_respects_ttl() {
        let cache = cache();
        cache.set("player:1:stats:0", json!(1), Duration::from_secs(10));

        assert_eq!(cache.get("player:1:stats:0"), Some(json!(1)));

        // Exactly at the TTL the entry is still fresh
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.get("player:1:stats:0"), Some(json!(1)));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.get("player:1:stats:0"), None);
        assert_eq!(cache.len(), 0);

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expired, 1);
    }

    #[tokio::test]
    async fn test_producer_error_caches_nothing() {
        let cache = cache();
        let result: Result<i32, String> = cache
            .cache_query("team:7:perf", Duration::from_secs(60), || async {
                Err("backend down".to_string())
            })
            .await;

        assert_eq!(result, Err("backend down".to_string()));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_get_as_shape_mismatch_is_miss() {
        let cache = cache();
        cache.set("k", json!({"a": 1}), Duration::from_secs(60));
        assert_eq!(cache.get_as::<Vec<i32>>("k"), None);
        assert_eq!(cache.get_as::<Value>("k"), Some(json!({"a": 1})));
    }

    #[test]
    fn test_lru_bound_evicts_oldest() {
        let cache = QueryCache::new(Duration::from_secs(60), Some(2));
        cache.set("a", json!(1), Duration::from_secs(60));
        cache.set("b", json!(2), Duration::from_secs(60));
        // Touch "a" so "b" is least recently used
        assert!(cache.get("a").is_some());
        cache.set("c", json!(3), Duration::from_secs(60));

        assert_eq!(cache.get("b"), None);
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().evicted, 1);
    }

    #[test]
    fn test_overwrite_is_not_eviction() {
        let cache = QueryCache::new(Duration::from_secs(60), Some(1));
        cache.set("a", json!(1), Duration::from_secs(60));
        cache.set("a", json!(2), Duration::from_secs(60));
        assert_eq!(cache.get("a"), Some(json!(2)));
        assert_eq!(cache.stats().evicted, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = cache();
        cache.set("short", json!(1), Duration::from_secs(1));
        cache.set("long", json!(2), Duration::from_secs(100));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("long").is_some());
    }

    #[test]
    fn test_clear() {
        let cache = cache();
        cache.set("a", json!(1), Duration::from_secs(60));
        cache.clear();
        assert!(cache.is_empty());
    }
}
