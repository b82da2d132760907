use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pitchside_core::CacheKey;
use pitchside_sync::{QueryCache, SyncError};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TeamPerformance {
    team_id: u32,
    win_rate: f64,
}

fn producer(calls: Arc<AtomicUsize>) -> impl FnOnce() -> std::future::Ready<Result<TeamPerformance, SyncError>> {
    move || {
        calls.fetch_add(1, Ordering::SeqCst);
        std::future::ready(Ok(TeamPerformance {
            team_id: 7,
            win_rate: 0.6,
        }))
    }
}

#[tokio::test(start_paused = true)]
async fn second_query_within_ttl_is_served_from_cache() {
    let cache = QueryCache::new(Duration::from_secs(300), None);
    let calls = Arc::new(AtomicUsize::new(0));
    let ttl = Duration::from_secs(300);

    let first = cache.cache_query("team:7:perf", ttl, producer(calls.clone())).await.unwrap();
    tokio::time::advance(Duration::from_secs(120)).await;
    let second = cache.cache_query("team:7:perf", ttl, producer(calls.clone())).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn expired_query_calls_producer_again() {
    let cache = QueryCache::new(Duration::from_secs(300), None);
    let calls = Arc::new(AtomicUsize::new(0));
    let ttl = Duration::from_secs(300);

    cache.cache_query("team:7:perf", ttl, producer(calls.clone())).await.unwrap();
    cache.cache_query("team:7:perf", ttl, producer(calls.clone())).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(301)).await;
    let third = cache.cache_query("team:7:perf", ttl, producer(calls.clone())).await.unwrap();

    assert_eq!(third.team_id, 7);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn prefix_invalidation_is_exact() {
    let cache = QueryCache::new(Duration::from_secs(300), None);
    let ttl = Duration::from_secs(300);

    let stats = CacheKey::new("player", "42", "stats", &json!({"season": 2024})).unwrap();
    let form = CacheKey::new("player", "42", "form", &json!({"last": 5})).unwrap();
    let other_player = CacheKey::new("player", "420", "stats", &json!({"season": 2024})).unwrap();
    let team = CacheKey::new("team", "42", "stats", &json!({})).unwrap();

    for key in [&stats, &form, &other_player, &team] {
        cache.set(&key.to_string(), json!(1), ttl);
    }

    assert_eq!(cache.invalidate_pattern(&stats.prefix()), 2);
    assert_eq!(cache.get(&stats.to_string()), None);
    assert_eq!(cache.get(&form.to_string()), None);
    assert!(cache.get(&other_player.to_string()).is_some());
    assert!(cache.get(&team.to_string()).is_some());
}

#[tokio::test]
async fn same_params_in_any_order_share_a_key() {
    let a = CacheKey::new("match", "9", "events", &json!({"half": 1, "kind": "goal"})).unwrap();
    let b = CacheKey::new("match", "9", "events", &json!({"kind": "goal", "half": 1})).unwrap();
    assert_eq!(a.to_string(), b.to_string());
}
