mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::FakeConnector;
use pitchside_sync::{ConnectionConfig, ConnectionManager, ConnectionState, OutboundMessage};
use serde_json::{json, Value};
use tokio::sync::mpsc;

fn config() -> ConnectionConfig {
    ConnectionConfig {
        base_delay: Duration::from_millis(1000),
        max_attempts: 5,
        heartbeat_interval: Duration::from_secs(30),
        liveness_timeout: None,
    }
}

async fn wait_for_state(manager: &ConnectionManager, wanted: ConnectionState) {
    let mut changes = manager.state_changes();
    tokio::time::timeout(Duration::from_secs(600), changes.wait_for(|s| *s == wanted))
        .await
        .expect("state not reached")
        .unwrap();
}

fn gaps_ms(attempts: &[tokio::time::Instant]) -> Vec<u64> {
    attempts
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).as_millis() as u64)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn reconnect_delays_double_and_stop_at_cap() {
    let (connector, _peers) = FakeConnector::refusing();
    let manager = ConnectionManager::new(connector.clone(), config());

    manager.connect();
    tokio::time::sleep(Duration::from_secs(300)).await;

    // Initial attempt plus five automatic reconnects
    assert_eq!(connector.attempt_count(), 6);
    assert_eq!(gaps_ms(&connector.attempts()), vec![1000, 2000, 4000, 8000, 16000]);
    assert_eq!(manager.state(), ConnectionState::Errored);
    assert!(!manager.is_reconnect_pending());
}

#[tokio::test(start_paused = true)]
async fn new_attempt_replaces_pending_timer() {
    let (connector, _peers) = FakeConnector::refusing();
    let manager = ConnectionManager::new(connector.clone(), config());

    manager.connect();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(manager.is_reconnect_pending());

    tokio::time::sleep(Duration::from_millis(490)).await;
    manager.connect();
    manager.connect();
    tokio::time::sleep(Duration::from_millis(4000)).await;

    // A surviving 1s timer from the first failure would add an attempt at t=1000
    let gaps = gaps_ms(&connector.attempts());
    assert_eq!(&gaps[..3], &[500, 1000, 2000]);
}

#[tokio::test(start_paused = true)]
async fn back_online_resets_exhausted_attempts() {
    let (connector, _peers) = FakeConnector::refusing();
    let manager = ConnectionManager::new(connector.clone(), config());

    manager.connect();
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(connector.attempt_count(), 6);

    manager.handle_back_online();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(connector.attempt_count(), 8);
    assert!(manager.is_reconnect_pending());
}

#[tokio::test(start_paused = true)]
async fn match_event_reaches_subscriber_once() {
    let (connector, mut peers) = FakeConnector::accepting();
    let manager = ConnectionManager::new(connector, config());

    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    let _sub = manager.subscribe("match_events", move |message| {
        let _ = tx.send(message.payload().clone());
    });

    manager.connect();
    let peer = peers.recv().await.unwrap();
    wait_for_state(&manager, ConnectionState::Connected).await;

    peer.tx
        .send(r#"{"type":"match_event","payload":{"goal":true},"timestamp":1,"id":"x"}"#.into())
        .await
        .unwrap();

    let payload = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payload, json!({"goal": true}));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn undecodable_frames_are_dropped() {
    let (connector, mut peers) = FakeConnector::accepting();
    let manager = ConnectionManager::new(connector, config());

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let _sub = manager.subscribe("live_stats", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    manager.connect();
    let peer = peers.recv().await.unwrap();
    wait_for_state(&manager, ConnectionState::Connected).await;

    peer.tx.send("{not json".into()).await.unwrap();
    peer.tx.send(r#"{"payload":{}}"#.into()).await.unwrap();
    peer.push("live_stats", json!({"possession": 61})).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(manager.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn panicking_subscriber_does_not_block_others() {
    let (connector, mut peers) = FakeConnector::accepting();
    let manager = ConnectionManager::new(connector, config());

    let hits = Arc::new(AtomicUsize::new(0));
    let _bad = manager.subscribe("team_updates", |_| panic!("subscriber bug"));
    let counter = hits.clone();
    let _good = manager.subscribe("team_updates", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    manager.connect();
    let peer = peers.recv().await.unwrap();
    wait_for_state(&manager, ConnectionState::Connected).await;

    peer.push("team_update", json!({"teamId": 3})).await;
    peer.push("team_update", json!({"teamId": 4})).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(manager.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn buffered_messages_flush_in_order() {
    let (connector, mut peers) = FakeConnector::accepting();
    let manager = ConnectionManager::new(connector, config());

    manager.send(OutboundMessage::new("chat", json!({"n": 1})));
    manager.send(OutboundMessage::new("chat", json!({"n": 2})));
    manager.join_match("m-7");
    assert_eq!(manager.pending_outbound(), 3);

    manager.connect();
    let mut peer = peers.recv().await.unwrap();
    wait_for_state(&manager, ConnectionState::Connected).await;
    manager.send(OutboundMessage::new("chat", json!({"n": 3})));

    let first = peer.next_envelope().await.unwrap();
    let second = peer.next_envelope().await.unwrap();
    let third = peer.next_envelope().await.unwrap();
    let fourth = peer.next_envelope().await.unwrap();

    assert_eq!(first.payload, json!({"n": 1}));
    assert_eq!(second.payload, json!({"n": 2}));
    assert_eq!(third.kind, "join_match");
    assert_eq!(third.payload, json!({"matchId": "m-7"}));
    assert_eq!(fourth.payload, json!({"n": 3}));
    assert_eq!(manager.pending_outbound(), 0);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_sends_ping() {
    let (connector, mut peers) = FakeConnector::accepting();
    let manager = ConnectionManager::new(connector, config());

    manager.connect();
    let mut peer = peers.recv().await.unwrap();
    wait_for_state(&manager, ConnectionState::Connected).await;

    let start = tokio::time::Instant::now();
    let frame = peer.rx.recv().await.unwrap();
    assert!(frame.contains(r#""type":"ping""#));
    assert_eq!(start.elapsed(), Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn closed_transport_reconnects() {
    let (connector, mut peers) = FakeConnector::accepting();
    let manager = ConnectionManager::new(connector.clone(), config());

    manager.connect();
    let peer = peers.recv().await.unwrap();
    wait_for_state(&manager, ConnectionState::Connected).await;

    drop(peer);
    wait_for_state(&manager, ConnectionState::Disconnected).await;
    manager.send(OutboundMessage::new("chat", json!({"while": "down"})));

    let mut replacement = peers.recv().await.unwrap();
    wait_for_state(&manager, ConnectionState::Connected).await;
    assert_eq!(connector.attempt_count(), 2);

    let flushed = replacement.next_envelope().await.unwrap();
    assert_eq!(flushed.payload, json!({"while": "down"}));
}

#[tokio::test(start_paused = true)]
async fn missed_pong_closes_session() {
    let (connector, mut peers) = FakeConnector::accepting();
    let manager = ConnectionManager::new(
        connector.clone(),
        ConnectionConfig {
            liveness_timeout: Some(Duration::from_secs(5)),
            ..config()
        },
    );

    manager.connect();
    let _silent_peer = peers.recv().await.unwrap();
    wait_for_state(&manager, ConnectionState::Connected).await;

    // Ping at 30s, no pong by 35s
    wait_for_state(&manager, ConnectionState::Disconnected).await;
    let _next = peers.recv().await.unwrap();
    assert_eq!(connector.attempt_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn pong_keeps_session_alive() {
    let (connector, mut peers) = FakeConnector::accepting();
    let manager = ConnectionManager::new(
        connector.clone(),
        ConnectionConfig {
            liveness_timeout: Some(Duration::from_secs(5)),
            ..config()
        },
    );

    manager.connect();
    let mut peer = peers.recv().await.unwrap();
    wait_for_state(&manager, ConnectionState::Connected).await;

    for _ in 0..3 {
        let ping = peer.rx.recv().await.unwrap();
        assert!(ping.contains("ping"));
        peer.push("pong", Value::Null).await;
    }

    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(connector.attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn explicit_disconnect_suppresses_reconnect() {
    let (connector, mut peers) = FakeConnector::accepting();
    let manager = ConnectionManager::new(connector.clone(), config());

    manager.connect();
    let mut peer = peers.recv().await.unwrap();
    wait_for_state(&manager, ConnectionState::Connected).await;

    manager.disconnect();
    manager.disconnect();
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    // The transport sees the channel close
    assert_eq!(peer.rx.recv().await, None);

    manager.handle_back_online();
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.attempt_count(), 1);
    assert!(!manager.is_reconnect_pending());

    // An explicit connect() starts a new session
    manager.connect();
    let _peer = peers.recv().await.unwrap();
    wait_for_state(&manager, ConnectionState::Connected).await;
    assert_eq!(connector.attempt_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn dropped_subscription_stops_delivery() {
    let (connector, mut peers) = FakeConnector::accepting();
    let manager = ConnectionManager::new(connector, config());

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let sub = manager.subscribe("lineup", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    manager.connect();
    let peer = peers.recv().await.unwrap();
    wait_for_state(&manager, ConnectionState::Connected).await;

    peer.push("lineup", json!({})).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    sub.unsubscribe();
    peer.push("lineup", json!({})).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
