//! Shared fakes for the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pitchside_core::ReplayFailure;
use pitchside_sync::protocol::Envelope;
use pitchside_sync::{
    Channel, ChangeEvent, Connector, SyncError, SyncEventEmitter, SyncResult, SyncStatus,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Far end of an accepted fake channel.
pub struct Peer {
    /// Frames the manager sent.
    pub rx: mpsc::UnboundedReceiver<String>,
    /// Frames to deliver to the manager. Drop it to close the channel.
    pub tx: mpsc::Sender<String>,
}

impl Peer {
    /// Next frame the manager sent, skipping heartbeats.
    pub async fn next_envelope(&mut self) -> Option<Envelope> {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
                .await
                .ok()??;
            let envelope: Envelope = serde_json::from_str(&frame).ok()?;
            if envelope.kind != "ping" {
                return Some(envelope);
            }
        }
    }

    pub async fn push(&self, kind: &str, payload: Value) {
        let frame = json!({"type": kind, "payload": payload, "timestamp": 1, "id": "x"});
        self.tx.send(frame.to_string()).await.unwrap();
    }
}

/// Connector whose attempts succeed or fail per script.
pub struct FakeConnector {
    script: Mutex<VecDeque<bool>>,
    accept_by_default: bool,
    attempts: Mutex<Vec<Instant>>,
    peers: mpsc::UnboundedSender<Peer>,
}

impl FakeConnector {
    /// Every attempt fails.
    pub fn refusing() -> (Arc<Self>, mpsc::UnboundedReceiver<Peer>) {
        Self::scripted(Vec::new(), false)
    }

    /// Every attempt succeeds.
    pub fn accepting() -> (Arc<Self>, mpsc::UnboundedReceiver<Peer>) {
        Self::scripted(Vec::new(), true)
    }

    /// Attempts follow `script`, then `accept_by_default`.
    pub fn scripted(script: Vec<bool>, accept_by_default: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<Peer>) {
        let (peers, peer_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(FakeConnector {
            script: Mutex::new(script.into()),
            accept_by_default,
            attempts: Mutex::new(Vec::new()),
            peers,
        });
        (connector, peer_rx)
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> SyncResult<Channel> {
        self.attempts.lock().unwrap().push(Instant::now());
        let accept = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.accept_by_default);

        if !accept {
            return Err(SyncError::ConnectionFailed("refused".into()));
        }

        let (channel, rx, tx) = Channel::pair();
        let _ = self.peers.send(Peer { rx, tx });
        Ok(channel)
    }
}

/// Emitter that records everything it is given.
#[derive(Default)]
pub struct RecordingEmitter {
    pub statuses: Mutex<Vec<SyncStatus>>,
    pub changes: Mutex<Vec<ChangeEvent>>,
    pub failures: Mutex<Vec<ReplayFailure>>,
}

impl SyncEventEmitter for RecordingEmitter {
    fn emit_status(&self, status: &SyncStatus) {
        self.statuses.lock().unwrap().push(status.clone());
    }

    fn emit_change(&self, event: &ChangeEvent) {
        self.changes.lock().unwrap().push(event.clone());
    }

    fn emit_replay_failure(&self, failure: &ReplayFailure) {
        self.failures.lock().unwrap().push(failure.clone());
    }
}
