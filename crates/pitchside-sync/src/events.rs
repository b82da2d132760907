//! # Sync Events
//!
//! Everything the sync layer reports upward: status snapshots, change events
//! and terminal offline failures.

use pitchside_core::{ReplayFailure, SyncDelta};
use serde::Serialize;
use serde_json::Value;

use crate::connection::ConnectionState;

// =============================================================================
// Change Events
// =============================================================================

/// A local change the application should react to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ChangeEvent {
    /// Delivered over the duplex channel.
    Pushed { topic: String, payload: Value },

    /// Applied from the reconciliation poll.
    Reconciled(SyncDelta),
}

// =============================================================================
// Sync Status
// =============================================================================

/// Current sync status for external queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// Current connection state.
    pub connection_state: ConnectionState,

    /// Whether the channel is open.
    pub is_connected: bool,

    /// Last successful reconciliation (epoch ms).
    pub last_sync: Option<i64>,

    /// Items waiting in the offline queue.
    pub pending_offline: usize,

    /// Entries currently held by the cache.
    pub cached_entries: usize,

    /// Last reconciliation error (if any).
    pub last_error: Option<String>,

    /// Whether the reconciliation interval is running.
    pub reconcile_running: bool,
}

impl Default for SyncStatus {
    fn default() -> Self {
        SyncStatus {
            connection_state: ConnectionState::Disconnected,
            is_connected: false,
            last_sync: None,
            pending_offline: 0,
            cached_entries: 0,
            last_error: None,
            reconcile_running: false,
        }
    }
}

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Receives sync events for the embedding application.
pub trait SyncEventEmitter: Send + Sync {
    /// Emits a sync status change event.
    fn emit_status(&self, status: &SyncStatus);

    /// Emits a local change (pushed or reconciled).
    fn emit_change(&self, event: &ChangeEvent);

    /// Emits a terminal offline replay failure. Called once per dropped item.
    fn emit_replay_failure(&self, failure: &ReplayFailure);
}

/// No-op event emitter for testing.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_status(&self, _status: &SyncStatus) {}
    fn emit_change(&self, _event: &ChangeEvent) {}
    fn emit_replay_failure(&self, _failure: &ReplayFailure) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_defaults() {
        let status = SyncStatus::default();
        assert_eq!(status.connection_state, ConnectionState::Disconnected);
        assert!(!status.is_connected);
        assert_eq!(status.last_sync, None);
    }

    #[test]
    fn test_change_event_serializes_with_source_tag() {
        let event = ChangeEvent::Pushed {
            topic: "match_events".into(),
            payload: json!({"goal": true}),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["source"], "pushed");
        assert_eq!(value["topic"], "match_events");
    }
}
