//! # Wire Protocol
//!
//! JSON envelopes exchanged over the duplex channel.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Channel Messages                                   │
//! │                                                                         │
//! │  ENVELOPE                                                              │
//! │  ────────                                                              │
//! │  { "type": "...", "payload": any, "timestamp": <ms>, "id": "<uuid>" }  │
//! │                                                                         │
//! │  KEEPALIVE                                                             │
//! │  ─────────                                                             │
//! │  Client    ───► ping      (payload null, every heartbeat interval)     │
//! │  Server    ◄─── pong      → topic "pong"                               │
//! │                                                                         │
//! │  ROOMS                                                                 │
//! │  ─────                                                                 │
//! │  Client    ───► join_match  { "matchId": "..." }                       │
//! │  Client    ───► leave_match { "matchId": "..." }                       │
//! │                                                                         │
//! │  FAN-OUT                                                               │
//! │  ───────                                                               │
//! │  Server    ◄─── match_event  → topic "match_events"                    │
//! │  Server    ◄─── live_stats   → topic "live_stats"                      │
//! │  Server    ◄─── team_update  → topic "team_updates"                    │
//! │  Server    ◄─── <anything>   → topic "<anything>"                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Decoding is explicit: [`decode`] returns either a message or a
//! [`DecodeError`], and the dispatch loop handles both.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::error::SyncResult;

// =============================================================================
// Constants
// =============================================================================

pub const TOPIC_PONG: &str = "pong";
pub const TOPIC_MATCH_EVENTS: &str = "match_events";
pub const TOPIC_LIVE_STATS: &str = "live_stats";
pub const TOPIC_TEAM_UPDATES: &str = "team_updates";

pub const MSG_PING: &str = "ping";
pub const MSG_PONG: &str = "pong";
pub const MSG_JOIN_MATCH: &str = "join_match";
pub const MSG_LEAVE_MATCH: &str = "leave_match";
pub const MSG_MATCH_EVENT: &str = "match_event";
pub const MSG_LIVE_STATS: &str = "live_stats";
pub const MSG_TEAM_UPDATE: &str = "team_update";

// =============================================================================
// Envelope
// =============================================================================

/// Raw wire envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub payload: Value,

    /// Send time in epoch milliseconds.
    #[serde(default)]
    pub timestamp: i64,

    #[serde(default)]
    pub id: String,
}

// =============================================================================
// Inbound
// =============================================================================

/// A decoded server frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Pong(Value),
    MatchEvent(Value),
    LiveStats(Value),
    TeamUpdate(Value),
    /// Any other `type`, routed to a topic of the same name.
    Other { topic: String, payload: Value },
}

impl InboundMessage {
    /// Topic this message is dispatched to.
    pub fn topic(&self) -> &str {
        match self {
            InboundMessage::Pong(_) => TOPIC_PONG,
            InboundMessage::MatchEvent(_) => TOPIC_MATCH_EVENTS,
            InboundMessage::LiveStats(_) => TOPIC_LIVE_STATS,
            InboundMessage::TeamUpdate(_) => TOPIC_TEAM_UPDATES,
            InboundMessage::Other { topic, .. } => topic,
        }
    }

    pub fn payload(&self) -> &Value {
        match self {
            InboundMessage::Pong(p)
            | InboundMessage::MatchEvent(p)
            | InboundMessage::LiveStats(p)
            | InboundMessage::TeamUpdate(p) => p,
            InboundMessage::Other { payload, .. } => payload,
        }
    }

    /// `matchId` carried by the payload, if any.
    pub fn match_id(&self) -> Option<&str> {
        self.payload().get("matchId").and_then(Value::as_str)
    }
}

/// Why a frame was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    Malformed(String),

    #[error("frame has no usable 'type' field")]
    MissingType,
}

/// Decodes one text frame.
pub fn decode(frame: &str) -> Result<InboundMessage, DecodeError> {
    let raw: Value = serde_json::from_str(frame).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let kind = match raw.get("type").and_then(Value::as_str) {
        Some(kind) if !kind.is_empty() => kind.to_string(),
        _ => return Err(DecodeError::MissingType),
    };
    let payload = raw.get("payload").cloned().unwrap_or(Value::Null);

    Ok(match kind.as_str() {
        MSG_PONG => InboundMessage::Pong(payload),
        MSG_MATCH_EVENT => InboundMessage::MatchEvent(payload),
        MSG_LIVE_STATS => InboundMessage::LiveStats(payload),
        MSG_TEAM_UPDATE => InboundMessage::TeamUpdate(payload),
        _ => InboundMessage::Other { topic: kind, payload },
    })
}

// =============================================================================
// Outbound
// =============================================================================

/// A client frame waiting to be sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
}

impl OutboundMessage {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: kind.into(),
            payload,
            enqueued_at: Utc::now(),
        }
    }

    pub fn ping() -> Self {
        Self::new(MSG_PING, Value::Null)
    }

    pub fn join_match(match_id: &str) -> Self {
        Self::new(MSG_JOIN_MATCH, json!({ "matchId": match_id }))
    }

    pub fn leave_match(match_id: &str) -> Self {
        Self::new(MSG_LEAVE_MATCH, json!({ "matchId": match_id }))
    }

    /// Renders the wire envelope.
    pub fn to_frame(&self) -> SyncResult<String> {
        let envelope = Envelope {
            kind: self.kind.clone(),
            payload: self.payload.clone(),
            timestamp: self.enqueued_at.timestamp_millis(),
            id: self.id.clone(),
        };
        Ok(serde_json::to_string(&envelope)?)
    }
}
