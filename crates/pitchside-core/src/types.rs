//! # Sync Types
//!
//! Plain data shared by the durable store and the sync layer.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Sync Types                                    │
//! │                                                                         │
//! │  ┌──────────────────┐   ┌──────────────────┐   ┌──────────────────┐    │
//! │  │ OfflineQueueItem │   │   QueueStatus    │   │  PriorityTier    │    │
//! │  │ ──────────────── │   │ ──────────────── │   │ ──────────────── │    │
//! │  │ id (UUID)        │   │ pending          │   │ High   (>= 8)    │    │
//! │  │ action           │   │ is_online        │   │ Medium (5..=7)   │    │
//! │  │ payload (JSON)   │   │ is_draining      │   │ Low    (< 5)     │    │
//! │  │ enqueued_at      │   └──────────────────┘   └──────────────────┘    │
//! │  │ retry_count      │                                                   │
//! │  └──────────────────┘   ┌──────────────────┐   ┌──────────────────┐    │
//! │                         │    SyncDelta     │   │  ReplayFailure   │    │
//! │                         │ ──────────────── │   │ ──────────────── │    │
//! │                         │ entity/entity_id │   │ item             │    │
//! │                         │ op (upsert|del)  │   │ error            │    │
//! │                         │ data, updated_at │   └──────────────────┘    │
//! │                         └──────────────────┘                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;
use uuid::Uuid;

use crate::error::CoreError;
use crate::{HIGH_PRIORITY_MIN, MEDIUM_PRIORITY_MIN};

// =============================================================================
// Offline Actions
// =============================================================================

/// Mutation kinds that can be parked in the offline queue.
///
/// Each action has exactly one replay handler registered with the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub enum OfflineAction {
    /// Generic mutation replayed against `POST /api/sync`.
    Sync,
    /// File upload replayed as multipart against `POST /api/upload`.
    UploadFile,
    /// Profile update replayed against `PUT /api/profile`.
    UpdateProfile,
}

impl OfflineAction {
    /// All actions, in registration order.
    pub const ALL: [OfflineAction; 3] = [
        OfflineAction::Sync,
        OfflineAction::UploadFile,
        OfflineAction::UpdateProfile,
    ];

    /// Wire name, identical to the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OfflineAction::Sync => "sync",
            OfflineAction::UploadFile => "uploadFile",
            OfflineAction::UpdateProfile => "updateProfile",
        }
    }
}

impl fmt::Display for OfflineAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OfflineAction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync" => Ok(OfflineAction::Sync),
            "uploadFile" => Ok(OfflineAction::UploadFile),
            "updateProfile" => Ok(OfflineAction::UpdateProfile),
            other => Err(CoreError::UnknownAction(other.to_string())),
        }
    }
}

// =============================================================================
// Offline Queue Item
// =============================================================================

/// A user-initiated mutation waiting for the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct OfflineQueueItem {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Which replay handler receives this item.
    pub action: OfflineAction,

    /// Mutation body handed to the handler unchanged.
    pub payload: Value,

    /// When the item was first queued.
    #[ts(as = "String")]
    pub enqueued_at: DateTime<Utc>,

    /// Failed replays so far.
    pub retry_count: u32,
}

impl OfflineQueueItem {
    /// Creates a fresh item with `retry_count = 0`.
    pub fn new(action: OfflineAction, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            action,
            payload,
            enqueued_at: Utc::now(),
            retry_count: 0,
        }
    }

    /// True when another failure would exceed `max_retries`.
    #[inline]
    pub fn retries_exhausted(&self, max_retries: u32) -> bool {
        self.retry_count >= max_retries
    }
}

/// Snapshot of the offline queue for the UI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub pending: usize,
    pub is_online: bool,
    pub is_draining: bool,
}

/// Terminal report for an item that failed on every allowed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ReplayFailure {
    /// The item as it was when dropped (`retry_count` equals the cap).
    pub item: OfflineQueueItem,
    /// Error returned by the final attempt.
    pub error: String,
}

// =============================================================================
// Priority Tiers
// =============================================================================

/// Prefetch tier derived from a numeric priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    /// Awaited before anything else starts.
    High,
    /// Awaited after the high tier.
    Medium,
    /// Fire-and-forget.
    Low,
}

impl PriorityTier {
    /// Maps a numeric priority: `>= 8` high, `5..=7` medium, below that low.
    pub fn from_priority(priority: u8) -> Self {
        if priority >= HIGH_PRIORITY_MIN {
            PriorityTier::High
        } else if priority >= MEDIUM_PRIORITY_MIN {
            PriorityTier::Medium
        } else {
            PriorityTier::Low
        }
    }
}

// =============================================================================
// Reconciliation Deltas
// =============================================================================

/// Kind of server-side change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum DeltaOp {
    Upsert,
    Delete,
}

/// One record from `POST /api/sync/pending`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SyncDelta {
    /// Entity kind, e.g. `player` or `match`.
    pub entity: String,

    /// Entity identifier within its kind.
    pub entity_id: String,

    pub op: DeltaOp,

    /// New state for upserts; usually null for deletes.
    #[serde(default)]
    pub data: Value,

    /// Server-side change time in epoch milliseconds.
    #[serde(default)]
    pub updated_at: i64,
}

impl SyncDelta {
    /// Cache prefix covering every cached view of this entity.
    pub fn cache_prefix(&self) -> String {
        crate::cache_key::entity_prefix(&self.entity, &self.entity_id)
    }
}
