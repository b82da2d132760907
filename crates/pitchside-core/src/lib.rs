//! # pitchside-core: Pure Types for the Pitchside Sync Layer
//!
//! Everything in this crate is plain data and pure functions. Storage lives in
//! `pitchside-store`, networking in `pitchside-sync`.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Pitchside Data Flow                              │
//! │                                                                         │
//! │  Web UI reads ──► QueryCache ◄── PriorityLoader                        │
//! │  Web UI writes ─► REST ──(offline)──► OfflineQueue ──► DurableQueue    │
//! │  Duplex channel ─► ConnectionManager ─► SyncOrchestrator ─► QueryCache │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │               ★ pitchside-core (THIS CRATE) ★                   │   │
//! │  │                                                                 │   │
//! │  │   OfflineQueueItem   CacheKey   PriorityTier   SyncDelta        │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Queue items, statuses, tiers and delta records
//! - [`cache_key`] - Deterministic cache and request keys
//! - [`error`] - Core error types

pub mod cache_key;
pub mod error;
pub mod types;

pub use cache_key::{entity_prefix, stable_hash, CacheKey, RequestKey};
pub use error::{CoreError, CoreResult};
pub use types::*;

/// Replays allowed for an offline item after its first failure.
///
/// The handler therefore runs at most `DEFAULT_MAX_REPLAY_RETRIES + 1` times
/// before the item is reported as a terminal failure.
pub const DEFAULT_MAX_REPLAY_RETRIES: u32 = 3;

/// Lowest numeric priority that lands in [`PriorityTier::High`].
pub const HIGH_PRIORITY_MIN: u8 = 8;

/// Lowest numeric priority that lands in [`PriorityTier::Medium`].
pub const MEDIUM_PRIORITY_MIN: u8 = 5;
