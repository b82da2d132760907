//! # pitchside-sync: Real-Time Sync and Resilient Caching
//!
//! Keeps live match data fresh over unreliable networks, survives
//! disconnection without losing user mutations, and avoids redundant server
//! round-trips.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Layer Architecture                          │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 SyncServices (built once at startup)             │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ Connection     │  │ OfflineQueue   │  │  SyncOrchestrator      │    │
//! │  │ Manager        │  │                │  │                        │    │
//! │  │ one duplex     │  │ durable FIFO,  │  │ 30s reconcile poll +   │    │
//! │  │ channel,       │  │ bounded replay │  │ match_events push,     │    │
//! │  │ backoff, pings │  │ to REST        │  │ busts cache prefixes   │    │
//! │  └───────┬────────┘  └────────────────┘  └───────────┬────────────┘    │
//! │          │ topics                                     │                 │
//! │          ▼                                            ▼                 │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ TopicRegistry  │  │ PriorityLoader │─►│  QueryCache            │    │
//! │  │ weak callbacks │  │ dedup, tiers,  │  │  TTL + optional LRU    │    │
//! │  │                │  │ lazy loading   │  │                        │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  EVENTS (to the application via SyncEventEmitter):                     │
//! │  • status        - connection / reconcile status changes              │
//! │  • change        - pushed or reconciled entity changes                │
//! │  • replay failure - offline item dropped after its last retry         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! ### Channel
//! - [`connection`] - Connection manager, reconnect timer
//! - [`transport`] - Connector trait and WebSocket connector
//! - [`protocol`] - Wire envelope and frame decoding
//! - [`pubsub`] - Topic registry and subscription handles
//!
//! ### Durability and Caching
//! - [`offline`] - Offline durability queue
//! - [`cache`] - Read-through TTL cache
//! - [`loader`] - Priority loader with request dedup
//! - [`lazy`] - Visibility-triggered loading
//!
//! ### Coordination
//! - [`orchestrator`] - Reconciliation and push handling
//! - [`services`] - Service construction and lifecycle
//! - [`api`] - REST collaborators
//! - [`network`] - Online/offline signal
//! - [`events`] - Status and change events
//! - [`config`], [`error`], [`retry`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pitchside_sync::{NoOpEmitter, SyncConfig, SyncServices};
//!
//! let config = SyncConfig::load_or_default(None);
//! let services = SyncServices::build(config, Arc::new(NoOpEmitter)).await?;
//! services.start().await?;
//!
//! let _sub = services.orchestrator().subscribe_to_match("m-42", |event| {
//!     println!("{:?}", event.payload());
//! });
//!
//! let status = services.orchestrator().get_status();
//! println!("Connected: {}", status.is_connected);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

// Channel
pub mod connection;
pub mod protocol;
pub mod pubsub;
pub mod transport;

// Durability and caching
pub mod cache;
pub mod lazy;
pub mod loader;
pub mod offline;

// Coordination
pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod network;
pub mod orchestrator;
pub mod retry;
pub mod services;

// =============================================================================
// Re-exports
// =============================================================================

pub use api::{ApiClient, RestReplayHandler, UploadPayload};
pub use cache::{CacheStats, QueryCache};
pub use config::{
    ApiSettings, CacheSettings, ConnectionSettings, LoaderSettings, OfflineSettings, QueueBackend,
    ReconcileSettings, SyncConfig,
};
pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState, ReconnectTimer};
pub use error::{SyncError, SyncResult};
pub use events::{ChangeEvent, NoOpEmitter, SyncEventEmitter, SyncStatus};
pub use lazy::{ElementId, LazyLoadHandle, ViewportObserver};
pub use loader::{LoadOptions, PreloadResource, PreloadSummary, PriorityLoader};
pub use network::NetworkMonitor;
pub use offline::{ActionHandler, OfflineQueue};
pub use orchestrator::{MatchSubscription, OrchestratorDeps, ReconcileSource, SyncOrchestrator};
pub use protocol::{DecodeError, InboundMessage, OutboundMessage};
pub use pubsub::{Subscription, TopicRegistry};
pub use retry::{retry_with_backoff, DoublingBackoff};
pub use services::{SubmitOutcome, SyncServices};
pub use transport::{Channel, Connector, WsConnector};

/// Locks a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
