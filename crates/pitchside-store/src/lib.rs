//! # pitchside-store: Durable Storage
//!
//! Backends for the offline durability queue and the reconciliation cursor.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         pitchside-store                                 │
//! │                                                                         │
//! │  ┌──────────────────┐    ┌──────────────────┐    ┌──────────────────┐  │
//! │  │  DurableQueue    │    │   CursorStore    │    │    Database      │  │
//! │  │  (trait)         │    │   (trait)        │    │  SqlitePool+WAL  │  │
//! │  └────────┬─────────┘    └────────┬─────────┘    └────────┬─────────┘  │
//! │           │                       │                       │            │
//! │   Memory / JsonFile /     Memory / JsonFile /      migrations/sqlite   │
//! │   SqliteQueue             SqliteCursorStore                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! use pitchside_store::{Database, DurableQueue, StoreConfig};
//!
//! let db = Database::new(StoreConfig::new("./pitchside.db")).await?;
//! let queue = db.offline_queue();
//! let pending = queue.drain_in_order().await?;
//! ```

pub mod cursor;
pub mod durable;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

pub use cursor::{CursorStore, JsonFileCursorStore, MemoryCursorStore, LAST_SYNC_CURSOR};
pub use durable::{DurableQueue, JsonFileQueue, MemoryQueue};
pub use error::{StoreError, StoreResult};
pub use pool::{Database, StoreConfig};
pub use repository::cursor::SqliteCursorStore;
pub use repository::offline_queue::SqliteQueue;
