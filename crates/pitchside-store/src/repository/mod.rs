//! # Repository Module
//!
//! SQLite implementations of the storage traits.
//!
//! ```text
//! Database ──► offline_queue() ──► SqliteQueue        impl DurableQueue
//!          └─► cursors()       ──► SqliteCursorStore  impl CursorStore
//! ```
//!
//! Queries use runtime-checked `sqlx::query` so the crate builds without a
//! prepared database.

pub mod cursor;
pub mod offline_queue;
