//! # Error Types
//!
//! Errors raised by the pure helpers in this crate.
//!
//! ```text
//! pitchside-core  ── CoreError   (this file)
//! pitchside-store ── StoreError  (durable backends)
//! pitchside-sync  ── SyncError   (everything network-facing)
//!
//! Flow: CoreError → StoreError / SyncError → caller
//! ```

use thiserror::Error;

/// Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Core errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A cache key segment contains the `:` separator or is empty.
    ///
    /// Segments are joined with `:` so prefix invalidation can target
    /// `kind:id:`; a separator inside a segment would let one entity's
    /// prefix match another entity's keys.
    #[error("Invalid cache key segment '{segment}': {reason}")]
    InvalidKeySegment { segment: String, reason: String },

    /// Unknown offline action name.
    #[error("Unknown offline action: '{0}'. Valid options: sync, uploadFile, updateProfile")]
    UnknownAction(String),

    /// Params could not be rendered to JSON for hashing.
    #[error("Failed to serialize key params: {0}")]
    ParamsSerialization(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::ParamsSerialization(err.to_string())
    }
}
