//! # Cache Keys
//!
//! Deterministic keys for cached queries and in-flight request dedup.
//!
//! ```text
//! CacheKey    →  {entity_kind}:{entity_id}:{query_type}:{hash(params):016x}
//!                 └──────── entity prefix ───────┘
//!
//! RequestKey  →  {METHOD} {path} {hash(params):016x}
//! ```
//!
//! The params hash is `FxHasher` over a canonical JSON rendering with object
//! keys sorted at every depth, so `{"a":1,"b":2}` and `{"b":2,"a":1}` produce
//! the same key. The hash is cheap and stable, not cryptographic.

use std::fmt;
use std::hash::Hasher;

use rustc_hash::FxHasher;
use serde::Serialize;
use serde_json::Value;

use crate::error::{CoreError, CoreResult};

const SEPARATOR: char = ':';

// =============================================================================
// Hashing
// =============================================================================

/// Stable 64-bit hash of any serializable params value.
pub fn stable_hash<P: Serialize + ?Sized>(params: &P) -> CoreResult<u64> {
    let value = serde_json::to_value(params)?;
    let mut canonical = String::new();
    write_canonical(&value, &mut canonical);

    let mut hasher = FxHasher::default();
    hasher.write(canonical.as_bytes());
    Ok(hasher.finish())
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Strings render through serde_json for correct escaping
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn check_segment(segment: &str) -> CoreResult<()> {
    if segment.is_empty() {
        return Err(CoreError::InvalidKeySegment {
            segment: segment.to_string(),
            reason: "segment is empty".into(),
        });
    }
    if segment.contains(SEPARATOR) {
        return Err(CoreError::InvalidKeySegment {
            segment: segment.to_string(),
            reason: format!("contains '{}'", SEPARATOR),
        });
    }
    Ok(())
}

/// Prefix matching every cached view of one entity: `kind:id:`.
pub fn entity_prefix(entity_kind: &str, entity_id: &str) -> String {
    format!("{entity_kind}{SEPARATOR}{entity_id}{SEPARATOR}")
}

// =============================================================================
// Cache Key
// =============================================================================

/// Key for a cached entity query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub entity_kind: String,
    pub entity_id: String,
    pub query_type: String,
    pub params_hash: u64,
}

impl CacheKey {
    /// Builds a key, rejecting segments that are empty or contain `:`.
    pub fn new<P: Serialize + ?Sized>(
        entity_kind: &str,
        entity_id: &str,
        query_type: &str,
        params: &P,
    ) -> CoreResult<Self> {
        check_segment(entity_kind)?;
        check_segment(entity_id)?;
        check_segment(query_type)?;

        Ok(Self {
            entity_kind: entity_kind.to_string(),
            entity_id: entity_id.to_string(),
            query_type: query_type.to_string(),
            params_hash: stable_hash(params)?,
        })
    }

    /// The `kind:id:` prefix this key falls under.
    pub fn prefix(&self) -> String {
        entity_prefix(&self.entity_kind, &self.entity_id)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}:{:016x}",
            self.prefix(),
            self.query_type,
            self.params_hash
        )
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.to_string()
    }
}

// =============================================================================
// Request Key
// =============================================================================

/// Dedup key for a raw HTTP-style request: `(method, path, params)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey(String);

impl RequestKey {
    /// Canonical key for an HTTP request. The method is upper-cased.
    pub fn http<P: Serialize + ?Sized>(method: &str, path: &str, params: &P) -> CoreResult<Self> {
        let hash = stable_hash(params)?;
        Ok(Self(format!(
            "{} {} {:016x}",
            method.to_ascii_uppercase(),
            path,
            hash
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<RequestKey> for String {
    fn from(key: RequestKey) -> Self {
        key.0
    }
}
