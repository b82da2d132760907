//! # Sync Cursor Store
//!
//! Persists the last successful reconciliation timestamp (epoch ms) so a
//! restarted client asks the server only for what it missed.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::durable::write_atomically;
use crate::error::{StoreError, StoreResult};

/// Name of the cursor used by the reconciliation loop.
pub const LAST_SYNC_CURSOR: &str = "last_sync";

/// Named integer cursors that survive restarts.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load_cursor(&self, name: &str) -> StoreResult<Option<i64>>;

    async fn save_cursor(&self, name: &str, value: i64) -> StoreResult<()>;
}

/// In-process cursor store.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    values: Mutex<HashMap<String, i64>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load_cursor(&self, name: &str) -> StoreResult<Option<i64>> {
        let values = self
            .values
            .lock()
            .map_err(|_| StoreError::Internal("cursor lock poisoned".into()))?;
        Ok(values.get(name).copied())
    }

    async fn save_cursor(&self, name: &str, value: i64) -> StoreResult<()> {
        self.values
            .lock()
            .map_err(|_| StoreError::Internal("cursor lock poisoned".into()))?
            .insert(name.to_string(), value);
        Ok(())
    }
}

/// Cursor store kept next to the JSON queue snapshot, as a `{name: value}` map.
#[derive(Debug)]
pub struct JsonFileCursorStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn read_all(&self) -> StoreResult<HashMap<String, i64>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(StoreError::io(&self.path, e)),
        }
    }
}

#[async_trait]
impl CursorStore for JsonFileCursorStore {
    async fn load_cursor(&self, name: &str) -> StoreResult<Option<i64>> {
        Ok(self.read_all().await?.get(name).copied())
    }

    async fn save_cursor(&self, name: &str, value: i64) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut values = self.read_all().await?;
        values.insert(name.to_string(), value);
        let encoded = serde_json::to_vec(&values)?;
        write_atomically(&self.path, &encoded).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_cursor() {
        let store = MemoryCursorStore::new();
        assert_eq!(store.load_cursor(LAST_SYNC_CURSOR).await.unwrap(), None);
        store.save_cursor(LAST_SYNC_CURSOR, 42).await.unwrap();
        assert_eq!(store.load_cursor(LAST_SYNC_CURSOR).await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn test_file_cursor_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor.json");

        JsonFileCursorStore::new(&path)
            .save_cursor(LAST_SYNC_CURSOR, 1_700_000_000_000)
            .await
            .unwrap();

        let reopened = JsonFileCursorStore::new(&path);
        assert_eq!(
            reopened.load_cursor(LAST_SYNC_CURSOR).await.unwrap(),
            Some(1_700_000_000_000)
        );
        assert_eq!(reopened.load_cursor("other").await.unwrap(), None);
    }
}
