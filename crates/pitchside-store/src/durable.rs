//! # Durable Queue Backends
//!
//! The offline queue never talks to a storage API directly. It goes through
//! [`DurableQueue`], which has one backend per target:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        DurableQueue                                     │
//! │                                                                         │
//! │   append(item)        add one item at the back                         │
//! │   drain_in_order()    read every persisted item, oldest first          │
//! │   persist(snapshot)   replace the stored queue with `snapshot`         │
//! │                                                                         │
//! │   ┌──────────────┐   ┌──────────────────┐   ┌──────────────────┐       │
//! │   │ MemoryQueue  │   │  JsonFileQueue   │   │   SqliteQueue    │       │
//! │   │ (tests)      │   │  temp + rename   │   │  (repository)    │       │
//! │   └──────────────┘   └──────────────────┘   └──────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `drain_in_order` does not delete anything. Items leave storage only when
//! the caller persists a snapshot without them, so a crash mid-replay keeps
//! every unsettled item.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use pitchside_core::OfflineQueueItem;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

// =============================================================================
// Trait
// =============================================================================

/// Durable storage for the offline queue.
#[async_trait]
pub trait DurableQueue: Send + Sync {
    /// Appends one item at the back of the stored queue.
    async fn append(&self, item: &OfflineQueueItem) -> StoreResult<()>;

    /// Returns every stored item in FIFO order.
    async fn drain_in_order(&self) -> StoreResult<Vec<OfflineQueueItem>>;

    /// Replaces the stored queue with `snapshot`, preserving its order.
    async fn persist(&self, snapshot: &[OfflineQueueItem]) -> StoreResult<()>;

    /// Short name for logs.
    fn backend_name(&self) -> &'static str;
}

// =============================================================================
// Memory Backend
// =============================================================================

/// Process-local backend. Survives nothing; used in tests and when the
/// configuration asks for `memory`.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    items: Mutex<Vec<OfflineQueueItem>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, Vec<OfflineQueueItem>>> {
        self.items
            .lock()
            .map_err(|_| StoreError::Internal("memory queue lock poisoned".into()))
    }
}

#[async_trait]
impl DurableQueue for MemoryQueue {
    async fn append(&self, item: &OfflineQueueItem) -> StoreResult<()> {
        self.lock()?.push(item.clone());
        Ok(())
    }

    async fn drain_in_order(&self) -> StoreResult<Vec<OfflineQueueItem>> {
        Ok(self.lock()?.clone())
    }

    async fn persist(&self, snapshot: &[OfflineQueueItem]) -> StoreResult<()> {
        *self.lock()? = snapshot.to_vec();
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

// =============================================================================
// JSON File Backend
// =============================================================================

/// Stores the queue as one JSON array.
///
/// Writes go to `<path>.tmp`, are synced, then renamed over `path`, so a
/// reader sees either the old snapshot or the new one.
#[derive(Debug)]
pub struct JsonFileQueue {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_snapshot(&self) -> StoreResult<Vec<OfflineQueueItem>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn write_snapshot(&self, snapshot: &[OfflineQueueItem]) -> StoreResult<()> {
        let encoded = serde_json::to_vec_pretty(snapshot)?;
        write_atomically(&self.path, &encoded).await?;
        debug!(path = %self.path.display(), items = snapshot.len(), "Queue snapshot written");
        Ok(())
    }
}

/// Writes `bytes` to `path` through a synced temp file and a rename.
pub(crate) async fn write_atomically(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let mut file = tokio::fs::File::create(&tmp_path)
        .await
        .map_err(|e| StoreError::io(&tmp_path, e))?;
    file.write_all(bytes)
        .await
        .map_err(|e| StoreError::io(&tmp_path, e))?;
    file.sync_all()
        .await
        .map_err(|e| StoreError::io(&tmp_path, e))?;
    drop(file);

    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        warn!(path = %path.display(), ?e, "Atomic rename failed");
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(StoreError::io(path, e));
    }
    Ok(())
}

#[async_trait]
impl DurableQueue for JsonFileQueue {
    async fn append(&self, item: &OfflineQueueItem) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut items = self.read_snapshot().await?;
        items.push(item.clone());
        self.write_snapshot(&items).await
    }

    async fn drain_in_order(&self) -> StoreResult<Vec<OfflineQueueItem>> {
        let _guard = self.write_lock.lock().await;
        self.read_snapshot().await
    }

    async fn persist(&self, snapshot: &[OfflineQueueItem]) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        self.write_snapshot(snapshot).await
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}
