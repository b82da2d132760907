//! # Offline Queue Repository
//!
//! SQLite backend for the offline durability queue.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    offline_queue table                                  │
//! │                                                                         │
//! │  position │ id   │ action        │ payload │ enqueued_at │ retry_count │
//! │  ─────────┼──────┼───────────────┼─────────┼─────────────┼───────────  │
//! │  0        │ a1.. │ sync          │ {...}   │ 2024-..     │ 0           │
//! │  1        │ b7.. │ uploadFile    │ {...}   │ 2024-..     │ 2           │
//! │                                                                         │
//! │  append   → INSERT at MAX(position) + 1                                │
//! │  persist  → DELETE all + INSERT snapshot, one transaction              │
//! │  drain    → SELECT ... ORDER BY position                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use pitchside_core::{OfflineAction, OfflineQueueItem};

use crate::durable::DurableQueue;
use crate::error::{StoreError, StoreResult};

/// SQLite-backed [`DurableQueue`].
#[derive(Debug, Clone)]
pub struct SqliteQueue {
    pool: SqlitePool,
}

impl SqliteQueue {
    pub fn new(pool: SqlitePool) -> Self {
        SqliteQueue { pool }
    }

    /// Number of stored items.
    pub async fn count(&self) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM offline_queue")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn row_to_item(row: &SqliteRow) -> StoreResult<OfflineQueueItem> {
    let action: String = row.try_get("action")?;
    let payload: String = row.try_get("payload")?;
    let enqueued_at: DateTime<Utc> = row.try_get("enqueued_at")?;
    let retry_count: i64 = row.try_get("retry_count")?;

    Ok(OfflineQueueItem {
        id: row.try_get("id")?,
        action: action.parse::<OfflineAction>()?,
        payload: serde_json::from_str(&payload)?,
        enqueued_at,
        retry_count: u32::try_from(retry_count)
            .map_err(|_| StoreError::Corrupt(format!("retry_count out of range: {retry_count}")))?,
    })
}

#[async_trait]
impl DurableQueue for SqliteQueue {
    async fn append(&self, item: &OfflineQueueItem) -> StoreResult<()> {
        let payload = serde_json::to_string(&item.payload)?;

        sqlx::query(
            r#"
            INSERT INTO offline_queue (
                id, action, payload, enqueued_at, retry_count, position
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5,
                (SELECT COALESCE(MAX(position), -1) + 1 FROM offline_queue)
            )
            "#,
        )
        .bind(&item.id)
        .bind(item.action.as_str())
        .bind(payload)
        .bind(item.enqueued_at)
        .bind(i64::from(item.retry_count))
        .execute(&self.pool)
        .await?;

        debug!(id = %item.id, action = %item.action, "Offline item stored");
        Ok(())
    }

    async fn drain_in_order(&self) -> StoreResult<Vec<OfflineQueueItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, action, payload, enqueued_at, retry_count
            FROM offline_queue
            ORDER BY position ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_item).collect()
    }

    async fn persist(&self, snapshot: &[OfflineQueueItem]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM offline_queue")
            .execute(&mut *tx)
            .await?;

        for (position, item) in snapshot.iter().enumerate() {
            let payload = serde_json::to_string(&item.payload)?;
            sqlx::query(
                r#"
                INSERT INTO offline_queue (
                    id, action, payload, enqueued_at, retry_count, position
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(&item.id)
            .bind(item.action.as_str())
            .bind(payload)
            .bind(item.enqueued_at)
            .bind(i64::from(item.retry_count))
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(items = snapshot.len(), "Offline queue snapshot persisted");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}
