//! SQLite backend for [`CursorStore`].

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::cursor::CursorStore;
use crate::error::StoreResult;

#[derive(Debug, Clone)]
pub struct SqliteCursorStore {
    pool: SqlitePool,
}

impl SqliteCursorStore {
    pub fn new(pool: SqlitePool) -> Self {
        SqliteCursorStore { pool }
    }
}

#[async_trait]
impl CursorStore for SqliteCursorStore {
    async fn load_cursor(&self, name: &str) -> StoreResult<Option<i64>> {
        let value: Option<i64> = sqlx::query_scalar("SELECT value FROM sync_cursor WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn save_cursor(&self, name: &str, value: i64) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_cursor (name, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(name) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(name)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
