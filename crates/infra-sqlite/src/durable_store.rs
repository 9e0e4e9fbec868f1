// SQLite DurableStore Implementation

use async_trait::async_trait;
use linkward_core::port::{DurableStore, StoreError, TimeProvider};
use serde_json::Value;
use sqlx::SqlitePool;
use std::sync::Arc;

// Helper to convert sqlx::Error to StoreError with structured information
fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) => {
            if let Some(code) = db_err.code() {
                let code_str = code.as_ref();

                // SQLite error codes: https://www.sqlite.org/rescode.html
                match code_str {
                    "5" => StoreError::Backend(format!(
                        "Database locked (SQLITE_BUSY): {}",
                        db_err.message()
                    )),
                    "13" => {
                        StoreError::Backend(format!("Database full: {}", db_err.message()))
                    }
                    _ => StoreError::Backend(format!(
                        "Database error [{}]: {}",
                        code_str,
                        db_err.message()
                    )),
                }
            } else {
                StoreError::Backend(format!("Database error: {}", db_err.message()))
            }
        }
        sqlx::Error::RowNotFound => StoreError::Backend("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            StoreError::Backend(format!("Column not found: {}", col))
        }
        _ => StoreError::Backend(err.to_string()),
    }
}

pub struct SqliteDurableStore {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteDurableStore {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }
}

#[async_trait]
impl DurableStore for SqliteDurableStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let raw: Option<String> = sqlx::query_scalar("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        match raw {
            Some(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| StoreError::Corrupt(format!("key {}: {}", key, e))),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value.to_string())
        .bind(self.time_provider.now_millis())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn bytes_in_use(&self, keys: &[&str]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            let total: i64 = sqlx::query_scalar(
                "SELECT COALESCE(SUM(LENGTH(key) + LENGTH(value)), 0) FROM kv_store",
            )
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
            return Ok(total as u64);
        }

        let mut total: i64 = 0;
        for key in keys {
            let used: i64 = sqlx::query_scalar(
                "SELECT COALESCE(SUM(LENGTH(key) + LENGTH(value)), 0) FROM kv_store WHERE key = ?",
            )
            .bind(key)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
            total += used;
        }
        Ok(total as u64)
    }
}
