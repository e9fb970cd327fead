// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite-backed durable store.
//!
//! One table holds both the pending queue and the dead letter store, keyed by
//! namespace:
//! ```sql
//! CREATE TABLE sync_records (
//!   namespace TEXT NOT NULL,
//!   id TEXT NOT NULL,
//!   body TEXT NOT NULL,      -- serialized SyncItem / DeadLetterItem
//!   updated_at INTEGER NOT NULL,
//!   PRIMARY KEY (namespace, id)
//! )
//! ```
//!
//! The database runs in WAL journal mode with `synchronous = FULL`, so a
//! completed `put` survives both process death and power loss.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use sqlx::Row;
use tracing::{debug, info};

use super::traits::{DurableStore, StorageError, StoredRecord};
use crate::resilience::retry::{retry, RetryConfig};
use crate::sync_item::now_millis;

pub struct SqliteStore {
    pool: SqlitePool,
    path: String,
}

impl SqliteStore {
    /// Open (or create) the store at a filesystem path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        Self::connect(&format!("sqlite://{}", path_str)).await
    }

    /// Connect with startup-mode retry (fails fast if the path is unusable).
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StorageError::Backend(format!("Invalid SQLite url '{}': {}", url, e)))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(5));

        let pool = retry("sqlite_connect", &RetryConfig::startup(), || {
            let options = options.clone();
            async move {
                SqlitePoolOptions::new()
                    .max_connections(4)
                    .acquire_timeout(Duration::from_secs(10))
                    .connect_with(options)
                    .await
                    .map_err(|e| StorageError::Backend(e.to_string()))
            }
        })
        .await?;

        let store = Self {
            pool,
            path: url.to_string(),
        };
        store.init_schema().await?;
        info!(path = %store.path, "SQLite sync store opened");
        Ok(store)
    }

    /// Get a clone of the connection pool.
    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    /// Connection url this store was opened with.
    pub fn path(&self) -> &str {
        &self.path
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        retry("sqlite_init_schema", &RetryConfig::startup(), || async {
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS sync_records (
                    namespace TEXT NOT NULL,
                    id TEXT NOT NULL,
                    body TEXT NOT NULL,
                    updated_at INTEGER NOT NULL,
                    PRIMARY KEY (namespace, id)
                )
                "#,
            )
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;
        Ok(())
    }

    /// Close the pool, flushing outstanding connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn put(&self, namespace: &str, id: &str, body: &str) -> Result<(), StorageError> {
        retry("sqlite_put", &RetryConfig::query(), || async {
            sqlx::query(
                "INSERT INTO sync_records (namespace, id, body, updated_at)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(namespace, id) DO UPDATE SET
                    body = excluded.body,
                    updated_at = excluded.updated_at",
            )
            .bind(namespace)
            .bind(id)
            .bind(body)
            .bind(now_millis())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
            Ok(())
        })
        .await?;
        debug!(namespace, id, "Record persisted");
        Ok(())
    }

    async fn delete(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
        retry("sqlite_delete", &RetryConfig::query(), || async {
            sqlx::query("DELETE FROM sync_records WHERE namespace = ? AND id = ?")
                .bind(namespace)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn scan(&self, namespace: &str) -> Result<Vec<StoredRecord>, StorageError> {
        let rows = retry("sqlite_scan", &RetryConfig::query(), || async {
            sqlx::query("SELECT id, body FROM sync_records WHERE namespace = ? ORDER BY updated_at, id")
                .bind(namespace)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row
                .try_get("id")
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            // A body that isn't valid text is surfaced as an empty body so the
            // caller treats it as corrupted and deletes it.
            let body: String = row.try_get("body").unwrap_or_default();
            records.push(StoredRecord { id, body });
        }
        Ok(records)
    }

    async fn count(&self, namespace: &str) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM sync_records WHERE namespace = ?")
            .bind(namespace)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let count: i64 = row
            .try_get("cnt")
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(count.max(0) as u64)
    }
}
