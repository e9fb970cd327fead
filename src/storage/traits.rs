use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Record '{0}' not found")]
    NotFound(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Corrupted record '{id}': {reason}")]
    Corrupted {
        id: String,
        reason: String,
    },
}

/// Namespaces the engine persists under.
pub mod namespace {
    /// Pending sync items.
    pub const QUEUE: &str = "queue";
    /// Items that exhausted their retries.
    pub const DEAD_LETTER: &str = "dead_letter";
}

/// A raw persisted record: id plus its JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub id: String,
    pub body: String,
}

/// Durable local key-value store backing the queue and the dead letter store.
///
/// Bodies are opaque JSON text so a record that no longer deserializes can
/// still be listed and deleted.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Insert or replace a record. Must be durable when it returns.
    async fn put(&self, namespace: &str, id: &str, body: &str) -> Result<(), StorageError>;

    /// Delete a record. Deleting a missing record is not an error.
    async fn delete(&self, namespace: &str, id: &str) -> Result<(), StorageError>;

    /// All records in a namespace.
    async fn scan(&self, namespace: &str) -> Result<Vec<StoredRecord>, StorageError>;

    /// Count records in a namespace.
    async fn count(&self, namespace: &str) -> Result<u64, StorageError> {
        Ok(self.scan(namespace).await?.len() as u64)
    }
}
