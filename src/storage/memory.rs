use async_trait::async_trait;
use dashmap::DashMap;
use super::traits::{DurableStore, StorageError, StoredRecord};

/// Process-local store. Not durable across restarts; use it for tests or
/// sessions that don't need persistence.
pub struct InMemoryStore {
    data: DashMap<(String, String), String>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Get current record count across all namespaces
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Clear all records
    pub fn clear(&self) {
        self.data.clear();
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableStore for InMemoryStore {
    async fn put(&self, namespace: &str, id: &str, body: &str) -> Result<(), StorageError> {
        self.data
            .insert((namespace.to_string(), id.to_string()), body.to_string());
        Ok(())
    }

    async fn delete(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
        self.data.remove(&(namespace.to_string(), id.to_string()));
        Ok(())
    }

    async fn scan(&self, namespace: &str) -> Result<Vec<StoredRecord>, StorageError> {
        Ok(self
            .data
            .iter()
            .filter(|entry| entry.key().0 == namespace)
            .map(|entry| StoredRecord {
                id: entry.key().1.clone(),
                body: entry.value().clone(),
            })
            .collect())
    }

    async fn count(&self, namespace: &str) -> Result<u64, StorageError> {
        Ok(self.data.iter().filter(|e| e.key().0 == namespace).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let store = InMemoryStore::new();
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_put_and_scan() {
        let store = InMemoryStore::new();
        store.put("queue", "a", r#"{"x":1}"#).await.unwrap();

        let records = store.scan("queue").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "a");
        assert_eq!(records[0].body, r#"{"x":1}"#);
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let store = InMemoryStore::new();
        store.put("queue", "same-id", "1").await.unwrap();
        store.put("dead_letter", "same-id", "2").await.unwrap();

        assert_eq!(store.count("queue").await.unwrap(), 1);
        assert_eq!(store.count("dead_letter").await.unwrap(), 1);
        assert_eq!(store.len(), 2);

        store.delete("queue", "same-id").await.unwrap();
        assert_eq!(store.count("queue").await.unwrap(), 0);
        assert_eq!(store.scan("dead_letter").await.unwrap()[0].body, "2");
    }

    #[tokio::test]
    async fn test_delete_nonexistent_is_ok() {
        let store = InMemoryStore::new();
        assert!(store.delete("queue", "nonexistent").await.is_ok());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = InMemoryStore::new();
        store.put("queue", "id", "v1").await.unwrap();
        store.put("queue", "id", "v2").await.unwrap();

        let records = store.scan("queue").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].body, "v2");
    }

    #[tokio::test]
    async fn test_clear() {
        let store = InMemoryStore::default();
        for i in 0..10 {
            store.put("queue", &format!("item-{}", i), "{}").await.unwrap();
        }
        assert_eq!(store.len(), 10);
        store.clear();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        use std::sync::Arc;

        let store = Arc::new(InMemoryStore::new());
        let mut handles = vec![];

        for batch in 0..10 {
            let store_clone = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..10 {
                    store_clone
                        .put("queue", &format!("batch-{}-item-{}", batch, i), "{}")
                        .await
                        .unwrap();
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.count("queue").await.unwrap(), 100);
    }
}
