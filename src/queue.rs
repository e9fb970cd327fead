// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable, ordered, bounded queue of pending changes.
//!
//! New items go to the [`DurableStore`] first and only then become visible
//! in the in-memory index, so anything `dequeue_due` can hand out is already
//! on disk. Retry bookkeeping and removals always apply to the index, even
//! when the store write behind them fails; the index is what decides the
//! next dispatch. Structural changes (enqueue, update, remove, load) are
//! serialized by one async lock; reads take a cheap snapshot of the index.
//!
//! Ordering is priority, then `enqueued_at`, then id. Per owner, only the
//! contiguous due prefix is handed out: an owner whose oldest item is still
//! backing off contributes nothing, so later changes never overtake it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::backpressure::BackpressureLevel;
use crate::error::EnqueueError;
use crate::identity::OwnerId;
use crate::resilience::retry::RetryScheduler;
use crate::storage::traits::{namespace, DurableStore, StorageError};
use crate::sync_item::SyncItem;

/// Outcome of restoring the queue from the durable store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    /// Records that failed to deserialize and were deleted
    pub corrupted: usize,
}

pub struct SyncQueue {
    store: Arc<dyn DurableStore>,
    items: RwLock<HashMap<String, SyncItem>>,
    write_lock: Mutex<()>,
    capacity: AtomicUsize,
}

impl SyncQueue {
    #[must_use]
    pub fn new(store: Arc<dyn DurableStore>, capacity: usize) -> Self {
        Self {
            store,
            items: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
            capacity: AtomicUsize::new(capacity),
        }
    }

    /// Restore persisted items. Corrupted records are deleted and counted;
    /// they never stop the rest from loading.
    pub async fn load(&self) -> Result<LoadReport, StorageError> {
        let _guard = self.write_lock.lock().await;
        let records = self.store.scan(namespace::QUEUE).await?;
        let mut report = LoadReport::default();
        let mut restored = HashMap::with_capacity(records.len());

        for record in records {
            match decode(&record.id, &record.body) {
                Ok(item) => {
                    restored.insert(item.id.clone(), item);
                    report.loaded += 1;
                }
                Err(e) => {
                    error!(error = %e, "Dropping corrupted queue record");
                    crate::metrics::record_corruption(namespace::QUEUE);
                    if let Err(del) = self.store.delete(namespace::QUEUE, &record.id).await {
                        warn!(id = %record.id, error = %del, "Failed to delete corrupted queue record");
                    }
                    report.corrupted += 1;
                }
            }
        }

        *self.items.write() = restored;
        if report.loaded > 0 || report.corrupted > 0 {
            info!(loaded = report.loaded, corrupted = report.corrupted, "Sync queue restored");
        }
        crate::metrics::set_queue_depth(report.loaded);
        Ok(report)
    }

    /// Current fill level.
    #[must_use]
    pub fn pressure(&self) -> BackpressureLevel {
        BackpressureLevel::from_fill(self.len(), self.capacity())
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    /// Change capacity (config reload). Items already queued are kept.
    pub fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity, Ordering::Release);
    }

    /// Append an item. Durable before it returns.
    pub async fn enqueue(&self, item: SyncItem) -> Result<(), EnqueueError> {
        let _guard = self.write_lock.lock().await;

        let capacity = self.capacity();
        let level = BackpressureLevel::from_fill(self.len(), capacity);
        if !level.admits(item.priority) {
            warn!(
                item_id = %item.id,
                priority = %item.priority,
                %level,
                capacity,
                "Rejecting change: sync queue under backpressure"
            );
            crate::metrics::record_backpressure_rejection(level);
            return Err(EnqueueError::Backpressure { level, capacity });
        }
        if level >= BackpressureLevel::Warn {
            warn!(%level, depth = self.len(), capacity, "{}", level.description());
        }

        let body = encode(&item)?;
        self.store.put(namespace::QUEUE, &item.id, &body).await?;

        let depth = {
            let mut items = self.items.write();
            items.insert(item.id.clone(), item);
            items.len()
        };
        crate::metrics::set_queue_depth(depth);
        Ok(())
    }

    /// Items due at `now`, in drain order, at most `limit`.
    #[must_use]
    pub fn dequeue_due(&self, now: i64, scheduler: &RetryScheduler, limit: usize) -> Vec<SyncItem> {
        let mut blocked: HashSet<OwnerId> = HashSet::new();
        let mut due = Vec::new();
        if limit == 0 {
            return due;
        }

        for item in self.snapshot() {
            if blocked.contains(&item.owner_id) {
                continue;
            }
            if scheduler.is_due(&item, now) {
                due.push(item);
                if due.len() >= limit {
                    break;
                }
            } else {
                blocked.insert(item.owner_id.clone());
            }
        }
        due
    }

    /// Items whose retry count already reached the ceiling (possible after
    /// the ceiling is lowered by a config reload).
    #[must_use]
    pub fn exhausted(&self, scheduler: &RetryScheduler) -> Vec<SyncItem> {
        self.items
            .read()
            .values()
            .filter(|item| scheduler.is_exhausted(item.retry_count))
            .cloned()
            .collect()
    }

    /// Record retry bookkeeping for an item still in the queue. The index is
    /// updated first; an error means only the durable copy is stale.
    pub async fn update(&self, item: &SyncItem) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        {
            let mut items = self.items.write();
            match items.get_mut(&item.id) {
                Some(slot) => *slot = item.clone(),
                None => return Err(StorageError::NotFound(item.id.clone())),
            }
        }
        let body = encode(item)?;
        self.store.put(namespace::QUEUE, &item.id, &body).await?;
        debug!(item_id = %item.id, retry_count = item.retry_count, "Queue item updated");
        Ok(())
    }

    /// Remove an item; returns it if it was queued. The index entry is
    /// dropped even when the store delete fails, and the error is returned.
    pub async fn remove(&self, id: &str) -> Result<Option<SyncItem>, StorageError> {
        let _guard = self.write_lock.lock().await;
        let deleted = self.store.delete(namespace::QUEUE, id).await;
        let (removed, depth) = {
            let mut items = self.items.write();
            let removed = items.remove(id);
            (removed, items.len())
        };
        crate::metrics::set_queue_depth(depth);
        deleted?;
        Ok(removed)
    }

    /// Drop queued items whose ids are already dead-lettered. Used at startup
    /// to finish a move whose queue delete never reached the store. Like
    /// [`SyncQueue::remove`], the index entry goes even if the delete fails.
    pub async fn purge<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> usize {
        let _guard = self.write_lock.lock().await;
        let stale: Vec<String> = {
            let items = self.items.read();
            ids.into_iter()
                .filter(|id| items.contains_key(*id))
                .map(str::to_string)
                .collect()
        };
        for id in &stale {
            if let Err(e) = self.store.delete(namespace::QUEUE, id).await {
                warn!(item_id = %id, error = %e, "Failed to delete queue copy of a dead-lettered item");
                crate::metrics::record_storage_error("queue_remove");
            }
            self.items.write().remove(id);
            warn!(item_id = %id, "Purged queue copy of a dead-lettered item");
        }
        crate::metrics::set_queue_depth(self.len());
        stale.len()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<SyncItem> {
        self.items.read().get(id).cloned()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.items.read().contains_key(id)
    }

    /// Number of items persisted in the queue, as tracked by the index. Use
    /// [`SyncQueue::durable_count`] to ask the store itself.
    #[must_use]
    pub fn persisted_size(&self) -> usize {
        self.len()
    }

    /// Count straight from the durable store.
    pub async fn durable_count(&self) -> Result<u64, StorageError> {
        self.store.count(namespace::QUEUE).await
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// All items in drain order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SyncItem> {
        let mut items: Vec<SyncItem> = self.items.read().values().cloned().collect();
        items.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        items
    }
}

fn encode(item: &SyncItem) -> Result<String, StorageError> {
    serde_json::to_string(item)
        .map_err(|e| StorageError::Backend(format!("Failed to serialize item {}: {}", item.id, e)))
}

fn decode(id: &str, body: &str) -> Result<SyncItem, StorageError> {
    let item: SyncItem = serde_json::from_str(body).map_err(|e| StorageError::Corrupted {
        id: id.to_string(),
        reason: e.to_string(),
    })?;
    if item.id != id {
        return Err(StorageError::Corrupted {
            id: id.to_string(),
            reason: format!("key does not match embedded id {}", item.id),
        });
    }
    Ok(item)
}
