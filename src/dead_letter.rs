// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Persistent holding area for changes that will not sync on their own.
//!
//! Items land here when they exhaust their retries or are rejected
//! permanently. They stay until the expiry sweep removes them or a caller
//! re-queues them explicitly.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::entity::EntityValidator;
use crate::error::{DeadLetterError, EnqueueError, ValidationError};
use crate::events::{EventBus, SyncEvent};
use crate::queue::{LoadReport, SyncQueue};
use crate::storage::traits::{namespace, DurableStore, StorageError};
use crate::sync_item::{DeadLetterItem, SyncItem};

pub struct DeadLetterStore {
    store: Arc<dyn DurableStore>,
    items: RwLock<HashMap<String, DeadLetterItem>>,
    write_lock: Mutex<()>,
    validator: EntityValidator,
    events: EventBus,
}

impl DeadLetterStore {
    pub fn new(store: Arc<dyn DurableStore>, validator: EntityValidator, events: EventBus) -> Self {
        Self {
            store,
            items: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
            validator,
            events,
        }
    }

    /// Restore persisted dead letters, dropping corrupted records.
    pub async fn load(&self) -> Result<LoadReport, StorageError> {
        let _guard = self.write_lock.lock().await;
        let records = self.store.scan(namespace::DEAD_LETTER).await?;
        let mut report = LoadReport::default();
        let mut restored = HashMap::with_capacity(records.len());

        for record in records {
            match serde_json::from_str::<DeadLetterItem>(&record.body) {
                Ok(dead) if dead.item.id == record.id => {
                    restored.insert(record.id, dead);
                    report.loaded += 1;
                }
                result => {
                    let reason = match result {
                        Err(e) => e.to_string(),
                        Ok(dead) => format!("key does not match embedded id {}", dead.item.id),
                    };
                    let err = StorageError::Corrupted { id: record.id.clone(), reason };
                    error!(error = %err, "Dropping corrupted dead letter record");
                    crate::metrics::record_corruption(namespace::DEAD_LETTER);
                    if let Err(del) = self.store.delete(namespace::DEAD_LETTER, &record.id).await {
                        warn!(id = %record.id, error = %del, "Failed to delete corrupted dead letter record");
                    }
                    report.corrupted += 1;
                }
            }
        }

        *self.items.write() = restored;
        crate::metrics::set_dead_letter_depth(report.loaded);
        Ok(report)
    }

    /// Move an item here. The caller removes it from the queue afterwards, so
    /// a crash in between leaves a copy in both places rather than neither.
    pub async fn add(
        &self,
        item: SyncItem,
        reason: impl Into<String>,
        now: i64,
    ) -> Result<DeadLetterItem, StorageError> {
        let dead = DeadLetterItem::new(item, reason, now);
        let body = serde_json::to_string(&dead).map_err(|e| {
            StorageError::Backend(format!("Failed to serialize dead letter {}: {}", dead.item.id, e))
        })?;

        {
            let _guard = self.write_lock.lock().await;
            self.store.put(namespace::DEAD_LETTER, &dead.item.id, &body).await?;
            let depth = {
                let mut items = self.items.write();
                items.insert(dead.item.id.clone(), dead.clone());
                items.len()
            };
            crate::metrics::set_dead_letter_depth(depth);
        }

        self.events.emit(SyncEvent::DeadLettered {
            item_id: dead.item.id.clone(),
            entity: dead.item.entity_kind,
            retry_count: dead.item.retry_count,
            reason: dead.failure_reason.clone(),
        });
        Ok(dead)
    }

    /// Remove and return every item strictly older than `max_age_ms`.
    pub async fn sweep_expired(&self, now: i64, max_age_ms: i64) -> Result<Vec<DeadLetterItem>, StorageError> {
        let _guard = self.write_lock.lock().await;
        let expired: Vec<DeadLetterItem> = self
            .items
            .read()
            .values()
            .filter(|dead| dead.is_expired(now, max_age_ms))
            .cloned()
            .collect();

        let mut removed = Vec::with_capacity(expired.len());
        for dead in expired {
            if let Err(e) = self.store.delete(namespace::DEAD_LETTER, &dead.item.id).await {
                // Left in place; the next sweep tries again.
                warn!(item_id = %dead.item.id, error = %e, "Failed to delete expired dead letter");
                crate::metrics::record_storage_error("dlq_sweep");
                continue;
            }
            self.items.write().remove(&dead.item.id);
            self.events.emit(SyncEvent::DlqExpired {
                item_id: dead.item.id.clone(),
                entity: dead.item.entity_kind,
                retry_count: dead.item.retry_count,
            });
            removed.push(dead);
        }

        if !removed.is_empty() {
            info!(count = removed.len(), "Swept expired dead letters");
        }
        crate::metrics::set_dead_letter_depth(self.len());
        Ok(removed)
    }

    /// Hand an item back to `queue` with fresh retry state.
    ///
    /// The entity kind is checked against the current whitelist first. The
    /// item is enqueued before it is deleted here; if the queue refuses it
    /// (backpressure) it stays dead-lettered.
    pub async fn requeue(&self, id: &str, queue: &SyncQueue, now: i64) -> Result<SyncItem, EnqueueError> {
        let dead = self
            .get(id)
            .ok_or_else(|| DeadLetterError::NotFound(id.to_string()))?;

        let kind = dead.item.entity_kind;
        if !self.validator.is_enabled(kind) {
            warn!(item_id = %id, entity = %kind, "Refusing to requeue dead letter for disabled entity kind");
            return Err(DeadLetterError::from(ValidationError::UnsupportedEntity(kind.to_string())).into());
        }

        let item = dead.into_requeued(now);
        queue.enqueue(item.clone()).await?;
        self.remove(id).await?;

        self.events.emit(SyncEvent::DlqRequeued {
            item_id: item.id.clone(),
            entity: item.entity_kind,
        });
        Ok(item)
    }

    /// Delete a dead letter without requeueing it.
    pub async fn remove(&self, id: &str) -> Result<Option<DeadLetterItem>, StorageError> {
        let _guard = self.write_lock.lock().await;
        self.store.delete(namespace::DEAD_LETTER, id).await?;
        let (removed, depth) = {
            let mut items = self.items.write();
            let removed = items.remove(id);
            (removed, items.len())
        };
        crate::metrics::set_dead_letter_depth(depth);
        Ok(removed)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<DeadLetterItem> {
        self.items.read().get(id).cloned()
    }

    /// All dead letters, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<DeadLetterItem> {
        let mut items: Vec<_> = self.items.read().values().cloned().collect();
        items.sort_by(|a, b| {
            a.dead_lettered_at
                .cmp(&b.dead_lettered_at)
                .then_with(|| a.item.id.cmp(&b.item.id))
        });
        items
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}
