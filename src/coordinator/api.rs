//! Enqueue and maintenance API.
//!
//! - `enqueue()` / `enqueue_with()` - validate, resolve the owner, persist
//! - `run_cycle()` - one batch cycle, for callers driving the engine by hand
//! - `sweep_dead_letters()` - expire old dead letters
//! - `requeue_dead_letter()` - hand a dead letter back to the queue
//! - `notify_connectivity_restored()` - run the next cycle now

use serde_json::Value;
use tracing::{debug, warn};

use crate::batch::CycleReport;
use crate::error::{EnqueueError, ValidationError};
use crate::events::SyncEvent;
use crate::storage::traits::StorageError;
use crate::sync_item::{now_millis, Operation, Priority, SyncItem};

use super::{ChangeRequest, SyncEngine};

impl SyncEngine {
    /// Record a local change for sync. Returns the new item id.
    ///
    /// The change is durable when this returns `Ok`. Validation failures are
    /// final and never retried; a backpressure error means the queue is too
    /// full right now and the caller may try again later.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use offline_sync::{SyncEngine, Operation, Priority};
    /// # use serde_json::json;
    /// # async fn example(engine: &SyncEngine) {
    /// let id = engine
    ///     .enqueue(
    ///         Operation::Update,
    ///         "user_profile",
    ///         json!({"userId": "3f2504e0-4f89-11d3-9a0c-0305e82c3301", "name": "Ada"}),
    ///         Some(Priority::High),
    ///     )
    ///     .await
    ///     .expect("enqueue failed");
    /// # }
    /// ```
    pub async fn enqueue(
        &self,
        operation: Operation,
        entity: &str,
        payload: Value,
        priority: Option<Priority>,
    ) -> Result<String, EnqueueError> {
        let mut request = ChangeRequest::new(operation, entity, payload);
        if let Some(priority) = priority {
            request = request.with_priority(priority);
        }
        self.enqueue_with(request).await
    }

    /// [`enqueue`](Self::enqueue) with device id and modification time.
    pub async fn enqueue_with(&self, request: ChangeRequest) -> Result<String, EnqueueError> {
        let state = self.state();
        if !state.accepts_changes() {
            debug!(%state, "Rejecting change: engine not accepting changes");
            return Err(EnqueueError::NotRunning);
        }

        let kind = self.validator.check(&request.entity).ok_or_else(|| {
            let err = ValidationError::UnsupportedEntity(request.entity.clone());
            crate::metrics::record_validation_rejection(err.reason());
            err
        })?;

        let resolved = self.resolver.resolve(&request.payload).map_err(|e| {
            warn!(entity = %kind, reason = %e, "Rejecting change: owner could not be resolved");
            crate::metrics::record_validation_rejection(e.reason());
            e
        })?;

        let mut item = SyncItem::new(request.operation, kind, resolved.owner, resolved.payload, request.priority);
        if let Some(device_id) = request.device_id {
            item = item.with_device_id(device_id);
        }
        if let Some(millis) = request.last_modified_at {
            item = item.with_last_modified_at(millis);
        }

        let id = item.id.clone();
        let priority = item.priority;
        self.queue.enqueue(item).await?;

        self.events.emit(SyncEvent::ItemEnqueued {
            item_id: id.clone(),
            entity: kind,
            priority,
        });
        Ok(id)
    }

    /// Run one batch cycle now.
    pub async fn run_cycle(&self, now: i64) -> CycleReport {
        self.processor.run_cycle(now).await
    }

    /// Remove dead letters older than the configured retention.
    /// Returns how many were removed.
    pub async fn sweep_dead_letters(&self, now: i64) -> Result<usize, StorageError> {
        let max_age_ms = self.config.read().dlq_max_age_ms();
        let swept = self.dead_letters.sweep_expired(now, max_age_ms).await?;
        Ok(swept.len())
    }

    /// Move a dead letter back to the queue with fresh retry state.
    pub async fn requeue_dead_letter(&self, id: &str) -> Result<String, EnqueueError> {
        if !self.state().accepts_changes() {
            return Err(EnqueueError::NotRunning);
        }
        let item = self.dead_letters.requeue(id, &self.queue, now_millis()).await?;
        Ok(item.id)
    }

    /// Connectivity came back: run the next cycle immediately.
    pub fn notify_connectivity_restored(&self) {
        debug!("Connectivity restored, waking sync loop");
        self.wake.notify_one();
    }
}
