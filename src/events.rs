// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Typed domain events and the bus that fans them out.
//!
//! The engine never performs telemetry or cache I/O inline: it emits a
//! [`SyncEvent`] and independent subscribers react. Synchronous subscribers
//! ([`EventSubscriber`]) run in emission order before `emit` returns; async
//! consumers (a "pending sync" badge, for instance) use [`EventBus::subscribe`].
//!
//! Events never carry payload content. Only [`SyncEvent::SyncSuccess`]
//! carries the owner id, for cache invalidation.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::entity::EntityKind;
use crate::identity::OwnerId;
use crate::sync_item::Priority;

const BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    ItemEnqueued {
        item_id: String,
        entity: EntityKind,
        priority: Priority,
    },
    /// Raw caller-supplied kind that failed the whitelist.
    ItemDroppedUnsupportedEntity {
        entity: String,
    },
    RetryScheduled {
        item_id: String,
        entity: EntityKind,
        retry_count: u32,
        delay_ms: u64,
    },
    SyncSuccess {
        item_id: String,
        entity: EntityKind,
        owner: OwnerId,
        retry_count: u32,
    },
    SyncFailed {
        item_id: String,
        entity: EntityKind,
        retry_count: u32,
        class: &'static str,
    },
    DeadLettered {
        item_id: String,
        entity: EntityKind,
        retry_count: u32,
        reason: String,
    },
    DlqExpired {
        item_id: String,
        entity: EntityKind,
        retry_count: u32,
    },
    DlqRequeued {
        item_id: String,
        entity: EntityKind,
    },
    /// A newer remote copy won last-write-wins; the local change was dropped.
    ConflictSuperseded {
        item_id: String,
        entity: EntityKind,
        retry_count: u32,
    },
}

impl SyncEvent {
    /// Telemetry event name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ItemEnqueued { .. } => "item_enqueued",
            Self::ItemDroppedUnsupportedEntity { .. } => "item_dropped_unsupported_entity",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::SyncSuccess { .. } => "sync_success",
            Self::SyncFailed { .. } => "sync_failed",
            Self::DeadLettered { .. } => "dead_lettered",
            Self::DlqExpired { .. } => "dlq_expired",
            Self::DlqRequeued { .. } => "dlq_requeued",
            Self::ConflictSuperseded { .. } => "conflict_superseded",
        }
    }

    /// Typed entity kind, when the event concerns a queued item.
    #[must_use]
    pub fn entity(&self) -> Option<EntityKind> {
        match self {
            Self::ItemDroppedUnsupportedEntity { .. } => None,
            Self::ItemEnqueued { entity, .. }
            | Self::RetryScheduled { entity, .. }
            | Self::SyncSuccess { entity, .. }
            | Self::SyncFailed { entity, .. }
            | Self::DeadLettered { entity, .. }
            | Self::DlqExpired { entity, .. }
            | Self::DlqRequeued { entity, .. }
            | Self::ConflictSuperseded { entity, .. } => Some(*entity),
        }
    }

    #[must_use]
    pub fn item_id(&self) -> Option<&str> {
        match self {
            Self::ItemDroppedUnsupportedEntity { .. } => None,
            Self::ItemEnqueued { item_id, .. }
            | Self::RetryScheduled { item_id, .. }
            | Self::SyncSuccess { item_id, .. }
            | Self::SyncFailed { item_id, .. }
            | Self::DeadLettered { item_id, .. }
            | Self::DlqExpired { item_id, .. }
            | Self::DlqRequeued { item_id, .. }
            | Self::ConflictSuperseded { item_id, .. } => Some(item_id),
        }
    }
}

impl fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Synchronous event observer.
pub trait EventSubscriber: Send + Sync {
    fn on_event(&self, event: &SyncEvent);
}

impl<F> EventSubscriber for F
where
    F: Fn(&SyncEvent) + Send + Sync,
{
    fn on_event(&self, event: &SyncEvent) {
        self(event)
    }
}

struct BusInner {
    subscribers: RwLock<Vec<Arc<dyn EventSubscriber>>>,
    tx: broadcast::Sender<SyncEvent>,
}

/// Cheaply cloneable fan-out point for [`SyncEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(Vec::new()),
                tx,
            }),
        }
    }

    /// Register a synchronous subscriber.
    pub fn register(&self, subscriber: Arc<dyn EventSubscriber>) {
        self.inner.subscribers.write().push(subscriber);
    }

    /// Receive events asynchronously. Slow receivers lag and lose the oldest events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.tx.subscribe()
    }

    pub fn emit(&self, event: SyncEvent) {
        // Snapshot so a subscriber may register others without deadlocking.
        let subscribers: Vec<_> = self.inner.subscribers.read().clone();
        for subscriber in &subscribers {
            subscriber.on_event(&event);
        }
        // No receivers is fine.
        let _ = self.inner.tx.send(event);
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn enqueued(id: &str) -> SyncEvent {
        SyncEvent::ItemEnqueued {
            item_id: id.to_string(),
            entity: EntityKind::MoodEntry,
            priority: Priority::Normal,
        }
    }

    #[test]
    fn test_event_names_match_taxonomy() {
        assert_eq!(enqueued("a").name(), "item_enqueued");
        assert_eq!(
            SyncEvent::ItemDroppedUnsupportedEntity { entity: "x".into() }.name(),
            "item_dropped_unsupported_entity"
        );
        assert_eq!(
            SyncEvent::DlqRequeued { item_id: "a".into(), entity: EntityKind::Achievement }.name(),
            "dlq_requeued"
        );
    }

    #[test]
    fn test_sync_subscribers_see_events_in_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        bus.register(Arc::new(move |event: &SyncEvent| {
            seen_clone.lock().push(event.item_id().unwrap_or_default().to_string());
        }));

        bus.emit(enqueued("1"));
        bus.emit(enqueued("2"));

        assert_eq!(*seen.lock(), vec!["1".to_string(), "2".to_string()]);
    }

    #[tokio::test]
    async fn test_broadcast_receivers_get_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(enqueued("abc"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.item_id(), Some("abc"));
        assert_eq!(event.entity(), Some(EntityKind::MoodEntry));
    }

    #[test]
    fn test_emit_without_receivers_is_fine() {
        let bus = EventBus::default();
        bus.emit(enqueued("x"));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
