// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache invalidation on confirmed remote success.
//!
//! Read caches and derived views register per entity kind. The coordinator
//! listens on the event bus and publishes only for [`SyncEvent::SyncSuccess`];
//! retries, failures, dead letters and superseded changes never notify.
//! There is no retry: a missed notification leaves a stale cache, which the
//! owning cache corrects on its own schedule.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use offline_sync::{CacheInvalidationCoordinator, EntityKind, OwnerId};
//!
//! let coordinator = CacheInvalidationCoordinator::new();
//! coordinator.register(EntityKind::MoodEntry, Arc::new(|kind: EntityKind, owner: &OwnerId| {
//!     println!("invalidate {} for {}", kind, owner);
//! }));
//!
//! let owner = OwnerId::parse("3f2504e0-4f89-11d3-9a0c-0305e82c3301").unwrap();
//! assert_eq!(coordinator.notify(EntityKind::MoodEntry, &owner), 1);
//! assert_eq!(coordinator.notify(EntityKind::Achievement, &owner), 0);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::entity::EntityKind;
use crate::events::{EventSubscriber, SyncEvent};
use crate::identity::OwnerId;

/// Downstream cache notified when an entity of its kind synced.
pub trait CacheSubscriber: Send + Sync {
    fn invalidate(&self, kind: EntityKind, owner: &OwnerId);
}

impl<F> CacheSubscriber for F
where
    F: Fn(EntityKind, &OwnerId) + Send + Sync,
{
    fn invalidate(&self, kind: EntityKind, owner: &OwnerId) {
        self(kind, owner)
    }
}

#[derive(Default)]
pub struct CacheInvalidationCoordinator {
    subscribers: RwLock<HashMap<EntityKind, Vec<Arc<dyn CacheSubscriber>>>>,
}

impl CacheInvalidationCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: EntityKind, subscriber: Arc<dyn CacheSubscriber>) {
        self.subscribers.write().entry(kind).or_default().push(subscriber);
    }

    /// Publish one invalidation. Returns how many subscribers were called.
    pub fn notify(&self, kind: EntityKind, owner: &OwnerId) -> usize {
        let subscribers = match self.subscribers.read().get(&kind) {
            Some(subs) => subs.clone(),
            None => return 0,
        };
        for subscriber in &subscribers {
            subscriber.invalidate(kind, owner);
        }
        debug!(entity = %kind, subscribers = subscribers.len(), "Cache invalidation published");
        subscribers.len()
    }

    #[must_use]
    pub fn subscriber_count(&self, kind: EntityKind) -> usize {
        self.subscribers.read().get(&kind).map_or(0, Vec::len)
    }
}

impl EventSubscriber for CacheInvalidationCoordinator {
    fn on_event(&self, event: &SyncEvent) {
        if let SyncEvent::SyncSuccess { entity, owner, .. } = event {
            self.notify(*entity, owner);
        }
    }
}

impl fmt::Debug for CacheInvalidationCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<EntityKind, usize> = self
            .subscribers
            .read()
            .iter()
            .map(|(kind, subs)| (*kind, subs.len()))
            .collect();
        f.debug_struct("CacheInvalidationCoordinator")
            .field("subscribers", &counts)
            .finish()
    }
}
