// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync engine coordinator.
//!
//! The [`SyncEngine`] is the service instance that ties the components
//! together:
//! - Entity validator and identity resolver guarding the enqueue path
//! - Durable sync queue with backpressure
//! - Batch processor dispatching through the entity dispatcher
//! - Dead letter store with expiry and re-queue
//! - Event bus with telemetry and cache invalidation subscribers
//!
//! Several engines can live side by side; nothing is global.
//!
//! # Lifecycle
//!
//! ```text
//! Created → Loading → Ready → Running → ShuttingDown → Stopped
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use offline_sync::{SyncEngine, SyncEngineConfig, InMemoryStore, Operation, RemoteStore};
//! use serde_json::json;
//! use tokio::sync::watch;
//!
//! # async fn example(remote: Arc<dyn RemoteStore>) {
//! let config = SyncEngineConfig::default();
//! let engine = Arc::new(SyncEngine::new(config.clone(), Arc::new(InMemoryStore::new()), remote));
//! engine.start().await.expect("load failed");
//!
//! let (_tx, rx) = watch::channel(config);
//! engine.spawn(rx);
//!
//! engine
//!     .enqueue(
//!         Operation::Create,
//!         "mood_entry",
//!         json!({"user_id": "3f2504e0-4f89-11d3-9a0c-0305e82c3301", "mood": 4}),
//!         None,
//!     )
//!     .await
//!     .expect("enqueue failed");
//!
//! engine.shutdown().await;
//! # }
//! ```

mod types;
mod api;
mod lifecycle;

pub use types::{ChangeRequest, EngineState, SyncStatus};

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::backpressure::BackpressureLevel;
use crate::batch::BatchProcessor;
use crate::cache::CacheInvalidationCoordinator;
use crate::config::SyncEngineConfig;
use crate::dead_letter::DeadLetterStore;
use crate::dispatcher::{EntityDispatcher, RemoteStore};
use crate::entity::EntityValidator;
use crate::events::{EventBus, EventSubscriber, SyncEvent};
use crate::identity::IdentityResolver;
use crate::metrics::TelemetrySubscriber;
use crate::queue::SyncQueue;
use crate::storage::memory::InMemoryStore;
use crate::storage::sqlite::SqliteStore;
use crate::storage::traits::{DurableStore, StorageError};

/// Offline-first sync engine.
///
/// # Thread Safety
///
/// The engine is `Send + Sync`; share it as `Arc<SyncEngine>`. The queue and
/// dead letter store serialize their own structural writes, and per-owner
/// dispatch ordering is enforced by the batch processor.
pub struct SyncEngine {
    /// Configuration (updated at runtime via the watch channel given to `spawn`)
    pub(super) config: RwLock<SyncEngineConfig>,

    /// Engine state (broadcast to watchers)
    pub(super) state: watch::Sender<EngineState>,

    /// Engine state receiver (for internal use)
    pub(super) state_rx: watch::Receiver<EngineState>,

    pub(super) events: EventBus,
    pub(super) validator: EntityValidator,
    pub(super) resolver: IdentityResolver,
    pub(super) queue: Arc<SyncQueue>,
    pub(super) dead_letters: Arc<DeadLetterStore>,
    pub(super) processor: Arc<BatchProcessor>,
    pub(super) cache: Arc<CacheInvalidationCoordinator>,

    /// Wakes the run loop early (connectivity restored)
    pub(super) wake: Arc<Notify>,

    /// Tells the run loop to exit
    pub(super) shutdown_tx: watch::Sender<bool>,

    /// Background loop handle
    pub(super) run_handle: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Create a new sync engine over `store` and `remote`.
    ///
    /// The engine starts in `Created` state. Call [`start()`](Self::start)
    /// to restore persisted items and transition to `Ready`.
    pub fn new(
        config: SyncEngineConfig,
        store: Arc<dyn DurableStore>,
        remote: Arc<dyn RemoteStore>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(EngineState::Created);
        let (shutdown_tx, _) = watch::channel(false);

        let events = EventBus::new();
        let validator = EntityValidator::new(&config.disabled_entity_kinds).with_events(events.clone());
        let queue = Arc::new(SyncQueue::new(store.clone(), config.max_queue_size));
        let dead_letters = Arc::new(DeadLetterStore::new(store, validator.clone(), events.clone()));
        let dispatcher = Arc::new(EntityDispatcher::new(remote, validator.clone(), config.dispatch_timeout()));
        let processor = Arc::new(BatchProcessor::new(
            queue.clone(),
            dead_letters.clone(),
            dispatcher,
            events.clone(),
            &config,
        ));

        let cache = Arc::new(CacheInvalidationCoordinator::new());
        events.register(Arc::new(TelemetrySubscriber));
        events.register(cache.clone());

        Self {
            config: RwLock::new(config),
            state: state_tx,
            state_rx,
            events,
            validator,
            resolver: IdentityResolver::new(),
            queue,
            dead_letters,
            processor,
            cache,
            wake: Arc::new(Notify::new()),
            shutdown_tx,
            run_handle: Mutex::new(None),
        }
    }

    /// Create an engine over the store named by `config.store_path`: a SQLite
    /// file when set, an in-memory store (lost on exit) otherwise.
    pub async fn open(config: SyncEngineConfig, remote: Arc<dyn RemoteStore>) -> Result<Self, StorageError> {
        let store: Arc<dyn DurableStore> = match config.store_path.as_deref() {
            Some(path) => Arc::new(SqliteStore::open(path).await?),
            None => {
                warn!("No store_path configured, pending changes will not survive a restart");
                Arc::new(InMemoryStore::new())
            }
        };
        Ok(Self::new(config, store, remote))
    }

    /// Get current engine state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    pub(super) fn set_state(&self, state: EngineState) {
        self.state.send_replace(state);
        crate::metrics::set_engine_state(&state.to_string());
    }

    /// Check if engine is accepting changes.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state().accepts_changes()
    }

    /// Current queue backpressure level.
    #[must_use]
    pub fn pressure(&self) -> BackpressureLevel {
        self.queue.pressure()
    }

    /// Snapshot of pending and stuck work.
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            state: self.state(),
            pending: self.queue.persisted_size(),
            dead_lettered: self.dead_letters.len(),
            pressure: self.queue.pressure(),
        }
    }

    /// Receive every domain event asynchronously.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Register a synchronous event subscriber.
    pub fn register_subscriber(&self, subscriber: Arc<dyn EventSubscriber>) {
        self.events.register(subscriber);
    }

    /// Cache invalidation coordinator; register read caches here.
    #[must_use]
    pub fn cache(&self) -> &CacheInvalidationCoordinator {
        &self.cache
    }

    #[must_use]
    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    #[must_use]
    pub fn dead_letters(&self) -> &DeadLetterStore {
        &self.dead_letters
    }

    #[must_use]
    pub fn validator(&self) -> &EntityValidator {
        &self.validator
    }

    #[must_use]
    pub fn config(&self) -> SyncEngineConfig {
        self.config.read().clone()
    }

    /// Apply a new configuration to every component.
    pub fn apply_config(&self, config: SyncEngineConfig) {
        self.validator.set_disabled(&config.disabled_entity_kinds);
        self.queue.set_capacity(config.max_queue_size);
        self.processor.apply_config(&config);
        *self.config.write() = config;
    }
}
