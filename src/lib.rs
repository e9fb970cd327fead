//! # Offline Sync
//!
//! An offline-first sync engine: local writes are durable immediately and
//! delivered to a remote persistence service in the background, with retries,
//! per-owner ordering and a dead letter store so no change silently vanishes.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Enqueue API                          │
//! │  • Entity whitelist (EntityValidator)                      │
//! │  • Owner resolution + sanitization (IdentityResolver)      │
//! │  • Backpressure on the bounded queue                       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Sync Queue (durable)                       │
//! │  • SQLite or in-memory DurableStore                        │
//! │  • Priority → age ordering, per-owner due prefix           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!              (timer / connectivity-triggered cycle)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Batch Processor                          │
//! │  • Owner-keyed locks, bounded dispatch concurrency         │
//! │  • Entity Dispatcher → RemoteStore::upsert                 │
//! │  • Retry Scheduler: exponential backoff with jitter        │
//! └─────────────────────────────────────────────────────────────┘
//!          │ success                │ exhausted / permanent
//!          ▼                        ▼
//! ┌──────────────────────┐   ┌──────────────────────────────────┐
//! │ Cache invalidation   │   │ Dead Letter Store                │
//! │ (SyncSuccess only)   │   │ • expiry sweep, manual re-queue  │
//! └──────────────────────┘   └──────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use offline_sync::{
//!     InMemoryStore, Operation, RemoteError, RemoteStore, SyncEngine, SyncEngineConfig, UpsertRequest,
//! };
//! use serde_json::json;
//! use tokio::sync::watch;
//!
//! struct Backend;
//!
//! #[async_trait]
//! impl RemoteStore for Backend {
//!     async fn upsert(&self, request: &UpsertRequest) -> Result<(), RemoteError> {
//!         println!("upsert into {}", request.collection);
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = SyncEngineConfig::default();
//!     let engine = Arc::new(SyncEngine::new(
//!         config.clone(),
//!         Arc::new(InMemoryStore::new()),
//!         Arc::new(Backend),
//!     ));
//!     engine.start().await.expect("Failed to start");
//!
//!     let (_tx, rx) = watch::channel(config);
//!     engine.spawn(rx);
//!
//!     engine
//!         .enqueue(
//!             Operation::Create,
//!             "mood_entry",
//!             json!({"user_id": "3f2504e0-4f89-11d3-9a0c-0305e82c3301", "mood": 4}),
//!             None,
//!         )
//!         .await
//!         .expect("Failed to enqueue");
//!
//!     engine.shutdown().await;
//! }
//! ```
//!
//! ## Configuration
//!
//! See [`SyncEngineConfig`] for all configuration options.
//!
//! ## Modules
//!
//! - [`coordinator`]: The [`SyncEngine`] service instance and its lifecycle
//! - [`entity`] / [`identity`]: Enqueue-time validation and owner resolution
//! - [`queue`]: Durable bounded queue
//! - [`batch`]: Batch processor (one sync cycle)
//! - [`dispatcher`]: Routing to the remote service, conflict handling
//! - [`dead_letter`]: Dead letter store
//! - [`cache`]: Cache invalidation coordinator
//! - [`events`]: Typed domain events and the event bus
//! - [`storage`]: Durable local stores (SQLite, memory)
//! - [`resilience`]: Retry and backoff
//! - [`backpressure`]: Queue fill levels and admission

pub mod config;
pub mod error;
pub mod entity;
pub mod identity;
pub mod sync_item;
pub mod storage;
pub mod resilience;
pub mod backpressure;
pub mod queue;
pub mod dispatcher;
pub mod dead_letter;
pub mod cache;
pub mod events;
pub mod batch;
pub mod coordinator;
pub mod metrics;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use config::SyncEngineConfig;
pub use coordinator::{SyncEngine, EngineState, SyncStatus, ChangeRequest};
pub use error::{ValidationError, EnqueueError, DispatchError, DeadLetterError};
pub use entity::{EntityKind, EntityValidator};
pub use identity::{IdentityResolver, OwnerId, ResolvedPayload};
pub use sync_item::{SyncItem, DeadLetterItem, Operation, Priority};
pub use backpressure::BackpressureLevel;
pub use queue::{SyncQueue, LoadReport};
pub use batch::{BatchProcessor, CycleReport};
pub use dispatcher::{EntityDispatcher, RemoteStore, RemoteError, UpsertRequest, DispatchOutcome};
pub use dead_letter::DeadLetterStore;
pub use cache::{CacheInvalidationCoordinator, CacheSubscriber};
pub use events::{EventBus, EventSubscriber, SyncEvent};
pub use storage::{DurableStore, InMemoryStore, SqliteStore, StorageError, StoredRecord};
pub use resilience::retry::{RetryConfig, RetryPolicy, RetryScheduler};
pub use metrics::{LatencyTimer, TelemetrySubscriber};
