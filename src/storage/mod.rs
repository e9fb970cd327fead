//! Durable local storage for the sync queue and dead letter store.
//!
//! - [`InMemoryStore`]: DashMap-backed, for tests and ephemeral sessions
//! - [`SqliteStore`]: SQLite file in WAL mode, survives restarts

pub mod traits;
pub mod memory;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{namespace, DurableStore, StorageError, StoredRecord};
