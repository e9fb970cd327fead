//! Configuration for the sync engine.
//!
//! # Example
//!
//! ```
//! use offline_sync::SyncEngineConfig;
//!
//! let config = SyncEngineConfig::default();
//! assert_eq!(config.max_retries, 8);
//! assert_eq!(config.max_queue_size, 1000);
//!
//! let config = SyncEngineConfig {
//!     store_path: Some("./sync_queue.db".into()),
//!     concurrency: 4,
//!     ..Default::default()
//! };
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::entity::EntityKind;
use crate::resilience::retry::RetryPolicy;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Configuration for the sync engine.
///
/// Every field has a default; deserializing `{}` gives the stock engine.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncEngineConfig {
    /// SQLite file for the durable queue. `None` keeps everything in memory.
    #[serde(default)]
    pub store_path: Option<String>,

    /// Transient failures before an item is dead-lettered
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Queue capacity; see [`crate::BackpressureLevel`]
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Items pulled per cycle
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Concurrent remote dispatches per cycle
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Background cycle interval
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,

    /// Dead letter retention
    #[serde(default = "default_dlq_max_age_days")]
    pub dlq_max_age_days: u32,

    /// How often the background loop sweeps the dead letter store
    #[serde(default = "default_dlq_sweep_interval_secs")]
    pub dlq_sweep_interval_secs: u64,

    /// Backoff base and cap
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_retry_cap_ms")]
    pub retry_cap_ms: u64,

    /// Per-dispatch timeout
    #[serde(default = "default_dispatch_timeout_ms")]
    pub dispatch_timeout_ms: u64,

    /// Kinds temporarily removed from the whitelist
    #[serde(default)]
    pub disabled_entity_kinds: Vec<EntityKind>,
}

fn default_max_retries() -> u32 { 8 }
fn default_max_queue_size() -> usize { 1000 }
fn default_batch_size() -> usize { 10 }
fn default_concurrency() -> usize { 2 }
fn default_sync_interval_ms() -> u64 { 30_000 }
fn default_dlq_max_age_days() -> u32 { 7 }
fn default_dlq_sweep_interval_secs() -> u64 { 3600 }
fn default_retry_base_ms() -> u64 { 1000 }
fn default_retry_cap_ms() -> u64 { 5 * 60 * 1000 }
fn default_dispatch_timeout_ms() -> u64 { 30_000 }

impl Default for SyncEngineConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            max_retries: default_max_retries(),
            max_queue_size: default_max_queue_size(),
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            sync_interval_ms: default_sync_interval_ms(),
            dlq_max_age_days: default_dlq_max_age_days(),
            dlq_sweep_interval_secs: default_dlq_sweep_interval_secs(),
            retry_base_ms: default_retry_base_ms(),
            retry_cap_ms: default_retry_cap_ms(),
            dispatch_timeout_ms: default_dispatch_timeout_ms(),
            disabled_entity_kinds: Vec::new(),
        }
    }
}

impl SyncEngineConfig {
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base: Duration::from_millis(self.retry_base_ms),
            cap: Duration::from_millis(self.retry_cap_ms),
            max_retries: self.max_retries,
        }
    }

    #[must_use]
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms.max(1))
    }

    #[must_use]
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms.max(1))
    }

    #[must_use]
    pub fn dlq_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.dlq_sweep_interval_secs.max(1))
    }

    /// Dead letter retention in millis.
    #[must_use]
    pub fn dlq_max_age_ms(&self) -> i64 {
        i64::from(self.dlq_max_age_days) * DAY_MS
    }
}
