// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff.
//!
//! Two layers live here:
//! - [`RetryScheduler`]: per-item backoff for remote sync. The delay is
//!   computed once per failure and persisted on the item as
//!   `next_attempt_at`, so due-checks are pure and survive restarts.
//! - [`retry()`] with [`RetryConfig`] presets: in-process retry of local
//!   storage calls (open, put, scan).
//!
//! # Example
//!
//! ```
//! use offline_sync::{RetryPolicy, RetryScheduler};
//! use std::time::Duration;
//!
//! let scheduler = RetryScheduler::new(RetryPolicy::default());
//!
//! // Attempt 3: 1s * 2^3 = 8s, ±25%
//! let delay = scheduler.next_delay(3);
//! assert!(delay >= Duration::from_secs(6) && delay <= Duration::from_secs(10));
//!
//! // Capped at 5 minutes no matter how many attempts
//! assert!(scheduler.next_delay(30) <= Duration::from_secs(300));
//! assert!(scheduler.is_exhausted(8));
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::sync_item::SyncItem;

/// Maximum relative jitter applied to the exponential term.
pub const JITTER_RATIO: f64 = 0.25;

/// Backoff law parameters for remote sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    /// Retry ceiling; an item whose count reaches it is dead-lettered
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(300),
            max_retries: 8,
        }
    }
}

/// Computes backoff delays and decides which items are due.
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    policy: RetryPolicy,
}

impl RetryScheduler {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// `base * 2^retry_count` in seconds, before jitter and cap.
    #[must_use]
    pub fn exponential_secs(&self, retry_count: u32) -> f64 {
        // 2^64 already dwarfs any sane cap
        let exponent = retry_count.min(64) as i32;
        self.policy.base.as_secs_f64() * 2f64.powi(exponent)
    }

    /// `min(base * 2^n + jitter, cap)` with jitter uniform in ±25% of the
    /// exponential term.
    #[must_use]
    pub fn next_delay(&self, retry_count: u32) -> Duration {
        self.next_delay_with(retry_count, &mut rand::thread_rng())
    }

    /// [`next_delay`](Self::next_delay) with a caller-supplied RNG.
    pub fn next_delay_with<R: Rng>(&self, retry_count: u32, rng: &mut R) -> Duration {
        let exponential = self.exponential_secs(retry_count);
        let factor: f64 = rng.gen_range(-JITTER_RATIO..=JITTER_RATIO);
        let jittered = exponential * (1.0 + factor);
        let capped = jittered.min(self.policy.cap.as_secs_f64()).max(0.0);
        Duration::from_secs_f64(capped)
    }

    /// Whether `retry_count` has reached the ceiling.
    #[must_use]
    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.policy.max_retries
    }

    /// Whether an item may be dispatched at `now` (epoch millis).
    #[must_use]
    pub fn is_due(&self, item: &SyncItem, now: i64) -> bool {
        !self.is_exhausted(item.retry_count) && item.next_attempt_at.map_or(true, |at| now >= at)
    }

    /// Record a transient failure: bump `retry_count` and, unless exhausted,
    /// set `next_attempt_at`. Returns the chosen delay, or `None` when the
    /// item must be dead-lettered instead.
    pub fn record_failure(&self, item: &mut SyncItem, now: i64, reason: &str) -> Option<Duration> {
        item.retry_count = item.retry_count.saturating_add(1);
        item.last_error = Some(reason.to_string());
        if self.is_exhausted(item.retry_count) {
            item.next_attempt_at = None;
            return None;
        }
        // First retry waits `base`, the next `2 * base`, and so on.
        let delay = self.next_delay(item.retry_count - 1);
        let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
        item.next_attempt_at = Some(now.saturating_add(delay_ms));
        Some(delay)
    }
}

impl Default for RetryScheduler {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

/// Configuration for in-process retry of local operations.
///
/// Use the preset constructors for common patterns:
/// - [`RetryConfig::startup()`] - Fast-fail when opening the store
/// - [`RetryConfig::query()`] - Quick retry for individual statements
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub max_retries: usize,
}

impl RetryConfig {
    /// Fast-fail retry for opening the local store.
    /// Attempts 5 times with exponential backoff, failing after ~5 seconds.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Quick retry for individual statements (SQLITE_BUSY and friends).
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(500),
            factor: 2.0,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }
}

pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = config.initial_delay;
    let mut attempts = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    info!("Operation '{}' succeeded after {} retries", operation_name, attempts);
                }
                return Ok(val);
            }
            Err(err) => {
                attempts += 1;
                if attempts >= config.max_retries {
                    return Err(err);
                }

                warn!(
                    "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
                    operation_name, attempts, config.max_retries, err, delay
                );

                sleep(delay).await;
                delay = (delay.mul_f64(config.factor)).min(config.max_delay);
            }
        }
    }
}
