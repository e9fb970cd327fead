// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! One sync cycle: pull due items, dispatch them, settle every outcome.
//!
//! # Ordering and concurrency
//!
//! Due items are grouped by owner. Each owner's items form a chain that runs
//! strictly one at a time under an owner-keyed lock; chains for different
//! owners run in parallel, with a semaphore capping concurrent dispatches
//! across the whole cycle. An owner whose lock is held (by a cycle still in
//! flight) is skipped. A chain stops at its first item that did not sync, so
//! later changes for that owner never overtake an earlier one.
//!
//! Outcomes settle independently: one item failing never affects another
//! owner's chain.
//!
//! ```text
//! PENDING → PROCESSING → SYNCED (removed)
//!                      → RETRY (retry_count + 1, next_attempt_at set) → PENDING
//!                      → DEAD_LETTERED (ceiling reached or permanent failure)
//!                      → SUPERSEDED (newer remote copy, removed)
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{watch, Mutex, OwnedMutexGuard, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::SyncEngineConfig;
use crate::dead_letter::DeadLetterStore;
use crate::dispatcher::{DispatchOutcome, EntityDispatcher};
use crate::error::DispatchError;
use crate::events::{EventBus, SyncEvent};
use crate::identity::OwnerId;
use crate::queue::SyncQueue;
use crate::resilience::retry::RetryScheduler;
use crate::sync_item::SyncItem;

const EXHAUSTED_REASON: &str = "retry ceiling reached";

/// Tally of one cycle. Every item considered lands in exactly one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub total: usize,
    pub succeeded: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    pub superseded: usize,
    /// Due but not attempted: owner busy, earlier item failed, or halted
    pub deferred: usize,
}

impl CycleReport {
    fn merge(&mut self, other: CycleReport) {
        self.total += other.total;
        self.succeeded += other.succeeded;
        self.retried += other.retried;
        self.dead_lettered += other.dead_lettered;
        self.superseded += other.superseded;
        self.deferred += other.deferred;
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

pub struct BatchProcessor {
    queue: Arc<SyncQueue>,
    dead_letters: Arc<DeadLetterStore>,
    dispatcher: Arc<EntityDispatcher>,
    scheduler: RwLock<RetryScheduler>,
    events: EventBus,
    owner_locks: DashMap<OwnerId, Arc<Mutex<()>>>,
    batch_size: AtomicUsize,
    concurrency: AtomicUsize,
    halt_tx: watch::Sender<bool>,
}

impl BatchProcessor {
    pub fn new(
        queue: Arc<SyncQueue>,
        dead_letters: Arc<DeadLetterStore>,
        dispatcher: Arc<EntityDispatcher>,
        events: EventBus,
        config: &SyncEngineConfig,
    ) -> Self {
        let (halt_tx, _) = watch::channel(false);
        Self {
            queue,
            dead_letters,
            dispatcher,
            scheduler: RwLock::new(RetryScheduler::new(config.retry_policy())),
            events,
            owner_locks: DashMap::new(),
            batch_size: AtomicUsize::new(config.batch_size),
            concurrency: AtomicUsize::new(config.concurrency.max(1)),
            halt_tx,
        }
    }

    /// Pick up batch size, concurrency and backoff changes for the next cycle.
    pub fn apply_config(&self, config: &SyncEngineConfig) {
        *self.scheduler.write() = RetryScheduler::new(config.retry_policy());
        self.batch_size.store(config.batch_size, Ordering::Release);
        self.concurrency.store(config.concurrency.max(1), Ordering::Release);
        self.dispatcher.set_timeout(config.dispatch_timeout());
    }

    #[must_use]
    pub fn scheduler(&self) -> RetryScheduler {
        self.scheduler.read().clone()
    }

    /// Stop starting new dispatches. In-flight dispatches finish (or time out).
    pub fn halt(&self) {
        self.halt_tx.send_replace(true);
    }

    pub fn resume(&self) {
        self.halt_tx.send_replace(false);
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        *self.halt_tx.borrow()
    }

    /// Run one cycle at `now` (epoch millis).
    #[tracing::instrument(skip(self))]
    pub async fn run_cycle(self: &Arc<Self>, now: i64) -> CycleReport {
        let started = Instant::now();
        let scheduler = self.scheduler();
        let mut report = CycleReport::default();

        if self.is_halted() {
            return report;
        }

        report.merge(self.dead_letter_exhausted(&scheduler, now).await);

        let due = self
            .queue
            .dequeue_due(now, &scheduler, self.batch_size.load(Ordering::Acquire));
        report.total += due.len();

        let semaphore = Arc::new(Semaphore::new(self.concurrency.load(Ordering::Acquire)));
        let mut chains = JoinSet::new();

        for (owner, items) in group_by_owner(due) {
            let Some(guard) = self.try_lock_owner(&owner) else {
                debug!(%owner, items = items.len(), "Owner busy, deferring to next cycle");
                report.deferred += items.len();
                continue;
            };
            let this = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let scheduler = scheduler.clone();
            chains.spawn(async move { this.run_chain(guard, items, semaphore, scheduler, now).await });
        }

        while let Some(joined) = chains.join_next().await {
            match joined {
                Ok(chain_report) => report.merge(chain_report),
                Err(e) => error!(error = %e, "Owner chain task failed"),
            }
        }

        self.prune_owner_locks();
        crate::metrics::record_cycle(report.total, report.succeeded, started.elapsed());
        crate::metrics::set_backpressure_level(self.queue.pressure());
        if !report.is_empty() {
            info!(
                total = report.total,
                succeeded = report.succeeded,
                retried = report.retried,
                dead_lettered = report.dead_lettered,
                superseded = report.superseded,
                deferred = report.deferred,
                "Sync cycle complete"
            );
        }
        report
    }

    fn try_lock_owner(&self, owner: &OwnerId) -> Option<OwnedMutexGuard<()>> {
        let lock = self
            .owner_locks
            .entry(owner.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.try_lock_owned().ok()
    }

    /// Drop lock entries nobody holds so the map tracks only active owners.
    fn prune_owner_locks(&self) {
        // An owned guard holds a clone of the Arc.
        self.owner_locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Items already at the ceiling (lowered by a config reload, or a
    /// dead-letter write that failed last time) go straight to the DLQ.
    async fn dead_letter_exhausted(&self, scheduler: &RetryScheduler, now: i64) -> CycleReport {
        let mut report = CycleReport::default();
        for item in self.queue.exhausted(scheduler) {
            let Some(_guard) = self.try_lock_owner(&item.owner_id) else {
                continue;
            };
            report.total += 1;
            if self.move_to_dead_letters(item, EXHAUSTED_REASON, now).await {
                report.dead_lettered += 1;
            } else {
                report.deferred += 1;
            }
        }
        report
    }

    async fn run_chain(
        &self,
        _owner_guard: OwnedMutexGuard<()>,
        items: Vec<SyncItem>,
        semaphore: Arc<Semaphore>,
        scheduler: RetryScheduler,
        now: i64,
    ) -> CycleReport {
        let mut report = CycleReport::default();
        let mut remaining = items.len();

        for item in items {
            if self.is_halted() {
                break;
            }
            let Ok(_permit) = semaphore.acquire().await else {
                break;
            };

            // Another cycle may have settled this item before we got the lock.
            let Some(current) = self.queue.get(&item.id) else {
                remaining -= 1;
                report.deferred += 1;
                continue;
            };
            if !scheduler.is_due(&current, now) {
                break;
            }

            remaining -= 1;
            let settled = self.settle(current, &scheduler, now, &mut report).await;
            if !settled {
                break;
            }
        }

        report.deferred += remaining;
        report
    }

    /// Dispatch one item and apply the outcome. Returns whether the owner's
    /// chain may continue.
    async fn settle(
        &self,
        mut item: SyncItem,
        scheduler: &RetryScheduler,
        now: i64,
        report: &mut CycleReport,
    ) -> bool {
        let result = self.dispatcher.dispatch(&item).await;

        match result {
            Ok(DispatchOutcome::Synced) => {
                if let Err(e) = self.queue.remove(&item.id).await {
                    // Stays queued and is resent; the upsert is idempotent.
                    error!(item_id = %item.id, error = %e, "Synced item could not be removed from queue");
                    crate::metrics::record_storage_error("queue_remove");
                    report.deferred += 1;
                    return false;
                }
                report.succeeded += 1;
                self.events.emit(SyncEvent::SyncSuccess {
                    item_id: item.id,
                    entity: item.entity_kind,
                    owner: item.owner_id,
                    retry_count: item.retry_count,
                });
                true
            }
            Ok(DispatchOutcome::Superseded { .. }) => {
                if let Err(e) = self.queue.remove(&item.id).await {
                    error!(item_id = %item.id, error = %e, "Superseded item could not be removed from queue");
                    crate::metrics::record_storage_error("queue_remove");
                    report.deferred += 1;
                    return false;
                }
                report.superseded += 1;
                self.events.emit(SyncEvent::ConflictSuperseded {
                    item_id: item.id,
                    entity: item.entity_kind,
                    retry_count: item.retry_count,
                });
                true
            }
            Err(err) => {
                self.events.emit(SyncEvent::SyncFailed {
                    item_id: item.id.clone(),
                    entity: item.entity_kind,
                    retry_count: item.retry_count,
                    class: err.class(),
                });

                if !err.is_transient() {
                    if matches!(err, DispatchError::Unroutable(_)) {
                        error!(item_id = %item.id, entity = %item.entity_kind, "No route for queued item");
                    }
                    if self.move_to_dead_letters(item, &err.to_string(), now).await {
                        report.dead_lettered += 1;
                    } else {
                        report.deferred += 1;
                    }
                    return false;
                }

                match scheduler.record_failure(&mut item, now, &err.to_string()) {
                    Some(delay) => {
                        if let Err(e) = self.queue.update(&item).await {
                            warn!(item_id = %item.id, error = %e, "Failed to persist retry state");
                            crate::metrics::record_storage_error("queue_update");
                        }
                        report.retried += 1;
                        self.events.emit(SyncEvent::RetryScheduled {
                            item_id: item.id,
                            entity: item.entity_kind,
                            retry_count: item.retry_count,
                            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        });
                    }
                    None => {
                        let reason = format!("{} after {} attempts: {}", EXHAUSTED_REASON, item.retry_count, err);
                        if self.move_to_dead_letters(item, &reason, now).await {
                            report.dead_lettered += 1;
                        } else {
                            report.retried += 1;
                        }
                    }
                }
                false
            }
        }
    }

    /// DLQ first, then out of the queue. On a failed DLQ write the item stays
    /// queued with its final retry count and is picked up next cycle.
    async fn move_to_dead_letters(&self, item: SyncItem, reason: &str, now: i64) -> bool {
        let id = item.id.clone();
        if let Err(e) = self.dead_letters.add(item.clone(), reason, now).await {
            error!(item_id = %id, error = %e, "Failed to dead-letter item");
            crate::metrics::record_storage_error("dlq_add");
            if let Err(e) = self.queue.update(&item).await {
                warn!(item_id = %id, error = %e, "Failed to persist retry state");
            }
            return false;
        }
        if let Err(e) = self.queue.remove(&id).await {
            // Gone from the index, so never redispatched; start() purges the
            // durable copy.
            error!(item_id = %id, error = %e, "Dead-lettered item could not be removed from queue");
            crate::metrics::record_storage_error("queue_remove");
        }
        true
    }
}

/// Group in drain order, owners ordered by their first item.
fn group_by_owner(items: Vec<SyncItem>) -> Vec<(OwnerId, Vec<SyncItem>)> {
    let mut index: HashMap<OwnerId, usize> = HashMap::new();
    let mut groups: Vec<(OwnerId, Vec<SyncItem>)> = Vec::new();
    for item in items {
        match index.get(&item.owner_id) {
            Some(&i) => groups[i].1.push(item),
            None => {
                index.insert(item.owner_id.clone(), groups.len());
                groups.push((item.owner_id.clone(), vec![item]));
            }
        }
    }
    groups
}
