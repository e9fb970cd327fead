//! Engine lifecycle management: start, run loop, shutdown.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::SyncEngineConfig;
use crate::storage::traits::StorageError;
use crate::sync_item::now_millis;

use super::{EngineState, SyncEngine};

impl SyncEngine {
    /// Restore the queue and the dead letter store from durable storage.
    ///
    /// Corrupted records are dropped and logged; they never fail startup.
    /// A queued item that is also dead-lettered is dropped from the queue.
    /// On success the engine is `Ready`: changes are accepted and cycles can
    /// be driven by hand or by [`spawn()`](Self::spawn).
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<(), StorageError> {
        let startup_start = Instant::now();
        info!("Starting sync engine...");
        self.set_state(EngineState::Loading);

        let phase_start = Instant::now();
        let queue_report = match self.queue.load().await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Failed to restore sync queue");
                crate::metrics::record_storage_error("queue_load");
                self.set_state(EngineState::Created);
                return Err(e);
            }
        };
        crate::metrics::record_startup_phase("queue_load", phase_start.elapsed());

        let phase_start = Instant::now();
        let dlq_report = match self.dead_letters.load().await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Failed to restore dead letter store");
                crate::metrics::record_storage_error("dlq_load");
                self.set_state(EngineState::Created);
                return Err(e);
            }
        };
        crate::metrics::record_startup_phase("dlq_load", phase_start.elapsed());

        let dead_ids: Vec<String> = self.dead_letters.list().into_iter().map(|d| d.item.id).collect();
        let purged = self.queue.purge(dead_ids.iter().map(String::as_str)).await;

        self.processor.resume();
        self.set_state(EngineState::Ready);
        crate::metrics::record_startup_phase("total", startup_start.elapsed());
        info!(
            pending = self.queue.len(),
            dead_lettered = dlq_report.loaded,
            corrupted = queue_report.corrupted + dlq_report.corrupted,
            purged,
            "Sync engine ready"
        );
        Ok(())
    }

    /// Start the background loop: a cycle every `sync_interval_ms`, an
    /// immediate cycle on [`notify_connectivity_restored`](Self::notify_connectivity_restored),
    /// and a dead letter sweep every `dlq_sweep_interval_secs`. Config
    /// updates sent on `config_rx` apply from the next cycle.
    ///
    /// Does nothing unless the engine is `Ready`.
    pub fn spawn(self: &Arc<Self>, config_rx: watch::Receiver<SyncEngineConfig>) {
        if self.state() != EngineState::Ready {
            warn!(state = %self.state(), "Sync loop not started: engine is not ready");
            return;
        }
        self.shutdown_tx.send_replace(false);
        let shutdown_rx = self.shutdown_tx.subscribe();
        self.set_state(EngineState::Running);

        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move { engine.run(config_rx, shutdown_rx).await });
        *self.run_handle.lock() = Some(handle);
        info!("Sync loop running");
    }

    async fn run(
        &self,
        mut config_rx: watch::Receiver<SyncEngineConfig>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let config = self.config();
        let mut sync_interval = interval(config.sync_interval());
        sync_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweep_interval = interval(config.dlq_sweep_interval());
        sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    debug!("Sync loop received shutdown");
                    break;
                }

                Ok(()) = config_rx.changed() => {
                    let new_config = config_rx.borrow_and_update().clone();
                    let old = self.config();
                    info!(
                        batch_size = new_config.batch_size,
                        concurrency = new_config.concurrency,
                        max_queue_size = new_config.max_queue_size,
                        "Config updated"
                    );
                    if new_config.sync_interval() != old.sync_interval() {
                        sync_interval = interval(new_config.sync_interval());
                        sync_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        sync_interval.reset();
                    }
                    if new_config.dlq_sweep_interval() != old.dlq_sweep_interval() {
                        sweep_interval = interval(new_config.dlq_sweep_interval());
                        sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        sweep_interval.reset();
                    }
                    self.apply_config(new_config);
                }

                _ = sync_interval.tick() => {
                    self.run_cycle(now_millis()).await;
                }

                _ = self.wake.notified() => {
                    self.run_cycle(now_millis()).await;
                    sync_interval.reset();
                }

                _ = sweep_interval.tick() => {
                    if let Err(e) = self.sweep_dead_letters(now_millis()).await {
                        warn!(error = %e, "Dead letter sweep failed");
                    }
                }
            }
        }
    }

    /// Initiate graceful shutdown.
    ///
    /// No new dispatches start; dispatches already in flight finish or hit
    /// their per-call timeout. Everything still queued stays durable for the
    /// next start.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        let shutdown_start = Instant::now();
        info!("Initiating sync engine shutdown...");
        self.set_state(EngineState::ShuttingDown);
        self.processor.halt();
        self.shutdown_tx.send_replace(true);

        let handle = self.run_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Sync loop task failed");
            }
        }

        self.set_state(EngineState::Stopped);
        crate::metrics::record_startup_phase("shutdown", shutdown_start.elapsed());
        info!(pending = self.queue.len(), "Sync engine shutdown complete");
    }
}
