//! Flush executor: the retry/backoff state machine.
//!
//! One cycle detaches a batch from the live buffer and drives it to a
//! terminal outcome: persisted, or spilled after the retry budget is
//! exhausted. A foreign-key failure routes through the dependency
//! repairer, which can earn the batch a single unbudgeted bonus attempt.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::error_handling::{FlushStats, PersistError, PersistErrorKind};
use crate::models::TelemetryRecord;
use crate::storage::TelemetryStore;

use super::repair::DependencyRepairer;
use super::spill::SpillWriter;
use super::QueueShared;

pub(crate) struct FlushExecutor {
    shared: Arc<QueueShared>,
    store: Arc<dyn TelemetryStore>,
    repairer: DependencyRepairer,
    spill: SpillWriter,
    stats: Arc<FlushStats>,
    config: QueueConfig,
}

impl FlushExecutor {
    pub(crate) fn new(
        shared: Arc<QueueShared>,
        store: Arc<dyn TelemetryStore>,
        repairer: DependencyRepairer,
        spill: SpillWriter,
        stats: Arc<FlushStats>,
        config: QueueConfig,
    ) -> Self {
        FlushExecutor {
            shared,
            store,
            repairer,
            spill,
            stats,
            config,
        }
    }

    pub(crate) fn buffer_is_empty(&self) -> bool {
        self.shared.buffered_len() == 0
    }

    /// Flushes until the buffer drops below the size threshold, one
    /// capped batch per cycle. A single oversized append must not wait
    /// on the timer for anything past the first batch, so the loop keeps
    /// detaching while a full batch remains. Returns immediately when a
    /// flush is already in flight or the buffer is empty, with no store
    /// call and no log artifact.
    pub(crate) async fn flush_pending(&self) {
        if self.shared.is_flushing.swap(true, Ordering::SeqCst) {
            return;
        }
        loop {
            let batch = self.shared.detach_batch(self.config.batch_size);
            if batch.is_empty() {
                break;
            }
            self.run_cycle(batch).await;
            if self.shared.buffered_len() < self.config.batch_size {
                break;
            }
        }
        self.shared.is_flushing.store(false, Ordering::SeqCst);
    }

    async fn run_cycle(&self, batch: Vec<TelemetryRecord>) {
        debug!("Flushing batch of {} record(s)", batch.len());
        let store_timeout = Duration::from_millis(self.config.store_timeout_ms);

        // The bonus attempt earned by a successful repair is tracked
        // separately from the budgeted counter; granting it by decrementing
        // the counter would conflate two different meanings.
        let mut budgeted_attempts: u32 = 0;
        let mut bonus_available = true;
        let mut is_bonus_attempt = false;
        let mut attempt_no: u32 = 0;

        loop {
            if !is_bonus_attempt {
                budgeted_attempts += 1;
            }
            attempt_no += 1;

            let started = Instant::now();
            let outcome =
                match tokio::time::timeout(store_timeout, self.store.insert_batch(&batch)).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(PersistError::Timeout(self.config.store_timeout_ms)),
                };
            let elapsed_ms = started.elapsed().as_millis();

            let err = match outcome {
                Ok(()) => {
                    self.shared
                        .persisted_total
                        .fetch_add(batch.len() as u64, Ordering::SeqCst);
                    info!(
                        "Batch persisted: {} record(s) in {}ms (attempt {})",
                        batch.len(),
                        elapsed_ms,
                        attempt_no
                    );
                    return;
                }
                Err(e) => e,
            };

            self.stats.record_failure(err.kind());
            warn!(
                "Flush attempt {} ({}/{} budgeted) failed after {}ms: {}",
                attempt_no, budgeted_attempts, self.config.max_retries, elapsed_ms, err
            );

            is_bonus_attempt = false;

            if err.kind() == PersistErrorKind::ForeignKeyViolation && bonus_available {
                let repaired = self.repairer.repair(&batch).await;
                if !repaired.is_empty() {
                    self.stats.record_repaired(repaired.len() as u64);
                    bonus_available = false;
                    is_bonus_attempt = true;
                    info!(
                        "Dependency repair provisioned {} vehicle(s); retrying immediately",
                        repaired.len()
                    );
                    continue;
                }
            }

            if budgeted_attempts >= self.config.max_retries {
                let reason = format!("failed after {} attempt(s): {}", attempt_no, err);
                self.spill_batch(batch, &reason).await;
                return;
            }

            let multiplier = 2u64.saturating_pow(budgeted_attempts - 1);
            let delay =
                Duration::from_millis(self.config.base_retry_delay_ms.saturating_mul(multiplier));
            debug!("Waiting {:?} before retry", delay);
            tokio::time::sleep(delay).await;
        }
    }

    async fn spill_batch(&self, batch: Vec<TelemetryRecord>, reason: &str) {
        let count = batch.len();
        self.stats.record_spill();
        match self.spill.spill(reason, batch).await {
            Ok(path) => {
                self.shared
                    .spilled_total
                    .fetch_add(count as u64, Ordering::SeqCst);
                warn!(
                    "Spilled {} record(s) to {} for manual recovery",
                    count,
                    path.display()
                );
            }
            Err(e) => {
                // The one unrecoverable outcome in this subsystem: the
                // batch is gone. The queue itself keeps running so
                // subsequent batches can still be processed.
                error!("DATA LOSS: failed to spill {} record(s): {}", count, e);
            }
        }
    }
}
