//! The telemetry batch-ingestion queue.
//!
//! Producers hand records to [`TelemetryBatchQueue::add`] and return
//! immediately; a single worker task owns the flush lifecycle. Flushes are
//! triggered two ways: by size, when the buffer reaches the configured
//! batch size, and by time, on a periodic interval. Persistence failures
//! are retried with exponential backoff, foreign-key failures route
//! through dependency repair, and a batch that exhausts its budget is
//! spilled to disk instead of being dropped.

mod flush;
mod repair;
mod spill;

pub use repair::{DependencyRepairer, HttpProvisioner, VehicleProvisioner};
pub use spill::SpillWriter;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::QueueConfig;
use crate::error_handling::FlushStats;
use crate::models::{QueueStats, TelemetryRecord};
use crate::storage::TelemetryStore;

use flush::FlushExecutor;

/// State shared between producers and the flush worker. The buffer is the
/// only mutable state crossing that boundary; everything else is counters.
pub(crate) struct QueueShared {
    buffer: Mutex<Vec<TelemetryRecord>>,
    pub(crate) is_flushing: AtomicBool,
    pub(crate) persisted_total: AtomicU64,
    pub(crate) spilled_total: AtomicU64,
}

impl QueueShared {
    fn new() -> Self {
        QueueShared {
            buffer: Mutex::new(Vec::new()),
            is_flushing: AtomicBool::new(false),
            persisted_total: AtomicU64::new(0),
            spilled_total: AtomicU64::new(0),
        }
    }

    pub(crate) fn buffered_len(&self) -> usize {
        self.buffer.lock().expect("buffer mutex poisoned").len()
    }

    fn append(&self, record: TelemetryRecord) -> usize {
        let mut buffer = self.buffer.lock().expect("buffer mutex poisoned");
        buffer.push(record);
        buffer.len()
    }

    fn append_many(&self, records: Vec<TelemetryRecord>) -> usize {
        let mut buffer = self.buffer.lock().expect("buffer mutex poisoned");
        buffer.extend(records);
        buffer.len()
    }

    /// Detaches up to `cap` records from the front of the buffer, leaving
    /// any remainder for the next cycle. Producers appending concurrently
    /// only contend for the brief lock, never for the flush itself.
    pub(crate) fn detach_batch(&self, cap: usize) -> Vec<TelemetryRecord> {
        let mut buffer = self.buffer.lock().expect("buffer mutex poisoned");
        if buffer.len() <= cap {
            std::mem::take(&mut *buffer)
        } else {
            let rest = buffer.split_off(cap);
            std::mem::replace(&mut *buffer, rest)
        }
    }
}

/// Handle to the batch queue.
///
/// Construct one per process and pass it by reference to every ingestion
/// path; there is deliberately no global instance. Dropping the handle
/// cancels the worker; prefer calling [`shutdown`](Self::shutdown) first
/// so buffered records get a final flush.
pub struct TelemetryBatchQueue {
    shared: Arc<QueueShared>,
    stats: Arc<FlushStats>,
    config: QueueConfig,
    flush_tx: mpsc::UnboundedSender<()>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TelemetryBatchQueue {
    /// Starts the queue and its worker task. Must be called within a Tokio
    /// runtime.
    ///
    /// `provisioner` is the endpoint dependency repair uses for missing
    /// vehicles; pass `None` to repair with stub rows only.
    pub fn new(
        store: Arc<dyn TelemetryStore>,
        provisioner: Option<Arc<dyn VehicleProvisioner>>,
        config: QueueConfig,
    ) -> Self {
        let shared = Arc::new(QueueShared::new());
        let stats = Arc::new(FlushStats::new());
        let repairer = DependencyRepairer::new(
            Arc::clone(&store),
            provisioner,
            Duration::from_millis(config.provision_settle_ms),
        );
        let spill = SpillWriter::new(config.spill_dir.clone());
        let executor = FlushExecutor::new(
            Arc::clone(&shared),
            store,
            repairer,
            spill,
            Arc::clone(&stats),
            config.clone(),
        );

        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(run_worker(
            executor,
            flush_rx,
            cancel.child_token(),
            Duration::from_millis(config.flush_interval_ms),
        ));

        info!(
            "Telemetry batch queue started (batch size: {}, flush interval: {}ms)",
            config.batch_size, config.flush_interval_ms
        );

        TelemetryBatchQueue {
            shared,
            stats,
            config,
            flush_tx,
            cancel,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Appends one record to the buffer.
    ///
    /// Never fails and never blocks on the backing store; back-pressure is
    /// absorbed in memory. Reaching the batch-size threshold sends a
    /// fire-and-forget flush request to the worker.
    pub fn add(&self, record: TelemetryRecord) {
        let len = self.shared.append(record);
        debug!("Record queued ({}/{})", len, self.config.batch_size);
        if len >= self.config.batch_size {
            self.request_flush();
        }
    }

    /// Appends multiple records, evaluating the size threshold once, so a
    /// single call admitting a full batch triggers one flush request.
    pub fn add_batch(&self, records: Vec<TelemetryRecord>) {
        if records.is_empty() {
            return;
        }
        let added = records.len();
        let len = self.shared.append_many(records);
        debug!("{} record(s) queued ({}/{})", added, len, self.config.batch_size);
        if len >= self.config.batch_size {
            self.request_flush();
        }
    }

    fn request_flush(&self) {
        if self.flush_tx.send(()).is_ok() {
            debug!("Batch size threshold reached, requesting flush");
        } else {
            warn!("Flush worker is gone; request dropped");
        }
    }

    /// Read-only snapshot for observability.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            queue_depth: self.shared.buffered_len(),
            is_flushing: self.shared.is_flushing.load(Ordering::SeqCst),
            batch_size: self.config.batch_size,
            flush_interval_ms: self.config.flush_interval_ms,
        }
    }

    /// Records persisted to the backing store so far.
    pub fn persisted_total(&self) -> u64 {
        self.shared.persisted_total.load(Ordering::SeqCst)
    }

    /// Records handed to the spill writer so far.
    pub fn spilled_total(&self) -> u64 {
        self.shared.spilled_total.load(Ordering::SeqCst)
    }

    /// Failure counters shared with the flush executor.
    pub fn flush_stats(&self) -> Arc<FlushStats> {
        Arc::clone(&self.stats)
    }

    /// Best-effort drain: stops the timer and flushes whatever remains,
    /// bounded by the configured shutdown grace. Intended to be invoked by
    /// the hosting application's own lifecycle code; the queue never
    /// installs process signal handlers itself.
    pub async fn shutdown(&self) {
        info!(
            "Shutting down queue: {} record(s) still buffered",
            self.shared.buffered_len()
        );
        self.cancel.cancel();

        let handle = self
            .worker
            .lock()
            .expect("worker handle mutex poisoned")
            .take();
        if let Some(handle) = handle {
            let grace = Duration::from_millis(self.config.shutdown_grace_ms);
            match tokio::time::timeout(grace, handle).await {
                Ok(Ok(())) => info!("Queue drained"),
                Ok(Err(e)) => warn!("Queue worker panicked during drain: {e}"),
                Err(_) => warn!(
                    "Shutdown grace of {:?} elapsed before the drain finished; {} record(s) may remain buffered",
                    grace,
                    self.shared.buffered_len()
                ),
            }
        }
    }
}

impl Drop for TelemetryBatchQueue {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Single owner of the flush lifecycle: serializes size-triggered
/// requests, interval ticks, and the shutdown drain, which is what makes
/// "at most one flush in flight" hold process-wide.
async fn run_worker(
    executor: FlushExecutor,
    mut flush_rx: mpsc::UnboundedReceiver<()>,
    cancel: CancellationToken,
    flush_interval: Duration,
) {
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick of a tokio interval fires immediately; consume it so
    // the timer means "every interval from now".
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            request = flush_rx.recv() => match request {
                Some(()) => executor.flush_pending().await,
                None => break,
            },
            _ = ticker.tick() => {
                if !executor.buffer_is_empty() {
                    debug!("Interval flush");
                    executor.flush_pending().await;
                }
            }
        }
    }

    // Best-effort final drain. Flushing stops once the buffer is below
    // the threshold, so loop until it is empty; every cycle terminates in
    // persisted or spilled, so this cannot spin.
    while !executor.buffer_is_empty() {
        executor.flush_pending().await;
    }
}
