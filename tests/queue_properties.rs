//! Behavioral tests for the batch queue against a scripted in-memory store.
//!
//! These cover the flush triggers, retry/backoff schedule, dependency
//! repair with its bonus retry, spill fallback, and the shutdown drain,
//! without touching SQLite.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Semaphore;

use telemetry_queue::{
    FailedBatchArchive, PersistError, PersistErrorKind, ProvisionError, QueueConfig,
    TelemetryBatchQueue, TelemetryRecord, TelemetryStore, VehicleProvisioner,
};

fn record(vehicle_id: &str) -> TelemetryRecord {
    TelemetryRecord::new(vehicle_id, Utc::now(), -34.9, -56.16)
}

fn records(vehicle_id: &str, n: usize) -> Vec<TelemetryRecord> {
    (0..n).map(|_| record(vehicle_id)).collect()
}

/// Store whose insert outcomes are scripted up front. Once the script is
/// exhausted every insert succeeds.
struct MockStore {
    script: Mutex<VecDeque<PersistError>>,
    persisted: Mutex<Vec<Vec<TelemetryRecord>>>,
    attempt_times: Mutex<Vec<Instant>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    insert_delay: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
    vehicles: Mutex<HashSet<String>>,
}

impl MockStore {
    fn new() -> Self {
        MockStore {
            script: Mutex::new(VecDeque::new()),
            persisted: Mutex::new(Vec::new()),
            attempt_times: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            insert_delay: None,
            gate: None,
            vehicles: Mutex::new(HashSet::new()),
        }
    }

    fn scripted(failures: Vec<PersistError>) -> Self {
        let store = Self::new();
        *store.script.lock().unwrap() = failures.into();
        store
    }

    fn with_gate(gate: Arc<Semaphore>) -> Self {
        let mut store = Self::new();
        store.gate = Some(gate);
        store
    }

    fn add_vehicle(&self, id: &str) {
        self.vehicles.lock().unwrap().insert(id.to_string());
    }

    fn attempt_count(&self) -> usize {
        self.attempt_times.lock().unwrap().len()
    }

    fn persisted_batches(&self) -> Vec<Vec<TelemetryRecord>> {
        self.persisted.lock().unwrap().clone()
    }

    fn persisted_records(&self) -> usize {
        self.persisted.lock().unwrap().iter().map(Vec::len).sum()
    }
}

#[async_trait]
impl TelemetryStore for MockStore {
    async fn insert_batch(&self, batch: &[TelemetryRecord]) -> Result<(), PersistError> {
        let depth = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(depth, Ordering::SeqCst);
        self.attempt_times.lock().unwrap().push(Instant::now());

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if let Some(delay) = self.insert_delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = self.script.lock().unwrap().pop_front();
        let result = match outcome {
            Some(err) => Err(err),
            None => {
                self.persisted.lock().unwrap().push(batch.to_vec());
                Ok(())
            }
        };
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn existing_vehicles(
        &self,
        ids: &HashSet<String>,
    ) -> Result<HashSet<String>, PersistError> {
        let vehicles = self.vehicles.lock().unwrap();
        Ok(ids.intersection(&vehicles).cloned().collect())
    }

    async fn upsert_vehicle_stub(&self, vehicle_id: &str) -> Result<(), PersistError> {
        self.vehicles.lock().unwrap().insert(vehicle_id.to_string());
        Ok(())
    }
}

/// Provisioner that creates the vehicle in the shared mock store.
struct MockProvisioner {
    store: Arc<MockStore>,
    provisioned: Mutex<Vec<String>>,
    fail: bool,
}

#[async_trait]
impl VehicleProvisioner for MockProvisioner {
    async fn provision(&self, vehicle_id: &str) -> Result<(), ProvisionError> {
        if self.fail {
            return Err(ProvisionError::Endpoint {
                status: 500,
                body: "boom".to_string(),
            });
        }
        self.provisioned.lock().unwrap().push(vehicle_id.to_string());
        self.store.add_vehicle(vehicle_id);
        Ok(())
    }
}

fn fast_config(spill_dir: std::path::PathBuf) -> QueueConfig {
    QueueConfig {
        batch_size: 100,
        flush_interval_ms: 60_000,
        max_retries: 3,
        base_retry_delay_ms: 50,
        store_timeout_ms: 1_000,
        spill_dir,
        provision_settle_ms: 0,
        shutdown_grace_ms: 10_000,
    }
}

#[tokio::test]
async fn test_size_trigger_flushes_one_batch_and_keeps_remainder() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = Arc::new(MockStore::new());
    let queue = TelemetryBatchQueue::new(store.clone(), None, fast_config(tmp.path().join("spill")));

    queue.add_batch(records("994", 150));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let batches = store.persisted_batches();
    assert_eq!(batches.len(), 1, "exactly one size-triggered flush");
    assert_eq!(batches[0].len(), 100, "flush is capped at batch_size");
    assert_eq!(queue.stats().queue_depth, 50, "remainder stays buffered");
    assert_eq!(queue.persisted_total(), 100);

    // The shutdown drain picks up the remainder.
    queue.shutdown().await;
    assert_eq!(store.persisted_records(), 150);
    assert_eq!(queue.persisted_total(), 150);
    assert_eq!(queue.stats().queue_depth, 0);
}

#[tokio::test]
async fn test_oversized_add_batch_drains_without_waiting_for_timer() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = Arc::new(MockStore::new());
    // Interval far in the future: everything below must happen from the
    // single size-triggered flush request.
    let queue = TelemetryBatchQueue::new(store.clone(), None, fast_config(tmp.path().join("spill")));

    queue.add_batch(records("994", 250));
    tokio::time::sleep(Duration::from_millis(300)).await;

    // The buffer stays over threshold after the first capped detach, so
    // flushing continues until only the sub-threshold remainder is left.
    let batches = store.persisted_batches();
    assert_eq!(batches.len(), 2);
    assert!(batches.iter().all(|b| b.len() == 100));
    assert_eq!(queue.persisted_total(), 200);
    assert_eq!(queue.stats().queue_depth, 50);

    queue.shutdown().await;
    assert_eq!(store.persisted_records(), 250);
}

#[tokio::test]
async fn test_interval_trigger_flushes_partial_batch() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = Arc::new(MockStore::new());
    let config = QueueConfig {
        flush_interval_ms: 100,
        ..fast_config(tmp.path().join("spill"))
    };
    let queue = TelemetryBatchQueue::new(store.clone(), None, config);

    queue.add_batch(records("994", 10));
    assert_eq!(store.attempt_count(), 0, "below threshold, nothing flushes yet");

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(store.persisted_records(), 10);
    assert_eq!(queue.stats().queue_depth, 0);
    queue.shutdown().await;
}

#[tokio::test]
async fn test_retry_backoff_schedule_then_spill() {
    let tmp = tempfile::TempDir::new().unwrap();
    let spill_dir = tmp.path().join("spill");
    let store = Arc::new(MockStore::scripted(vec![
        PersistError::NetworkUnavailable("pool closed".into()),
        PersistError::NetworkUnavailable("pool closed".into()),
        PersistError::NetworkUnavailable("pool closed".into()),
    ]));
    let config = QueueConfig {
        batch_size: 5,
        ..fast_config(spill_dir.clone())
    };
    let queue = TelemetryBatchQueue::new(store.clone(), None, config);

    queue.add_batch(records("994", 5));
    queue.shutdown().await;

    // Three budgeted attempts, spaced by base delay then doubled.
    let times = store.attempt_times.lock().unwrap().clone();
    assert_eq!(times.len(), 3);
    assert!(times[1] - times[0] >= Duration::from_millis(45));
    assert!(times[2] - times[1] >= Duration::from_millis(90));

    // The batch landed in exactly one archive, not the store.
    assert_eq!(store.persisted_records(), 0);
    assert_eq!(queue.spilled_total(), 5);
    let entries: Vec<_> = std::fs::read_dir(&spill_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(entries.len(), 1);
    let archive: FailedBatchArchive =
        serde_json::from_slice(&std::fs::read(&entries[0]).unwrap()).unwrap();
    assert_eq!(archive.count, 5);
    assert_eq!(archive.records.len(), 5);
    assert!(archive.reason.contains("failed after 3 attempt(s)"));

    let stats = queue.flush_stats();
    assert_eq!(stats.failure_count(PersistErrorKind::NetworkUnavailable), 3);
    assert_eq!(stats.spilled_batches(), 1);
}

#[tokio::test]
async fn test_foreign_key_repair_earns_immediate_bonus_retry() {
    let tmp = tempfile::TempDir::new().unwrap();
    let spill_dir = tmp.path().join("spill");
    let store = Arc::new(MockStore::scripted(vec![PersistError::ForeignKeyViolation(
        "fk_telemetry_vehicle".into(),
    )]));
    let config = QueueConfig {
        batch_size: 3,
        base_retry_delay_ms: 2_000,
        ..fast_config(spill_dir.clone())
    };
    let queue = TelemetryBatchQueue::new(store.clone(), None, config);

    let started = Instant::now();
    queue.add_batch(records("ghost-1", 3));
    queue.shutdown().await;

    // Stub provisioning (no endpoint configured) repaired the vehicle and
    // the bonus attempt persisted the batch without waiting out a backoff.
    assert_eq!(store.attempt_count(), 2);
    assert_eq!(store.persisted_records(), 3);
    assert!(store.vehicles.lock().unwrap().contains("ghost-1"));
    assert!(
        started.elapsed() < Duration::from_millis(1_500),
        "bonus retry must not consume a backoff delay"
    );
    assert!(!spill_dir.exists(), "nothing was spilled");
    assert_eq!(queue.flush_stats().repaired_vehicles(), 1);
}

#[tokio::test]
async fn test_repair_bonus_attempt_is_not_charged_against_budget() {
    let tmp = tempfile::TempDir::new().unwrap();
    let spill_dir = tmp.path().join("spill");
    // Three scripted foreign-key failures exhaust the budget exactly; the
    // repair after the first failure earns one extra attempt on top, so
    // the fourth attempt runs and succeeds. An implementation charging
    // the bonus to the budget would spill instead.
    let store = Arc::new(MockStore::scripted(vec![
        PersistError::ForeignKeyViolation("fk_telemetry_vehicle".into()),
        PersistError::ForeignKeyViolation("fk_telemetry_vehicle".into()),
        PersistError::ForeignKeyViolation("fk_telemetry_vehicle".into()),
    ]));
    let config = QueueConfig {
        batch_size: 5,
        max_retries: 3,
        ..fast_config(spill_dir.clone())
    };
    let queue = TelemetryBatchQueue::new(store.clone(), None, config);

    queue.add_batch(records("ghost-4", 5));
    queue.shutdown().await;

    assert_eq!(store.attempt_count(), 4, "3 budgeted attempts plus the bonus");
    assert_eq!(store.persisted_records(), 5);
    assert_eq!(queue.spilled_total(), 0);
    assert!(!spill_dir.exists());
}

#[tokio::test]
async fn test_huge_retry_budget_does_not_break_backoff() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = Arc::new(MockStore::scripted(
        (0..70)
            .map(|_| PersistError::NetworkUnavailable("pool closed".into()))
            .collect(),
    ));
    // More budgeted attempts than the backoff doubling has bits; the
    // multiplier must saturate instead of overflowing the shift.
    let config = QueueConfig {
        batch_size: 1,
        max_retries: 70,
        base_retry_delay_ms: 0,
        ..fast_config(tmp.path().join("spill"))
    };
    let queue = TelemetryBatchQueue::new(store.clone(), None, config);

    queue.add(record("994"));
    queue.shutdown().await;

    assert_eq!(store.attempt_count(), 70);
    assert_eq!(queue.spilled_total(), 1);
}

#[tokio::test]
async fn test_repair_uses_provisioning_endpoint_when_configured() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = Arc::new(MockStore::scripted(vec![PersistError::ForeignKeyViolation(
        "fk_telemetry_vehicle".into(),
    )]));
    let provisioner = Arc::new(MockProvisioner {
        store: store.clone(),
        provisioned: Mutex::new(Vec::new()),
        fail: false,
    });
    let config = QueueConfig {
        batch_size: 2,
        ..fast_config(tmp.path().join("spill"))
    };
    let queue = TelemetryBatchQueue::new(store.clone(), Some(provisioner.clone()), config);

    queue.add_batch(records("ghost-2", 2));
    queue.shutdown().await;

    assert_eq!(*provisioner.provisioned.lock().unwrap(), vec!["ghost-2"]);
    assert_eq!(store.persisted_records(), 2);
}

#[tokio::test]
async fn test_failed_endpoint_falls_back_to_stub_rows() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = Arc::new(MockStore::scripted(vec![PersistError::ForeignKeyViolation(
        "fk_telemetry_vehicle".into(),
    )]));
    let provisioner = Arc::new(MockProvisioner {
        store: store.clone(),
        provisioned: Mutex::new(Vec::new()),
        fail: true,
    });
    let config = QueueConfig {
        batch_size: 2,
        ..fast_config(tmp.path().join("spill"))
    };
    let queue = TelemetryBatchQueue::new(store.clone(), Some(provisioner), config);

    queue.add_batch(records("ghost-3", 2));
    queue.shutdown().await;

    // The endpoint 500s; repair still succeeds through the stub path.
    assert!(store.vehicles.lock().unwrap().contains("ghost-3"));
    assert_eq!(store.persisted_records(), 2);
    assert_eq!(queue.spilled_total(), 0);
}

#[tokio::test]
async fn test_foreign_key_without_repairable_vehicles_spills() {
    let tmp = tempfile::TempDir::new().unwrap();
    let spill_dir = tmp.path().join("spill");
    // Every referenced vehicle already exists, so repair has nothing to
    // provision and no bonus attempt is granted.
    let store = Arc::new(MockStore::scripted(vec![
        PersistError::ForeignKeyViolation("fk_telemetry_vehicle".into()),
        PersistError::ForeignKeyViolation("fk_telemetry_vehicle".into()),
        PersistError::ForeignKeyViolation("fk_telemetry_vehicle".into()),
    ]));
    store.add_vehicle("994");
    let config = QueueConfig {
        batch_size: 4,
        ..fast_config(spill_dir.clone())
    };
    let queue = TelemetryBatchQueue::new(store.clone(), None, config);

    queue.add_batch(records("994", 4));
    queue.shutdown().await;

    assert_eq!(store.attempt_count(), 3, "budget only, no bonus attempt");
    assert_eq!(queue.spilled_total(), 4);
    assert!(spill_dir.exists());
}

#[tokio::test]
async fn test_slow_store_times_out() {
    let tmp = tempfile::TempDir::new().unwrap();
    let spill_dir = tmp.path().join("spill");
    let mut store = MockStore::new();
    store.insert_delay = Some(Duration::from_millis(200));
    let store = Arc::new(store);
    let config = QueueConfig {
        batch_size: 1,
        max_retries: 1,
        store_timeout_ms: 20,
        ..fast_config(spill_dir.clone())
    };
    let queue = TelemetryBatchQueue::new(store.clone(), None, config);

    queue.add(record("994"));
    queue.shutdown().await;

    assert_eq!(
        queue.flush_stats().failure_count(PersistErrorKind::Timeout),
        1
    );
    assert_eq!(queue.spilled_total(), 1);
    let entries: Vec<_> = std::fs::read_dir(&spill_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    let archive: FailedBatchArchive =
        serde_json::from_slice(&std::fs::read(&entries[0]).unwrap()).unwrap();
    assert!(archive.reason.contains("timed out"));
}

#[tokio::test]
async fn test_producers_never_block_while_flush_is_held() {
    let tmp = tempfile::TempDir::new().unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let store = Arc::new(MockStore::with_gate(gate.clone()));
    let config = QueueConfig {
        batch_size: 10,
        ..fast_config(tmp.path().join("spill"))
    };
    let queue = TelemetryBatchQueue::new(store.clone(), None, config);

    queue.add_batch(records("994", 10));
    // Wait for the flush to start and park on the gate.
    while store.active.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(queue.stats().is_flushing);

    // Producers keep appending while the flush is stuck.
    let producer_started = Instant::now();
    for _ in 0..50 {
        queue.add(record("994"));
    }
    assert!(
        producer_started.elapsed() < Duration::from_millis(100),
        "add() must not wait on the in-flight flush"
    );
    assert_eq!(queue.stats().queue_depth, 50);

    // Release the store and let everything drain.
    gate.add_permits(1_000);
    queue.shutdown().await;

    assert_eq!(store.persisted_records(), 60, "no record lost or duplicated");
    assert_eq!(queue.persisted_total(), 60);
    assert_eq!(
        store.max_active.load(Ordering::SeqCst),
        1,
        "at most one flush in flight at any time"
    );
}

#[tokio::test]
async fn test_empty_buffer_flush_is_a_no_op() {
    let tmp = tempfile::TempDir::new().unwrap();
    let spill_dir = tmp.path().join("spill");
    let store = Arc::new(MockStore::new());
    let config = QueueConfig {
        flush_interval_ms: 50,
        ..fast_config(spill_dir.clone())
    };
    let queue = TelemetryBatchQueue::new(store.clone(), None, config);

    // Several interval ticks pass with nothing buffered.
    tokio::time::sleep(Duration::from_millis(250)).await;
    queue.shutdown().await;

    assert_eq!(store.attempt_count(), 0, "no store call for an empty buffer");
    assert!(!spill_dir.exists());
    assert_eq!(queue.persisted_total(), 0);
    assert_eq!(queue.spilled_total(), 0);
}
