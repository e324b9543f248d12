//! Flush failure statistics.
//!
//! Thread-safe counters for persistence failures by kind, shared between
//! the flush executor and whoever reports at the end of a run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use strum::IntoEnumIterator;

use super::types::PersistErrorKind;

/// Per-kind counters for failed flush attempts.
///
/// Every kind is initialized to zero on creation, so `record` never has to
/// insert. Share across tasks with `Arc`.
pub struct FlushStats {
    failures: HashMap<PersistErrorKind, AtomicU64>,
    spilled_batches: AtomicU64,
    repaired_vehicles: AtomicU64,
}

impl FlushStats {
    /// Creates a stats block with every counter at zero.
    pub fn new() -> Self {
        let mut failures = HashMap::new();
        for kind in PersistErrorKind::iter() {
            failures.insert(kind, AtomicU64::new(0));
        }
        FlushStats {
            failures,
            spilled_batches: AtomicU64::new(0),
            repaired_vehicles: AtomicU64::new(0),
        }
    }

    /// Records one failed persistence attempt of the given kind.
    pub fn record_failure(&self, kind: PersistErrorKind) {
        if let Some(counter) = self.failures.get(&kind) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Records one batch handed to the spill writer.
    pub fn record_spill(&self) {
        self.spilled_batches.fetch_add(1, Ordering::SeqCst);
    }

    /// Records vehicles confirmed provisioned by a repair pass.
    pub fn record_repaired(&self, count: u64) {
        self.repaired_vehicles.fetch_add(count, Ordering::SeqCst);
    }

    /// Count of failed attempts for one kind.
    pub fn failure_count(&self, kind: PersistErrorKind) -> u64 {
        self.failures
            .get(&kind)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Total failed attempts across all kinds.
    pub fn total_failures(&self) -> u64 {
        self.failures
            .values()
            .map(|c| c.load(Ordering::SeqCst))
            .sum()
    }

    /// Batches spilled so far.
    pub fn spilled_batches(&self) -> u64 {
        self.spilled_batches.load(Ordering::SeqCst)
    }

    /// Vehicles provisioned by repair passes so far.
    pub fn repaired_vehicles(&self) -> u64 {
        self.repaired_vehicles.load(Ordering::SeqCst)
    }

    /// Logs a one-line-per-kind summary of nonzero counters.
    pub fn log_summary(&self) {
        if self.total_failures() == 0 {
            log::info!("No persistence failures during this run");
            return;
        }
        log::info!("Persistence failure summary:");
        for kind in PersistErrorKind::iter() {
            let count = self.failure_count(kind);
            if count > 0 {
                log::info!("  {}: {}", kind.as_str(), count);
            }
        }
        if self.repaired_vehicles() > 0 {
            log::info!("  vehicles provisioned by repair: {}", self.repaired_vehicles());
        }
        if self.spilled_batches() > 0 {
            log::warn!("  batches spilled: {}", self.spilled_batches());
        }
    }
}

impl Default for FlushStats {
    fn default() -> Self {
        Self::new()
    }
}
