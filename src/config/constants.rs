//! Configuration constants.
//!
//! This module defines the default operational parameters for the batch
//! queue: flush thresholds, retry policy, timeouts, and file locations.

/// Records buffered before a size-triggered flush is requested.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Interval between time-triggered flush attempts in milliseconds.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 5_000;

/// Maximum budgeted persistence attempts per batch (including the first).
/// A successful dependency repair can grant one additional attempt on top
/// of this budget; see the flush executor.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay in milliseconds for exponential backoff between attempts.
/// Attempt n waits `base * 2^(n-1)` before the next try (2s, 4s, ...).
pub const DEFAULT_BASE_RETRY_DELAY_MS: u64 = 2_000;

/// Per-call timeout for the backing-store bulk write in milliseconds.
/// A write that does not complete within this window is classified as a
/// timeout failure and retried like any other transient error.
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 15_000;

/// Directory where exhausted batches are archived for manual recovery.
pub const DEFAULT_SPILL_DIR: &str = "./failed-batches";

/// Settle delay in milliseconds after provisioning a missing vehicle,
/// before re-checking existence. Tolerates eventual consistency in the
/// provisioning path.
pub const DEFAULT_PROVISION_SETTLE_MS: u64 = 1_500;

/// Upper bound in milliseconds on the shutdown drain. The final flush uses
/// the normal retry path but must not hang process termination.
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 30_000;

/// Timeout in seconds for calls to the vehicle provisioning endpoint.
pub const PROVISION_TIMEOUT_SECS: u64 = 30;

/// Default SQLite database path.
pub const DB_PATH: &str = "./telemetry.db";
