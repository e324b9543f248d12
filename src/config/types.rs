//! Configuration types and CLI options.
//!
//! This module defines enums and structs used for command-line argument
//! parsing and for configuring the batch queue programmatically.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::constants::*;

/// Logging level for the application.
///
/// Controls the verbosity of log output, from most restrictive (Error) to
/// most verbose (Trace).
#[derive(Clone, Debug, ValueEnum)]
pub enum LogLevel {
    /// Only error messages
    Error,
    /// Error and warning messages
    Warn,
    /// Error, warning, and informational messages
    Info,
    /// All messages except trace
    Debug,
    /// All messages including trace
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(l: LogLevel) -> Self {
        match l {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Log output format.
///
/// Controls how log messages are formatted:
/// - `Plain`: Human-readable format with colors (default)
/// - `Json`: Structured JSON format for machine parsing
#[derive(Clone, Debug, ValueEnum)]
pub enum LogFormat {
    /// Human-readable format with colors (default)
    Plain,
    /// Structured JSON format for machine parsing
    Json,
}

/// Configuration for the batch queue itself (no CLI dependencies).
///
/// Every knob the flush, repair, and spill paths recognize. Construct with
/// `QueueConfig::default()` and override fields as needed:
///
/// ```
/// use telemetry_queue::QueueConfig;
///
/// let config = QueueConfig {
///     batch_size: 50,
///     flush_interval_ms: 1_000,
///     ..Default::default()
/// };
/// assert_eq!(config.max_retries, 3);
/// ```
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Flush-on-size threshold (records).
    pub batch_size: usize,

    /// Flush-on-time threshold (milliseconds).
    pub flush_interval_ms: u64,

    /// Budgeted persistence attempts per batch before spilling.
    pub max_retries: u32,

    /// Exponential-backoff base delay (milliseconds).
    pub base_retry_delay_ms: u64,

    /// Per-call backing-store write timeout (milliseconds).
    pub store_timeout_ms: u64,

    /// Directory for failed-batch archives.
    pub spill_dir: PathBuf,

    /// Delay before re-checking vehicle existence after provisioning
    /// (milliseconds).
    pub provision_settle_ms: u64,

    /// Upper bound on the shutdown drain (milliseconds).
    pub shutdown_grace_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            base_retry_delay_ms: DEFAULT_BASE_RETRY_DELAY_MS,
            store_timeout_ms: DEFAULT_STORE_TIMEOUT_MS,
            spill_dir: PathBuf::from(DEFAULT_SPILL_DIR),
            provision_settle_ms: DEFAULT_PROVISION_SETTLE_MS,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
        }
    }
}

/// Application configuration (CLI surface).
///
/// Parsed from command-line arguments by the binary; can also be
/// constructed programmatically for library usage.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "telemetry_queue",
    about = "Ingests newline-delimited JSON telemetry records and persists them in batches with retry, dependency repair, and spill fallback."
)]
pub struct Config {
    /// Input file of newline-delimited JSON telemetry records ("-" reads stdin)
    pub file: PathBuf,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Log format
    #[arg(long, value_enum, default_value = "plain")]
    pub log_format: LogFormat,

    /// Database path (SQLite file)
    #[arg(long, default_value = DB_PATH)]
    pub db_path: PathBuf,

    /// Flush-on-size threshold
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Flush-on-time threshold in milliseconds
    #[arg(long, default_value_t = DEFAULT_FLUSH_INTERVAL_MS)]
    pub flush_interval_ms: u64,

    /// Budgeted persistence attempts per batch before spilling
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,

    /// Exponential-backoff base delay in milliseconds
    #[arg(long, default_value_t = DEFAULT_BASE_RETRY_DELAY_MS)]
    pub base_retry_delay_ms: u64,

    /// Backing-store write timeout in milliseconds
    #[arg(long, default_value_t = DEFAULT_STORE_TIMEOUT_MS)]
    pub store_timeout_ms: u64,

    /// Directory for failed-batch archives
    #[arg(long, default_value = DEFAULT_SPILL_DIR)]
    pub spill_dir: PathBuf,

    /// Vehicle provisioning endpoint URL. When unset, dependency repair
    /// falls back to creating stub vehicle rows directly in the store.
    #[arg(long)]
    pub provision_url: Option<String>,

    /// Settle delay after provisioning before re-checking existence, in
    /// milliseconds
    #[arg(long, default_value_t = DEFAULT_PROVISION_SETTLE_MS)]
    pub provision_settle_ms: u64,

    /// Upper bound on the shutdown drain in milliseconds
    #[arg(long, default_value_t = DEFAULT_SHUTDOWN_GRACE_MS)]
    pub shutdown_grace_ms: u64,
}

impl Config {
    /// Extracts the queue-facing subset of this configuration.
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            batch_size: self.batch_size,
            flush_interval_ms: self.flush_interval_ms,
            max_retries: self.max_retries,
            base_retry_delay_ms: self.base_retry_delay_ms,
            store_timeout_ms: self.store_timeout_ms,
            spill_dir: self.spill_dir.clone(),
            provision_settle_ms: self.provision_settle_ms,
            shutdown_grace_ms: self.shutdown_grace_ms,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            file: PathBuf::from("telemetry.ndjson"),
            log_level: LogLevel::Info,
            log_format: LogFormat::Plain,
            db_path: PathBuf::from(DB_PATH),
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            base_retry_delay_ms: DEFAULT_BASE_RETRY_DELAY_MS,
            store_timeout_ms: DEFAULT_STORE_TIMEOUT_MS,
            spill_dir: PathBuf::from(DEFAULT_SPILL_DIR),
            provision_url: None,
            provision_settle_ms: DEFAULT_PROVISION_SETTLE_MS,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
        }
    }
}
