//! telemetry_queue library: batch-ingestion queue for vehicle telemetry
//!
//! This library buffers high-frequency telemetry records in memory and
//! persists them to SQLite in batches, so the store sees one bulk write
//! instead of one write per position update. Flushes trigger on batch size
//! or on a timer; failed writes are retried with exponential backoff,
//! foreign-key failures are repaired by provisioning the missing vehicles,
//! and a batch that exhausts its retries is spilled to a JSON archive
//! rather than dropped.
//!
//! # Example
//!
//! ```no_run
//! use telemetry_queue::{run_ingest, Config};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config {
//!     file: std::path::PathBuf::from("telemetry.ndjson"),
//!     batch_size: 100,
//!     ..Default::default()
//! };
//!
//! let report = run_ingest(config).await?;
//! println!(
//!     "Ingested {} records: {} persisted, {} spilled",
//!     report.ingested, report.persisted, report.spilled
//! );
//! # Ok(())
//! # }
//! ```
//!
//! # Requirements
//!
//! This library requires a Tokio runtime. Use `#[tokio::main]` in your
//! application or ensure you're calling library functions within an async
//! context.

#![warn(missing_docs)]

pub mod config;
mod error_handling;
mod models;
mod queue;
mod storage;

/// Initialization helpers (logger, provisioning client).
pub mod initialization;

// Re-export public API
pub use config::{Config, LogFormat, LogLevel, QueueConfig};
pub use error_handling::{
    classify_store_error, DatabaseError, FlushStats, InitializationError, PersistError,
    PersistErrorKind, ProvisionError, SpillError,
};
pub use models::{FailedBatchArchive, QueueStats, TelemetryRecord};
pub use queue::{
    DependencyRepairer, HttpProvisioner, SpillWriter, TelemetryBatchQueue, VehicleProvisioner,
};
pub use run::{run_ingest, IngestReport};
pub use storage::{init_db_pool_with_path, run_migrations, SqliteTelemetryStore, TelemetryStore};

// Internal run module (contains the ingestion driver)
mod run {
    use std::path::PathBuf;
    use std::sync::Arc;

    use anyhow::{Context, Result};
    use log::{info, warn};
    use tokio::io::{AsyncBufReadExt, BufReader};

    use crate::config::Config;
    use crate::initialization::init_provision_client;
    use crate::queue::{HttpProvisioner, TelemetryBatchQueue, VehicleProvisioner};
    use crate::storage::{init_db_pool_with_path, run_migrations, SqliteTelemetryStore};
    use crate::TelemetryRecord;

    /// Results of an ingestion run.
    ///
    /// Contains summary statistics about the completed run.
    #[derive(Debug, Clone)]
    pub struct IngestReport {
        /// Records accepted into the queue
        pub ingested: usize,
        /// Input lines rejected (malformed JSON or failed validation)
        pub rejected: usize,
        /// Records persisted to the database
        pub persisted: u64,
        /// Records spilled to failed-batch archives
        pub spilled: u64,
        /// Records still buffered when the shutdown grace expired
        pub still_buffered: usize,
        /// Path to the SQLite database containing results
        pub db_path: PathBuf,
        /// Elapsed time in seconds
        pub elapsed_seconds: f64,
    }

    /// Runs an ingestion pass with the provided configuration.
    ///
    /// Reads newline-delimited JSON telemetry records from the input file
    /// (or stdin when the file is `-`), feeds them through the batch
    /// queue, and drains the queue before returning. The queue is
    /// constructed here, once, and passed by handle; there is no global
    /// instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the input file cannot be opened or database
    /// initialization fails. Persistence failures during the run are *not*
    /// errors: they are retried, repaired, or spilled by the queue.
    pub async fn run_ingest(config: Config) -> Result<IngestReport> {
        let pool = init_db_pool_with_path(&config.db_path)
            .await
            .context("Failed to initialize database pool")?;
        run_migrations(&pool)
            .await
            .context("Failed to run database migrations")?;

        let store = Arc::new(SqliteTelemetryStore::new(Arc::clone(&pool)));
        let provisioner: Option<Arc<dyn VehicleProvisioner>> = match &config.provision_url {
            Some(url) => {
                info!("Vehicle provisioning endpoint: {url}");
                let client =
                    init_provision_client().context("Failed to initialize provisioning client")?;
                Some(Arc::new(HttpProvisioner::new(client, url.clone())))
            }
            None => {
                info!("No provisioning endpoint configured; repair will create stub vehicles");
                None
            }
        };

        let queue = TelemetryBatchQueue::new(store, provisioner, config.queue_config());

        let reader: Box<dyn tokio::io::AsyncBufRead + Unpin> =
            if config.file.as_os_str() == "-" {
                info!("Reading telemetry records from stdin");
                Box::new(BufReader::new(tokio::io::stdin()))
            } else {
                let file = tokio::fs::File::open(&config.file)
                    .await
                    .with_context(|| format!("Failed to open input file {:?}", config.file))?;
                Box::new(BufReader::new(file))
            };
        let mut lines = reader.lines();

        let start_time = std::time::Instant::now();
        let mut ingested = 0usize;
        let mut rejected = 0usize;

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!("Stopping input read after error: {e}");
                    break;
                }
            };

            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let record: TelemetryRecord = match serde_json::from_str(trimmed) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Rejected malformed record: {e}");
                    rejected += 1;
                    continue;
                }
            };
            if let Err(reason) = record.validate() {
                warn!("Rejected record: {reason}");
                rejected += 1;
                continue;
            }

            queue.add(record);
            ingested += 1;
        }

        info!("Input exhausted ({ingested} ingested, {rejected} rejected); draining queue");
        queue.shutdown().await;

        queue.flush_stats().log_summary();

        if let Err(e) = sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(pool.as_ref())
            .await
        {
            warn!("Failed to checkpoint WAL file (this is non-critical): {e}");
        }

        let still_buffered = queue.stats().queue_depth;
        Ok(IngestReport {
            ingested,
            rejected,
            persisted: queue.persisted_total(),
            spilled: queue.spilled_total(),
            still_buffered,
            db_path: config.db_path.clone(),
            elapsed_seconds: start_time.elapsed().as_secs_f64(),
        })
    }
}
