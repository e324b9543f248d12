//! Durable spill fallback for batches that exhausted every retry.
//!
//! Spilled batches are not re-ingested by the running process; the JSON
//! artifacts under the spill directory exist for manual recovery.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

use crate::error_handling::SpillError;
use crate::models::{FailedBatchArchive, TelemetryRecord};

/// Writes [`FailedBatchArchive`] artifacts to a dedicated directory.
pub struct SpillWriter {
    dir: PathBuf,
    // Disambiguates artifacts spilled within the same millisecond.
    sequence: AtomicU64,
}

impl SpillWriter {
    /// Creates a writer targeting `dir`. The directory is created lazily
    /// on first spill.
    pub fn new(dir: PathBuf) -> Self {
        SpillWriter {
            dir,
            sequence: AtomicU64::new(0),
        }
    }

    /// Archives a batch with the given failure reason.
    ///
    /// Creates the spill directory if absent and writes a uniquely named
    /// JSON artifact. Returns the path of the written artifact.
    pub async fn spill(
        &self,
        reason: &str,
        records: Vec<TelemetryRecord>,
    ) -> Result<PathBuf, SpillError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| SpillError::CreateDir {
                path: self.dir.clone(),
                source,
            })?;

        let archive = FailedBatchArchive {
            timestamp: Utc::now(),
            reason: reason.to_string(),
            count: records.len(),
            records,
        };

        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let filename = format!(
            "failed-batch-{}-{:04}.json",
            archive.timestamp.format("%Y-%m-%dT%H-%M-%S%.3f"),
            seq
        );
        let path = self.dir.join(filename);

        let body = serde_json::to_vec_pretty(&archive)?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|source| SpillError::Write {
                path: path.clone(),
                source,
            })?;

        Ok(path)
    }
}
