//! Error type definitions.
//!
//! This module defines the persistence-failure taxonomy the flush executor
//! routes on, plus spill and initialization errors.

use std::path::PathBuf;

use log::SetLoggerError;
use reqwest::Error as ReqwestError;
use strum_macros::EnumIter as EnumIterMacro;
use thiserror::Error;

/// A classified backing-store persistence failure.
///
/// Every failure of the bulk write is mapped into one of these variants.
/// `ForeignKeyViolation` is the only kind that triggers the dependency
/// repair sub-flow; all others go straight to the backoff/retry loop.
#[derive(Error, Debug)]
pub enum PersistError {
    /// The write did not complete within the configured timeout.
    #[error("store write timed out after {0}ms")]
    Timeout(u64),

    /// The store could not be reached (connection refused, pool closed,
    /// I/O failure).
    #[error("store unreachable: {0}")]
    NetworkUnavailable(String),

    /// The batch references a vehicle that does not exist in the store.
    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// Any other persistence failure.
    #[error("store write failed: {0}")]
    Unknown(String),
}

impl PersistError {
    /// The machine-readable kind of this failure, for stats and routing.
    pub fn kind(&self) -> PersistErrorKind {
        match self {
            PersistError::Timeout(_) => PersistErrorKind::Timeout,
            PersistError::NetworkUnavailable(_) => PersistErrorKind::NetworkUnavailable,
            PersistError::ForeignKeyViolation(_) => PersistErrorKind::ForeignKeyViolation,
            PersistError::Unknown(_) => PersistErrorKind::Unknown,
        }
    }
}

/// Machine-readable persistence failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIterMacro)]
pub enum PersistErrorKind {
    /// The write did not complete within the configured timeout.
    Timeout,
    /// The store could not be reached.
    NetworkUnavailable,
    /// The batch references a vehicle the store does not know.
    ForeignKeyViolation,
    /// Any other persistence failure.
    Unknown,
}

impl PersistErrorKind {
    /// Human-readable name for logs and summaries.
    pub fn as_str(&self) -> &'static str {
        match self {
            PersistErrorKind::Timeout => "store write timeout",
            PersistErrorKind::NetworkUnavailable => "store unreachable",
            PersistErrorKind::ForeignKeyViolation => "foreign key violation",
            PersistErrorKind::Unknown => "unknown persist error",
        }
    }
}

impl std::fmt::Display for PersistErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from writing a failed-batch archive.
///
/// This is the one truly severe condition in the subsystem: a batch that
/// can be neither persisted nor spilled is lost. Callers log it at maximum
/// severity and keep the queue running.
#[derive(Error, Debug)]
pub enum SpillError {
    /// The spill directory could not be created.
    #[error("failed to create spill directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The archive could not be serialized.
    #[error("failed to serialize failed-batch archive: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The archive file could not be written.
    #[error("failed to write spill artifact {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Errors from calling the vehicle provisioning endpoint.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// The HTTP request itself failed (timeout, connection, etc.).
    #[error("provisioning request failed: {0}")]
    Request(#[from] ReqwestError),

    /// The endpoint answered with a non-success status.
    #[error("provisioning endpoint returned {status}: {body}")]
    Endpoint { status: u16, body: String },
}

/// Error types for initialization failures.
#[derive(Error, Debug)]
pub enum InitializationError {
    /// Error initializing the logger.
    #[error("Logger initialization error: {0}")]
    LoggerError(#[from] SetLoggerError),

    /// Error initializing the provisioning HTTP client.
    #[error("HTTP client initialization error: {0}")]
    HttpClientError(#[from] ReqwestError),
}

/// Error types for database operations outside the flush path.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error creating the database file.
    #[error("Database file creation error: {0}")]
    FileCreationError(String),

    /// SQL execution error.
    #[error("SQL error: {0}")]
    SqlError(#[from] sqlx::Error),
}

/// Maps a raw sqlx error into the persistence-failure taxonomy.
///
/// SQLite reports foreign-key failures as constraint errors with the
/// message "FOREIGN KEY constraint failed" (extended result code 787);
/// Postgres uses SQLSTATE 23503. Both are recognized so the store
/// implementation can be swapped without touching the flush executor.
pub fn classify_store_error(error: sqlx::Error) -> PersistError {
    match error {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
            let message = db_err.message().to_string();
            if code == "787" || code == "23503" || message.to_lowercase().contains("foreign key") {
                PersistError::ForeignKeyViolation(message)
            } else {
                PersistError::Unknown(message)
            }
        }
        sqlx::Error::PoolTimedOut => {
            PersistError::NetworkUnavailable("connection pool timed out".to_string())
        }
        sqlx::Error::PoolClosed => {
            PersistError::NetworkUnavailable("connection pool closed".to_string())
        }
        sqlx::Error::Io(e) => PersistError::NetworkUnavailable(e.to_string()),
        other => PersistError::Unknown(other.to_string()),
    }
}
