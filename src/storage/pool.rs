//! Database connection pool management.
//!
//! This module initializes and configures the SQLite connection pool with:
//! - WAL mode enabled for concurrent access
//! - Foreign-key enforcement on every pooled connection (SQLite leaves it
//!   off by default, which would silently disable the repair path)
//! - Automatic database file creation

use std::str::FromStr;
use std::sync::Arc;

use log::{error, info};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::{Pool, Sqlite, SqlitePool};

use crate::error_handling::DatabaseError;

/// Initializes and returns a database connection pool.
///
/// Creates the database file if it doesn't exist, enables WAL mode for
/// better concurrent access, and turns foreign-key enforcement on for
/// every connection the pool hands out.
pub async fn init_db_pool_with_path(
    db_path: &std::path::Path,
) -> Result<Arc<Pool<Sqlite>>, DatabaseError> {
    let db_path_str = db_path.to_string_lossy();

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path_str))
        .map_err(|e| {
            error!("Invalid database path {db_path_str}: {e}");
            DatabaseError::FileCreationError(e.to_string())
        })?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = SqlitePool::connect_with(options).await.map_err(|e| {
        error!("Failed to connect to database: {e}");
        DatabaseError::SqlError(e)
    })?;

    info!("Database pool ready at {db_path_str} (WAL, foreign keys on)");
    Ok(Arc::new(pool))
}
