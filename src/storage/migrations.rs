//! Schema migrations.

use sqlx::{Pool, Sqlite};

/// Applies the migrations under `migrations/` (the vehicles table and the
/// telemetry table with its foreign key). Safe to call on every startup;
/// already-applied migrations are skipped.
pub async fn run_migrations(pool: &Pool<Sqlite>) -> Result<(), anyhow::Error> {
    let migrations_dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
    let migrator = sqlx::migrate::Migrator::new(migrations_dir.as_path()).await?;
    migrator.run(pool).await?;
    Ok(())
}
