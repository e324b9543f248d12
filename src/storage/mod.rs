// storage/mod.rs
// Database operations module

pub mod migrations;
pub mod pool;
pub mod store;

// Re-export commonly used items
pub use migrations::run_migrations;
pub use pool::init_db_pool_with_path;
pub use store::{SqliteTelemetryStore, TelemetryStore};
