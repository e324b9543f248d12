//! Error handling: failure taxonomy, classification, and statistics.

mod stats;
mod types;

pub use stats::FlushStats;
pub use types::{
    classify_store_error, DatabaseError, InitializationError, PersistError, PersistErrorKind,
    ProvisionError, SpillError,
};
