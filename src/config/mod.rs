//! Application configuration and constants.
//!
//! This module provides:
//! - Configuration constants (thresholds, timeouts, defaults)
//! - Queue and CLI configuration types

mod constants;
mod types;

// Re-export all constants
pub use constants::*;
pub use types::{Config, LogFormat, LogLevel, QueueConfig};
