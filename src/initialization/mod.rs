//! Initialization helpers for logging and external clients.

mod client;
mod logger;

pub use client::init_provision_client;
pub use logger::init_logger_with;
