//! Main application entry point (CLI binary).
//!
//! This is a thin wrapper around the `telemetry_queue` library that handles:
//! - Command-line argument parsing
//! - Logger initialization
//! - User-facing output formatting
//!
//! All core functionality is implemented in the library crate.

use anyhow::{Context, Result};
use clap::Parser;
use std::process;

use telemetry_queue::initialization::init_logger_with;
use telemetry_queue::{run_ingest, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments into Config
    let config = Config::parse();

    // Initialize logger based on config
    let log_level = config.log_level.clone();
    let log_format = config.log_format.clone();
    init_logger_with(log_level.into(), log_format).context("Failed to initialize logger")?;

    match run_ingest(config).await {
        Ok(report) => {
            println!(
                "✅ Ingested {} record{} ({} persisted, {} spilled, {} rejected) in {:.1}s",
                report.ingested,
                if report.ingested == 1 { "" } else { "s" },
                report.persisted,
                report.spilled,
                report.rejected,
                report.elapsed_seconds
            );
            if report.still_buffered > 0 {
                eprintln!(
                    "⚠️ {} record(s) were still buffered when the drain timed out",
                    report.still_buffered
                );
            }
            println!("Results saved in {}", report.db_path.display());
            Ok(())
        }
        Err(e) => {
            eprintln!("telemetry_queue error: {:#}", e);
            process::exit(1);
        }
    }
}
