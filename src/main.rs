//! envlog - environmental data logger
//!
//! Samples a sensor on a fixed interval and keeps the readings in a circular
//! log of flash pages until Ctrl+C.

use clap::Parser;
use envlog_node::{start_log, Runner, Settings, SimulatedSensor};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "envlog")]
#[command(about = "Environmental data logger")]
#[command(version)]
struct Args {
    /// YAML settings file
    #[arg(short, long, env = "ENVLOG_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory (overrides settings)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Load settings (from file if given, then env overrides)
    let mut settings = match &args.config {
        Some(path) => match Settings::from_file(path) {
            Ok(s) => {
                tracing::info!("Loaded settings from {}", path.display());
                s
            }
            Err(e) => {
                // An explicitly specified file must load
                tracing::error!("Failed to load settings: {}", e);
                return Err(e.into());
            }
        },
        None => {
            tracing::info!("Using default settings");
            Settings::default()
        }
    };
    settings.apply_env_overrides();
    if let Some(dir) = args.data_dir {
        settings.storage.data_dir = dir;
    }
    if let Err(e) = settings.validate() {
        tracing::error!("Invalid settings: {}", e);
        return Err(e.into());
    }

    tracing::info!("Starting envlog");
    tracing::info!("  Data directory: {}", settings.storage.data_dir.display());
    tracing::info!(
        "  Flash: {} pages of {} bytes",
        settings.storage.page_count,
        settings.storage.page_size
    );

    let (log, report) = start_log(&settings)?;
    let log = Arc::new(log);
    let config = log.config_get();

    tracing::info!(
        "  Recovered {} records ({} samples)",
        report.window.len(),
        report.samples()
    );
    if !report.corrupt_pages.is_empty() {
        tracing::warn!("  Corrupt pages: {:?}", report.corrupt_pages);
    }
    tracing::info!(
        "  Logging {} every {}s (overflow: {})",
        config.fields,
        config.interval_s,
        config.overflow
    );

    let sensor = SimulatedSensor::new(settings.sensor.clone());
    let runner = Arc::new(Runner::new(
        log.clone(),
        Box::new(sensor),
        settings.runner.clone(),
    ));

    // Spawn shutdown signal handler
    let shutdown_runner = runner.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping...");
        shutdown_runner.shutdown();
    });

    // Run the tick loop (blocks until shutdown, flushes on exit)
    runner.run().await;

    let stats = log.stats();
    tracing::info!(
        "Stopped after {} samples ({} dropped), {} records written, {} pages reclaimed",
        stats.samples_logged,
        stats.samples_dropped,
        stats.records_written,
        stats.pages_reclaimed
    );
    Ok(())
}
