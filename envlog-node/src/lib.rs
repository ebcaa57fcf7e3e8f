//! # envlog-node
//!
//! Runtime pieces for an envlog node.
//!
//! This crate provides:
//! - Layered settings (defaults, YAML file, environment)
//! - A deterministic simulated sensor
//! - The periodic tick runner driving the log
//! - Helpers to open the file-backed log described by the settings

pub mod error;
pub mod runner;
pub mod settings;
pub mod sim;

pub use error::NodeError;
pub use runner::{system_clock, Clock, Runner, RunnerStats};
pub use settings::{
    ConfigError, LogSettings, RunnerSettings, SensorSettings, Settings, StorageSettings,
};
pub use sim::SimulatedSensor;

use envlog_core::{AppLog, FileConfigStore, RecoveryReport};
use envlog_flash::FileFlash;

/// Opens the flash image and stored log configuration under
/// `storage.data_dir`, creating them on first use.
pub fn open_log(storage: &StorageSettings) -> Result<AppLog<FileFlash>, NodeError> {
    std::fs::create_dir_all(&storage.data_dir)?;
    let flash = FileFlash::open_or_create(storage.image_path(), storage.geometry())?;
    let store = FileConfigStore::in_dir(&storage.data_dir);
    Ok(AppLog::open(flash, store, storage.log_options())?)
}

/// Opens and initializes the log, then applies any configured overrides.
pub fn start_log(settings: &Settings) -> Result<(AppLog<FileFlash>, RecoveryReport), NodeError> {
    let log = open_log(&settings.storage)?;
    let report = log.init()?;

    if !settings.log.is_empty() {
        let current = log.config_get();
        let wanted = settings.log.merge(current);
        if wanted != current {
            tracing::info!(
                "Applying log settings: fields={}, interval={}s, overflow={}",
                wanted.fields,
                wanted.interval_s,
                wanted.overflow
            );
            log.config_set(wanted)?;
        }
    }

    Ok((log, report))
}
