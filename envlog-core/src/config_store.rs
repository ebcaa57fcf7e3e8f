//! Persistent storage for the live log configuration.

use crate::config::LogConfig;
use crate::error::LogError;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default file name for the stored configuration.
pub const CONFIG_FILENAME: &str = "log_config.json";

/// Load/store collaborator for [`LogConfig`].
pub trait ConfigStore: Send {
    /// Returns the stored configuration, or `None` if nothing was stored yet.
    fn load(&mut self) -> Result<Option<LogConfig>, LogError>;

    /// Replaces the stored configuration.
    fn store(&mut self, config: &LogConfig) -> Result<(), LogError>;
}

/// Stores the configuration as a JSON file.
///
/// Writes go to a temporary file that is synced and renamed over the old one,
/// so a crash leaves either the old or the new configuration.
#[derive(Debug)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at [`CONFIG_FILENAME`] inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(CONFIG_FILENAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&mut self) -> Result<Option<LogConfig>, LogError> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let config: LogConfig = serde_json::from_slice(&data)?;
        config.validate()?;
        Ok(Some(config))
    }

    fn store(&mut self, config: &LogConfig) -> Result<(), LogError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(config)?;
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// In-memory store. Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigStore {
    slot: Arc<Mutex<Option<LogConfig>>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `config`.
    pub fn with_config(config: LogConfig) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(config))),
        }
    }

    /// Returns the stored configuration without going through the trait.
    pub fn get(&self) -> Option<LogConfig> {
        *self.slot.lock()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&mut self) -> Result<Option<LogConfig>, LogError> {
        Ok(*self.slot.lock())
    }

    fn store(&mut self, config: &LogConfig) -> Result<(), LogError> {
        *self.slot.lock() = Some(*config);
        Ok(())
    }
}
