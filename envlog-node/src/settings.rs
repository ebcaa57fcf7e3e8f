//! Node settings.
//!
//! Settings are loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML settings file (if specified via ENVLOG_CONFIG or --config)
//! 3. Environment variables

use envlog_core::{Field, FieldMask, LogConfig, LogOptions, OverflowPolicy};
use envlog_flash::file::IMAGE_FILENAME;
use envlog_flash::FlashGeometry;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Node settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Flash image and record sizing.
    pub storage: StorageSettings,
    /// Log configuration to apply at startup.
    pub log: LogSettings,
    /// Simulated sensor.
    pub sensor: SensorSettings,
    /// Tick runner.
    pub runner: RunnerSettings,
}

impl Settings {
    /// Loads settings from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        if let Ok(path) = std::env::var("ENVLOG_CONFIG") {
            settings = Self::from_file(&path)?;
        }

        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    /// Loads settings from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let settings: Settings = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(settings)
    }

    /// Loads settings from environment variables only.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        settings.apply_env_overrides();
        settings
    }

    /// Applies environment variable overrides to the settings.
    pub fn apply_env_overrides(&mut self) {
        self.storage.apply_env_overrides();
        self.log.apply_env_overrides();
        self.runner.apply_env_overrides();
    }

    /// Checks values the log would reject later with a less helpful error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.storage.validate()?;
        if let Some(config) = self.log.to_config() {
            config
                .validate()
                .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        }
        if self.runner.tick_ms == 0 {
            return Err(ConfigError::ValidationError(
                "runner.tick_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Saves settings to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Data directory holding the flash image and the stored log config.
    pub data_dir: PathBuf,
    /// Bytes per flash page.
    pub page_size: usize,
    /// Number of flash pages.
    pub page_count: u32,
    /// Samples per record (defaults to what a page holds).
    pub max_samples: Option<u16>,
    /// Commit a partial record once its first sample is this old.
    pub flush_after_secs: Option<u32>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            page_size: envlog_core::STORAGE_BLOCK_SIZE,
            page_count: 64,
            max_samples: None,
            flush_after_secs: Some(3600),
        }
    }
}

impl StorageSettings {
    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("ENVLOG_DATA") {
            self.data_dir = PathBuf::from(dir);
        }

        if let Ok(size) = std::env::var("ENVLOG_PAGE_SIZE") {
            if let Ok(n) = size.parse() {
                self.page_size = n;
            }
        }

        if let Ok(count) = std::env::var("ENVLOG_PAGE_COUNT") {
            if let Ok(n) = count.parse() {
                self.page_count = n;
            }
        }

        if let Ok(max) = std::env::var("ENVLOG_MAX_SAMPLES") {
            if let Ok(n) = max.parse() {
                self.max_samples = Some(n);
            }
        }

        if let Ok(secs) = std::env::var("ENVLOG_FLUSH_AFTER") {
            self.flush_after_secs = match secs.parse() {
                Ok(0) | Err(_) => None,
                Ok(n) => Some(n),
            };
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.page_count == 0 {
            return Err(ConfigError::ValidationError(
                "storage.page_count must be greater than zero".to_string(),
            ));
        }
        if envlog_core::max_samples_for_page(self.page_size) == 0 {
            return Err(ConfigError::ValidationError(format!(
                "storage.page_size {} cannot hold a record",
                self.page_size
            )));
        }
        if self.flush_after_secs == Some(0) {
            return Err(ConfigError::ValidationError(
                "storage.flush_after_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn geometry(&self) -> FlashGeometry {
        FlashGeometry::new(self.page_size, self.page_count)
    }

    /// Returns the flash image path.
    pub fn image_path(&self) -> PathBuf {
        self.data_dir.join(IMAGE_FILENAME)
    }

    pub fn log_options(&self) -> LogOptions {
        LogOptions {
            max_samples: self.max_samples,
            flush_after_s: self.flush_after_secs,
        }
    }
}

/// Log configuration overrides.
///
/// Unset values keep what the log has stored. When any value is set the
/// merged configuration is applied at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub fields: Option<Vec<Field>>,
    pub interval_secs: Option<u32>,
    pub overflow: Option<OverflowPolicy>,
}

impl LogSettings {
    fn apply_env_overrides(&mut self) {
        if let Ok(fields) = std::env::var("ENVLOG_FIELDS") {
            if let Some(parsed) = parse_fields(&fields) {
                self.fields = Some(parsed);
            }
        }

        if let Ok(interval) = std::env::var("ENVLOG_INTERVAL") {
            if let Ok(secs) = interval.parse() {
                self.interval_secs = Some(secs);
            }
        }

        if let Ok(policy) = std::env::var("ENVLOG_OVERFLOW") {
            self.overflow = match policy.to_lowercase().as_str() {
                "wrap" => Some(OverflowPolicy::Wrap),
                "stop" => Some(OverflowPolicy::Stop),
                _ => self.overflow,
            };
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Applies the overrides on top of `base`.
    pub fn merge(&self, base: LogConfig) -> LogConfig {
        let mut config = base;
        if let Some(fields) = &self.fields {
            config.fields = FieldMask::from(fields.clone());
        }
        if let Some(interval) = self.interval_secs {
            config.interval_s = interval;
        }
        if let Some(overflow) = self.overflow {
            config.overflow = overflow;
        }
        config
    }

    fn to_config(&self) -> Option<LogConfig> {
        (!self.is_empty()).then(|| self.merge(LogConfig::default()))
    }
}

/// Parses a comma-separated field list such as `temperature,humidity`.
pub fn parse_fields(value: &str) -> Option<Vec<Field>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|name| match name.to_lowercase().as_str() {
            "temperature" | "temp" => Some(Field::Temperature),
            "humidity" | "hum" => Some(Field::Humidity),
            "pressure" | "press" => Some(Field::Pressure),
            _ => None,
        })
        .collect()
}

/// Simulated sensor parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSettings {
    pub base_temperature_c: f32,
    pub temperature_swing_c: f32,
    pub base_humidity_rh: f32,
    pub humidity_swing_rh: f32,
    pub base_pressure_pa: f32,
    pub pressure_swing_pa: f32,
    /// Samples per simulated day.
    pub period_samples: u32,
    /// Fail every n-th read (0 = never).
    pub fail_every: u32,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            base_temperature_c: 21.0,
            temperature_swing_c: 4.0,
            base_humidity_rh: 45.0,
            humidity_swing_rh: 10.0,
            base_pressure_pa: 101_325.0,
            pressure_swing_pa: 300.0,
            period_samples: 288,
            fail_every: 0,
        }
    }
}

/// Tick runner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    /// Milliseconds between scheduler ticks.
    pub tick_ms: u64,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self { tick_ms: 1000 }
    }
}

impl RunnerSettings {
    fn apply_env_overrides(&mut self) {
        if let Ok(tick) = std::env::var("ENVLOG_TICK_MS") {
            if let Ok(ms) = tick.parse() {
                self.tick_ms = ms;
            }
        }
    }

    /// Returns the tick period as Duration.
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// Settings error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read settings file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse settings file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "settings validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
