//! Node error types.

use crate::settings::ConfigError;
use envlog_core::LogError;
use envlog_flash::FlashError;
use thiserror::Error;

/// Node errors.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings error: {0}")]
    Config(#[from] ConfigError),

    #[error("log error: {0}")]
    Log(#[from] LogError),

    #[error("flash error: {0}")]
    Flash(#[from] FlashError),
}

impl NodeError {
    /// Returns a stable error code for status reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            NodeError::Io(_) => "IO_ERROR",
            NodeError::Config(_) => "SETTINGS_ERROR",
            NodeError::Log(e) => e.error_code(),
            NodeError::Flash(_) => "STORAGE_IO_ERROR",
        }
    }

    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            NodeError::Io(_) => true,
            NodeError::Config(_) => false,
            NodeError::Log(e) => e.is_retryable(),
            NodeError::Flash(e) => e.is_retryable(),
        }
    }
}
