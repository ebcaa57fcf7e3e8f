//! Log error types.

use crate::sensor::SensorError;
use envlog_flash::{FlashError, PageId};
use thiserror::Error;

/// Errors from the log core.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("invalid log geometry: {reason}")]
    InvalidGeometry { reason: String },

    #[error("storage full: overflow policy is STOP")]
    StorageFull,

    #[error("storage I/O error: {0}")]
    StorageIo(#[from] FlashError),

    #[error("corrupt record on page {page}: {reason}")]
    CorruptRecord { page: PageId, reason: String },

    #[error("no open record")]
    NoOpenRecord,

    #[error("a record is already open")]
    AlreadyOpen,

    #[error("a write is already in progress")]
    Busy,

    #[error("sensor error: {0}")]
    Sensor(#[from] SensorError),

    #[error("config store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config store JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LogError {
    /// Returns whether the operation can be retried on a later tick.
    pub fn is_retryable(&self) -> bool {
        match self {
            LogError::StorageIo(e) => e.is_retryable(),
            LogError::Busy | LogError::Sensor(_) | LogError::Io(_) => true,
            _ => false,
        }
    }

    /// Returns a stable error code for status reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            LogError::InvalidConfig { .. } => "INVALID_CONFIG",
            LogError::InvalidGeometry { .. } => "INVALID_GEOMETRY",
            LogError::StorageFull => "STORAGE_FULL",
            LogError::StorageIo(_) => "STORAGE_IO_ERROR",
            LogError::CorruptRecord { .. } => "CORRUPT_RECORD",
            LogError::NoOpenRecord => "NO_OPEN_RECORD",
            LogError::AlreadyOpen => "ALREADY_OPEN",
            LogError::Busy => "BUSY",
            LogError::Sensor(_) => "SENSOR_ERROR",
            LogError::Io(_) | LogError::Json(_) => "CONFIG_STORE_ERROR",
        }
    }

    pub(crate) fn corrupt(page: PageId, reason: impl Into<String>) -> Self {
        LogError::CorruptRecord {
            page,
            reason: reason.into(),
        }
    }
}
