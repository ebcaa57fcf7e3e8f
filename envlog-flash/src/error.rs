//! Flash error types.

use crate::PageId;
use thiserror::Error;

/// Errors that can occur during flash operations.
#[derive(Debug, Error)]
pub enum FlashError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("page {page} out of range (device has {page_count} pages)")]
    PageOutOfRange { page: PageId, page_count: u32 },

    #[error("write of {len} bytes exceeds page size {page_size}")]
    DataTooLarge { len: usize, page_size: usize },

    #[error("page {page} not erased at offset {offset}")]
    NotErased { page: PageId, offset: usize },

    #[error("flash image size {actual} does not match geometry ({expected} bytes)")]
    GeometryMismatch { expected: u64, actual: u64 },

    #[error("injected fault: {0}")]
    Injected(&'static str),
}

impl FlashError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FlashError::Io(_) | FlashError::Injected(_))
    }
}
