//! # envlog-flash
//!
//! Page-addressed non-volatile storage for envlog.
//!
//! This crate provides:
//! - The [`PageStore`] trait, modelled on NOR flash (erase to `0xFF`, program
//!   only erased bytes)
//! - A file-backed flash image for hosts
//! - An in-memory device with fault injection for tests

pub mod error;
pub mod file;
pub mod mem;

pub use error::FlashError;
pub use file::FileFlash;
pub use mem::MemFlash;

use serde::{Deserialize, Serialize};

/// Page index within a flash device.
pub type PageId = u32;

/// Value of every byte in an erased page.
pub const ERASED_BYTE: u8 = 0xFF;

/// Default page size (4 KiB).
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Shape of a flash device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashGeometry {
    /// Bytes per page.
    pub page_size: usize,
    /// Number of pages.
    pub page_count: u32,
}

impl FlashGeometry {
    pub fn new(page_size: usize, page_count: u32) -> Self {
        Self {
            page_size,
            page_count,
        }
    }

    /// Total device size in bytes.
    pub fn total_size(&self) -> u64 {
        self.page_size as u64 * self.page_count as u64
    }

    /// Byte offset of the start of `page`.
    pub fn page_offset(&self, page: PageId) -> u64 {
        page as u64 * self.page_size as u64
    }

    /// Checks that `page` exists and `len` bytes fit in one page.
    pub fn check(&self, page: PageId, len: usize) -> Result<(), FlashError> {
        if page >= self.page_count {
            return Err(FlashError::PageOutOfRange {
                page,
                page_count: self.page_count,
            });
        }
        if len > self.page_size {
            return Err(FlashError::DataTooLarge {
                len,
                page_size: self.page_size,
            });
        }
        Ok(())
    }
}

/// A page-addressed block device.
///
/// Pages must be erased before they are programmed. Reads and programs always
/// start at the beginning of the page; bytes past the programmed length keep
/// their erased value.
pub trait PageStore: Send {
    /// Returns the device geometry.
    fn geometry(&self) -> FlashGeometry;

    /// Reads the first `buf.len()` bytes of `page`.
    fn read(&mut self, page: PageId, buf: &mut [u8]) -> Result<(), FlashError>;

    /// Erases `page` back to [`ERASED_BYTE`].
    fn erase(&mut self, page: PageId) -> Result<(), FlashError>;

    /// Programs `data` at the start of `page`.
    fn program(&mut self, page: PageId, data: &[u8]) -> Result<(), FlashError>;

    /// Flushes buffered writes to the medium.
    fn sync(&mut self) -> Result<(), FlashError>;
}
