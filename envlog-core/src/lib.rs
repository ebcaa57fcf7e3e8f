//! # envlog-core
//!
//! Circular sensor log stored in fixed-size flash pages.
//!
//! This crate provides:
//! - Self-describing records that carry a snapshot of the log configuration
//! - A page allocator with WRAP/STOP overflow policies
//! - A resumable read cursor that survives page recycling
//! - Recovery of the log window after restart

pub mod allocator;
pub mod codec;
pub mod config;
pub mod config_store;
pub mod cursor;
pub mod element;
pub mod error;
pub mod log;
pub mod record;
pub mod recovery;
pub mod sensor;

pub use allocator::{Allocation, CommittedPage, PageAllocator, WindowSnapshot};
pub use config::{Field, FieldMask, LogConfig, OverflowPolicy};
pub use config_store::{ConfigStore, FileConfigStore, MemoryConfigStore};
pub use cursor::{CursorState, Gap, ReadOutcome, ReadState};
pub use element::Element;
pub use error::LogError;
pub use log::{AppLog, CommitInfo, LogInfo, LogOptions, LogStats, ProcessStatus};
pub use record::{AppendOutcome, Record, RecordBuilder};
pub use recovery::{RecoveryReport, RecoveryScanner};
pub use sensor::{Reading, Sensor, SensorError};

/// Default flash page size in bytes.
pub const STORAGE_BLOCK_SIZE: usize = envlog_flash::DEFAULT_PAGE_SIZE;

/// Bytes of record header at the start of every page.
pub const STORAGE_RECORD_HEADER_SIZE: usize = 32;

/// Encoded size of an element with every field present.
pub const ELEMENT_MAX_SIZE: usize = 16;

/// Maximum samples per record with the default page size.
pub const APP_LOG_MAX_SAMPLES: usize =
    (STORAGE_BLOCK_SIZE - STORAGE_RECORD_HEADER_SIZE) / ELEMENT_MAX_SIZE;

/// Largest sample count a page of `page_size` bytes can hold.
pub const fn max_samples_for_page(page_size: usize) -> usize {
    if page_size <= STORAGE_RECORD_HEADER_SIZE {
        return 0;
    }
    (page_size - STORAGE_RECORD_HEADER_SIZE) / ELEMENT_MAX_SIZE
}
