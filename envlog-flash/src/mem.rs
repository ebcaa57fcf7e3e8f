//! In-memory flash device.
//!
//! Handles are cheap clones sharing the same storage, so a test can keep one
//! handle to inject faults or inspect wear while the log owns another.

use crate::error::FlashError;
use crate::{FlashGeometry, PageId, PageStore, ERASED_BYTE};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Faults {
    /// Number of upcoming program calls that fail.
    programs: u32,
    /// Number of upcoming erase calls that fail.
    erases: u32,
    /// Number of upcoming read calls that fail.
    reads: u32,
}

#[derive(Debug)]
struct Inner {
    data: Vec<u8>,
    erase_counts: Vec<u32>,
    faults: Faults,
}

/// RAM-backed flash with NOR semantics.
#[derive(Debug, Clone)]
pub struct MemFlash {
    geometry: FlashGeometry,
    inner: Arc<Mutex<Inner>>,
}

impl MemFlash {
    /// Creates a fully erased device.
    pub fn new(geometry: FlashGeometry) -> Self {
        Self {
            geometry,
            inner: Arc::new(Mutex::new(Inner {
                data: vec![ERASED_BYTE; geometry.total_size() as usize],
                erase_counts: vec![0; geometry.page_count as usize],
                faults: Faults::default(),
            })),
        }
    }

    /// Makes the next `n` program calls fail.
    pub fn fail_next_programs(&self, n: u32) {
        self.inner.lock().faults.programs = n;
    }

    /// Makes the next `n` erase calls fail.
    pub fn fail_next_erases(&self, n: u32) {
        self.inner.lock().faults.erases = n;
    }

    /// Makes the next `n` read calls fail.
    pub fn fail_next_reads(&self, n: u32) {
        self.inner.lock().faults.reads = n;
    }

    /// Flips every bit of the byte at `offset` within `page`.
    pub fn corrupt(&self, page: PageId, offset: usize) {
        let start = self.geometry.page_offset(page) as usize;
        self.inner.lock().data[start + offset] ^= 0xFF;
    }

    /// Returns a copy of the raw contents of `page`.
    pub fn page_bytes(&self, page: PageId) -> Vec<u8> {
        let start = self.geometry.page_offset(page) as usize;
        self.inner.lock().data[start..start + self.geometry.page_size].to_vec()
    }

    /// Returns how many times each page has been erased.
    pub fn erase_counts(&self) -> Vec<u32> {
        self.inner.lock().erase_counts.clone()
    }
}

impl PageStore for MemFlash {
    fn geometry(&self) -> FlashGeometry {
        self.geometry
    }

    fn read(&mut self, page: PageId, buf: &mut [u8]) -> Result<(), FlashError> {
        self.geometry.check(page, buf.len())?;
        let mut inner = self.inner.lock();
        if inner.faults.reads > 0 {
            inner.faults.reads -= 1;
            return Err(FlashError::Injected("read"));
        }

        let start = self.geometry.page_offset(page) as usize;
        buf.copy_from_slice(&inner.data[start..start + buf.len()]);
        Ok(())
    }

    fn erase(&mut self, page: PageId) -> Result<(), FlashError> {
        self.geometry.check(page, 0)?;
        let mut inner = self.inner.lock();
        if inner.faults.erases > 0 {
            inner.faults.erases -= 1;
            return Err(FlashError::Injected("erase"));
        }

        let start = self.geometry.page_offset(page) as usize;
        inner.data[start..start + self.geometry.page_size].fill(ERASED_BYTE);
        inner.erase_counts[page as usize] += 1;
        Ok(())
    }

    fn program(&mut self, page: PageId, data: &[u8]) -> Result<(), FlashError> {
        self.geometry.check(page, data.len())?;
        let mut inner = self.inner.lock();
        if inner.faults.programs > 0 {
            inner.faults.programs -= 1;
            return Err(FlashError::Injected("program"));
        }

        let start = self.geometry.page_offset(page) as usize;
        let region = &mut inner.data[start..start + data.len()];
        if let Some(offset) = region.iter().position(|&b| b != ERASED_BYTE) {
            return Err(FlashError::NotErased { page, offset });
        }
        region.copy_from_slice(data);
        Ok(())
    }

    fn sync(&mut self) -> Result<(), FlashError> {
        Ok(())
    }
}
