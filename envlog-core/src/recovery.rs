//! Log recovery after restart.
//!
//! Every page is scanned and decoded. The committed window is the longest run
//! of valid records ending at the highest sequence number in which each older
//! record sits on the preceding page and carries the preceding sequence.
//! Valid records outside that run are reported as orphaned and left alone;
//! they are erased when the allocator reaches their page.

use crate::allocator::CommittedPage;
use crate::codec::decode_record;
use crate::error::LogError;
use crate::record::Record;
use envlog_flash::{PageId, PageStore};
use serde::Serialize;
use std::collections::HashMap;

/// Outcome of a recovery scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Number of pages read.
    pub pages_scanned: u32,
    /// Number of pages holding a valid record.
    pub valid_records: u32,
    /// Number of erased pages.
    pub erased_pages: u32,
    /// Pages whose record failed to decode.
    pub corrupt_pages: Vec<PageId>,
    /// Valid records left out of the window.
    pub orphaned_pages: Vec<PageId>,
    /// Recovered window, oldest first.
    pub window: Vec<CommittedPage>,
    /// Highest sequence number seen on any valid record.
    pub max_sequence: Option<u32>,
}

impl RecoveryReport {
    /// Sequence number for the next record written.
    pub fn next_sequence(&self) -> u32 {
        self.max_sequence.map_or(0, |s| s.wrapping_add(1))
    }

    /// Total samples held by the recovered window.
    pub fn samples(&self) -> u64 {
        self.window.iter().map(|p| p.num_samples as u64).sum()
    }
}

/// Reads and decodes the record on `page`.
pub(crate) fn load_page<F: PageStore + ?Sized>(
    flash: &mut F,
    page: PageId,
    max_samples: u16,
) -> Result<Option<Record>, LogError> {
    let mut buf = vec![0u8; flash.geometry().page_size];
    flash.read(page, &mut buf)?;
    decode_record(page, &buf, max_samples)
}

/// Rebuilds the committed window from flash contents.
pub struct RecoveryScanner {
    max_samples: u16,
}

impl RecoveryScanner {
    pub fn new(max_samples: u16) -> Self {
        Self { max_samples }
    }

    /// Scans every page of `flash`. Never writes.
    pub fn scan<F: PageStore + ?Sized>(&self, flash: &mut F) -> Result<RecoveryReport, LogError> {
        let page_count = flash.geometry().page_count;
        let mut report = RecoveryReport::default();
        let mut valid: HashMap<PageId, CommittedPage> = HashMap::new();

        for page in 0..page_count {
            report.pages_scanned += 1;
            match load_page(flash, page, self.max_samples) {
                Ok(Some(record)) => {
                    report.valid_records += 1;
                    report.max_sequence = Some(
                        report
                            .max_sequence
                            .map_or(record.sequence, |s| s.max(record.sequence)),
                    );
                    valid.insert(
                        page,
                        CommittedPage {
                            page,
                            sequence: record.sequence,
                            start_timestamp_s: record.start_timestamp_s,
                            end_timestamp_s: record.end_timestamp_s,
                            num_samples: record.num_samples(),
                        },
                    );
                }
                Ok(None) => report.erased_pages += 1,
                Err(LogError::CorruptRecord { page, reason }) => {
                    tracing::warn!("Corrupt record on page {} found during recovery: {}", page, reason);
                    report.corrupt_pages.push(page);
                }
                Err(e) => return Err(e),
            }
        }

        let newest = valid.values().max_by_key(|p| p.sequence).copied();
        if let Some(newest) = newest {
            let mut window = vec![newest];
            let mut current = newest;
            while window.len() < page_count as usize {
                let prev_page = (current.page + page_count - 1) % page_count;
                match valid.get(&prev_page) {
                    Some(prev) if prev.sequence == current.sequence.wrapping_sub(1) => {
                        window.push(*prev);
                        current = *prev;
                    }
                    _ => break,
                }
            }
            window.reverse();

            let mut orphaned: Vec<PageId> = valid
                .keys()
                .filter(|page| !window.iter().any(|w| w.page == **page))
                .copied()
                .collect();
            orphaned.sort_unstable();
            for page in &orphaned {
                tracing::debug!("Orphaned record on page {} outside recovered window", page);
            }
            if !orphaned.is_empty() {
                tracing::warn!("Ignoring {} orphaned records", orphaned.len());
            }

            report.orphaned_pages = orphaned;
            report.window = window;
        }

        tracing::info!(
            "Recovery scan complete: {} pages, {} records, {} corrupt, next sequence {}",
            report.pages_scanned,
            report.window.len(),
            report.corrupt_pages.len(),
            report.next_sequence()
        );

        Ok(report)
    }
}
