//! Circular page allocation.
//!
//! Committed records form a window of circularly contiguous pages, ordered
//! oldest to newest. New records go to the page after the newest one. When the
//! device is full, WRAP reclaims the oldest page and STOP refuses to allocate.

use crate::config::OverflowPolicy;
use crate::error::LogError;
use envlog_flash::PageId;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Summary of a committed record kept in the allocator window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedPage {
    pub page: PageId,
    pub sequence: u32,
    pub start_timestamp_s: u32,
    pub end_timestamp_s: u32,
    pub num_samples: u16,
}

/// A page handed out for the next record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub page: PageId,
    /// Sequence to stamp into the record.
    pub sequence: u32,
    /// The oldest record, to be dropped from the window once its page is
    /// erased.
    pub reclaimed: Option<CommittedPage>,
}

/// Point-in-time copy of the window, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub pages: Vec<CommittedPage>,
}

impl WindowSnapshot {
    /// Position of `page` in the window, if it is committed.
    pub fn position_of(&self, page: PageId) -> Option<usize> {
        self.pages.iter().position(|p| p.page == page)
    }

    pub fn oldest(&self) -> Option<&CommittedPage> {
        self.pages.first()
    }

    pub fn newest(&self) -> Option<&CommittedPage> {
        self.pages.last()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }
}

/// Tracks which pages hold committed records and where the next one goes.
#[derive(Debug)]
pub struct PageAllocator {
    page_count: u32,
    window: VecDeque<CommittedPage>,
    head: PageId,
    next_sequence: u32,
}

impl PageAllocator {
    pub fn new(page_count: u32) -> Self {
        Self {
            page_count,
            window: VecDeque::with_capacity(page_count as usize),
            head: 0,
            next_sequence: 0,
        }
    }

    /// Rebuilds the allocator from a recovered window, oldest first.
    pub fn restore(&mut self, pages: Vec<CommittedPage>, next_sequence: u32) {
        self.head = pages
            .last()
            .map_or(0, |newest| (newest.page + 1) % self.page_count);
        self.window = pages.into();
        self.next_sequence = next_sequence;
    }

    /// Picks the page for the next record.
    ///
    /// Under WRAP a full window names its oldest page as reclaimed but keeps
    /// it; the caller calls [`pop_oldest`](Self::pop_oldest) after erasing
    /// it. Under STOP a full window is an error.
    pub fn next_write_page(&self, policy: OverflowPolicy) -> Result<Allocation, LogError> {
        let mut reclaimed = None;
        if self.is_full() {
            match policy {
                OverflowPolicy::Stop => return Err(LogError::StorageFull),
                OverflowPolicy::Wrap => reclaimed = self.window.front().copied(),
            }
        }

        Ok(Allocation {
            page: self.head,
            sequence: self.next_sequence,
            reclaimed,
        })
    }

    /// Records that `page` now holds a valid record.
    pub fn commit(&mut self, page: CommittedPage) {
        self.head = (page.page + 1) % self.page_count;
        self.next_sequence = page.sequence.wrapping_add(1);
        self.window.push_back(page);
    }

    /// Removes and returns the oldest committed page.
    pub fn pop_oldest(&mut self) -> Option<CommittedPage> {
        self.window.pop_front()
    }

    /// Forgets every committed page. Sequence numbering continues.
    pub fn purge(&mut self) {
        self.window.clear();
        self.head = 0;
    }

    pub fn oldest_page(&self) -> Option<&CommittedPage> {
        self.window.front()
    }

    pub fn newest_page(&self) -> Option<&CommittedPage> {
        self.window.back()
    }

    pub fn head(&self) -> PageId {
        self.head
    }

    pub fn next_sequence(&self) -> u32 {
        self.next_sequence
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.window.len() >= self.page_count as usize
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            pages: self.window.iter().copied().collect(),
        }
    }

    /// Checks that consecutive window entries occupy consecutive pages and
    /// carry consecutive sequences.
    pub fn is_contiguous(&self) -> bool {
        self.window
            .iter()
            .zip(self.window.iter().skip(1))
            .all(|(a, b)| {
                b.page == (a.page + 1) % self.page_count
                    && b.sequence == a.sequence.wrapping_add(1)
            })
    }
}
