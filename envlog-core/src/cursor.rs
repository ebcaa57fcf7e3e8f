//! Resumable read cursor.
//!
//! A cursor is a caller-owned position: a page, an element within that page's
//! record, the capture time of the next element it expects to read and the
//! sequence of the record holding that element. The timestamp lets a cursor
//! detect that its page was reclaimed while it was saved, in which case
//! reading resumes at the oldest surviving page. The skipped range is reported
//! as a [`Gap`] unless the oldest surviving record is the one the cursor was
//! waiting for.
//!
//! Timestamps are stored in seconds everywhere else; the cursor boundary uses
//! milliseconds.

use crate::allocator::{CommittedPage, WindowSnapshot};
use crate::element::Element;
use crate::error::LogError;
use crate::record::Record;
use envlog_flash::PageId;
use serde::{Deserialize, Serialize};

/// Caller-owned read position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReadState {
    /// Page currently being read.
    pub page_idx: PageId,
    /// Next unread element within that page's record.
    pub element_idx: u16,
    /// Capture time of the next element to read, in milliseconds.
    pub oldest_element_ms: u64,
    /// Sequence of the record holding the next element. At the end of the log
    /// this is one past the newest record.
    #[serde(default)]
    pub sequence: u32,
}

impl ReadState {
    /// A cursor that starts at the oldest committed element.
    pub fn new() -> Self {
        Self::default()
    }

    fn is_fresh(&self) -> bool {
        *self == Self::default()
    }
}

/// Where a cursor stands after a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorState {
    /// The log holds no committed records.
    Empty,
    /// More committed elements are available.
    Positioned,
    /// Every committed element has been delivered.
    EndOfLog,
}

/// Data lost between a stale cursor and the oldest surviving page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    /// Where the stale cursor expected to continue.
    pub stale_from_ms: u64,
    /// Start of the oldest surviving page, where reading resumed.
    pub resumed_at_ms: u64,
}

/// Result of one read call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadOutcome {
    pub elements: Vec<Element>,
    pub cursor: ReadState,
    pub state: CursorState,
    pub gap: Option<Gap>,
    /// Pages skipped because their record failed to decode.
    pub corrupt_pages: Vec<PageId>,
}

impl ReadOutcome {
    fn empty() -> Self {
        Self {
            elements: Vec::new(),
            cursor: ReadState::default(),
            state: CursorState::Empty,
            gap: None,
            corrupt_pages: Vec::new(),
        }
    }
}

/// Loads committed records for the cursor.
pub trait RecordSource {
    /// Decodes the record on `page`; `Ok(None)` if the page is erased.
    fn load(&mut self, page: PageId) -> Result<Option<Record>, LogError>;
}

fn start_ms(page: &CommittedPage) -> u64 {
    page.start_timestamp_s as u64 * 1000
}

/// Finds the window position and element index `cursor` still refers to.
///
/// Returns `None` when the cursor is fresh or stale.
fn locate(snapshot: &WindowSnapshot, cursor: &ReadState) -> Option<(usize, u16)> {
    let oldest = snapshot.oldest()?;
    if cursor.oldest_element_ms < start_ms(oldest) {
        return None;
    }
    let pos = snapshot.position_of(cursor.page_idx)?;
    let entry = &snapshot.pages[pos];
    if entry.sequence == cursor.sequence
        && cursor.element_idx <= entry.num_samples
        && cursor.oldest_element_ms >= start_ms(entry)
    {
        return Some((pos, cursor.element_idx));
    }
    // End-of-log cursor waiting for the record after this one
    if entry.sequence.wrapping_add(1) == cursor.sequence && cursor.element_idx >= entry.num_samples {
        return Some((pos, entry.num_samples));
    }
    None
}

/// Whether resuming a stale cursor at `oldest` skips any element.
///
/// Nothing was lost if the oldest surviving record is the one holding the
/// cursor's next element.
fn lost_data(oldest: &CommittedPage, cursor: &ReadState) -> bool {
    oldest.sequence != cursor.sequence
}

/// Reads up to `max_count` elements starting at `cursor`.
///
/// `snapshot` is taken once per call; a page whose record no longer matches
/// it has been recycled since, and reading stops there.
pub fn read(
    snapshot: &WindowSnapshot,
    source: &mut impl RecordSource,
    cursor: ReadState,
    max_count: usize,
) -> Result<ReadOutcome, LogError> {
    let Some(oldest) = snapshot.oldest() else {
        return Ok(ReadOutcome::empty());
    };

    let mut gap = None;
    let (mut pos, mut element_idx) = match locate(snapshot, &cursor) {
        Some(found) if !cursor.is_fresh() => found,
        _ => {
            if !cursor.is_fresh() && lost_data(oldest, &cursor) {
                let resync = Gap {
                    stale_from_ms: cursor.oldest_element_ms,
                    resumed_at_ms: start_ms(oldest),
                };
                tracing::debug!(
                    "Cursor on page {} is stale, resuming at page {} (lost {}ms..{}ms)",
                    cursor.page_idx, oldest.page, resync.stale_from_ms, resync.resumed_at_ms
                );
                gap = Some(resync);
            }
            (0, 0)
        }
    };

    let mut elements = Vec::with_capacity(max_count.min(256));
    let mut corrupt_pages = Vec::new();
    let mut loaded: Option<Record> = None;
    let mut state = CursorState::Positioned;

    loop {
        let entry = snapshot.pages[pos];

        if element_idx < entry.num_samples {
            if elements.len() >= max_count {
                break;
            }

            if loaded.is_none() {
                match source.load(entry.page) {
                    Ok(Some(record)) if record.sequence == entry.sequence => {
                        loaded = Some(record);
                    }
                    Ok(_) => {
                        tracing::debug!("Page {} recycled during read", entry.page);
                        break;
                    }
                    Err(LogError::CorruptRecord { page, reason }) => {
                        tracing::warn!("Skipping corrupt record on page {}: {}", page, reason);
                        corrupt_pages.push(page);
                        element_idx = entry.num_samples;
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }

            if let Some(record) = &loaded {
                let available = record.elements.len().min(entry.num_samples as usize);
                let from = element_idx as usize;
                let take = (max_count - elements.len()).min(available.saturating_sub(from));
                elements.extend_from_slice(&record.elements[from..from + take]);
                element_idx = if take == 0 {
                    entry.num_samples
                } else {
                    (from + take) as u16
                };
            }
            continue;
        }

        if pos + 1 < snapshot.len() {
            pos += 1;
            element_idx = 0;
            loaded = None;
            continue;
        }

        state = CursorState::EndOfLog;
        break;
    }

    let entry = snapshot.pages[pos];
    let sequence = if state == CursorState::EndOfLog {
        entry.sequence.wrapping_add(1)
    } else {
        entry.sequence
    };
    let oldest_element_ms = if state == CursorState::EndOfLog {
        entry.end_timestamp_s as u64 * 1000 + 1
    } else if element_idx == 0 {
        start_ms(&entry)
    } else {
        loaded
            .as_ref()
            .and_then(|r| r.elements.get(element_idx as usize))
            .map(Element::timestamp_ms)
            .unwrap_or(cursor.oldest_element_ms)
    };

    Ok(ReadOutcome {
        elements,
        cursor: ReadState {
            page_idx: entry.page,
            element_idx,
            oldest_element_ms,
            sequence,
        },
        state,
        gap,
        corrupt_pages,
    })
}
