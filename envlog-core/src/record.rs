//! Records and the record builder.

use crate::config::LogConfig;
use crate::element::Element;
use crate::error::LogError;
use envlog_flash::PageId;

/// One page worth of samples plus the configuration they were taken under.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Page holding the record, once written.
    pub page: Option<PageId>,
    /// Write sequence, assigned when the record is committed.
    pub sequence: u32,
    /// Timestamp of the first element.
    pub start_timestamp_s: u32,
    /// Timestamp of the last element.
    pub end_timestamp_s: u32,
    /// Configuration active when the record was opened.
    pub block_configuration: LogConfig,
    pub elements: Vec<Element>,
}

impl Record {
    pub fn new(block_configuration: LogConfig, start_timestamp_s: u32) -> Self {
        Self {
            page: None,
            sequence: 0,
            start_timestamp_s,
            end_timestamp_s: start_timestamp_s,
            block_configuration,
            elements: Vec::new(),
        }
    }

    pub fn num_samples(&self) -> u16 {
        self.elements.len() as u16
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// Result of [`RecordBuilder::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// The record cannot take this element; close it and open another.
    Full,
}

/// Accumulates elements into at most one open record.
#[derive(Debug)]
pub struct RecordBuilder {
    max_samples: u16,
    open: Option<Record>,
}

impl RecordBuilder {
    pub fn new(max_samples: u16) -> Self {
        Self {
            max_samples,
            open: None,
        }
    }

    /// Begins a new record under `config`.
    pub fn open(&mut self, config: LogConfig, start_timestamp_s: u32) -> Result<(), LogError> {
        if self.open.is_some() {
            return Err(LogError::AlreadyOpen);
        }
        self.open = Some(Record::new(config, start_timestamp_s));
        Ok(())
    }

    /// Adds an element to the open record.
    ///
    /// Signals [`AppendOutcome::Full`] when the record already holds
    /// `max_samples` elements or the element's fields do not match the
    /// record's snapshot.
    pub fn append(&mut self, element: Element) -> Result<AppendOutcome, LogError> {
        let max_samples = self.max_samples;
        let record = self.open.as_mut().ok_or(LogError::NoOpenRecord)?;

        if record.num_samples() >= max_samples
            || element.fields() != record.block_configuration.fields
        {
            return Ok(AppendOutcome::Full);
        }

        if record.is_empty() {
            record.start_timestamp_s = element.timestamp_s;
        }
        record.end_timestamp_s = element.timestamp_s;
        record.elements.push(element);
        Ok(AppendOutcome::Appended)
    }

    /// Finalizes the open record and hands it over for writing.
    ///
    /// An open record without samples is discarded and reported as
    /// [`LogError::NoOpenRecord`], so no empty record ever reaches storage.
    pub fn close(&mut self) -> Result<Record, LogError> {
        match self.open.take() {
            Some(record) if !record.is_empty() => Ok(record),
            _ => Err(LogError::NoOpenRecord),
        }
    }

    /// Puts back a record returned by [`close`](Self::close) that could not
    /// be written, replacing any record opened since.
    pub fn restore(&mut self, record: Record) {
        self.open = Some(record);
    }

    /// Drops the open record, if any.
    pub fn discard(&mut self) -> Option<Record> {
        self.open.take()
    }

    pub fn current(&self) -> Option<&Record> {
        self.open.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn num_samples(&self) -> u16 {
        self.open.as_ref().map_or(0, Record::num_samples)
    }

    pub fn has_samples(&self) -> bool {
        self.num_samples() > 0
    }

    pub fn is_full(&self) -> bool {
        self.num_samples() >= self.max_samples
    }

    pub fn max_samples(&self) -> u16 {
        self.max_samples
    }

    /// Seconds since the first element of the open record.
    pub fn age_s(&self, now_s: u32) -> Option<u32> {
        self.open
            .as_ref()
            .filter(|r| !r.is_empty())
            .map(|r| now_s.saturating_sub(r.start_timestamp_s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FieldMask, OverflowPolicy};

    fn config() -> LogConfig {
        LogConfig::new(FieldMask::TEMPERATURE, 10, OverflowPolicy::Wrap)
    }

    fn temp(ts: u32) -> Element {
        Element::new(ts).with_temperature(20.0 + ts as f32)
    }

    #[test]
    fn test_open_twice() {
        let mut builder = RecordBuilder::new(3);
        builder.open(config(), 0).unwrap();
        assert!(matches!(builder.open(config(), 0), Err(LogError::AlreadyOpen)));
    }

    #[test]
    fn test_append_without_open() {
        let mut builder = RecordBuilder::new(3);
        assert!(matches!(builder.append(temp(0)), Err(LogError::NoOpenRecord)));
        assert!(matches!(builder.close(), Err(LogError::NoOpenRecord)));
    }

    #[test]
    fn test_fill_and_close() {
        let mut builder = RecordBuilder::new(3);
        builder.open(config(), 5).unwrap();

        for ts in [10, 20, 30] {
            assert_eq!(builder.append(temp(ts)).unwrap(), AppendOutcome::Appended);
        }
        assert!(builder.is_full());
        assert_eq!(builder.append(temp(40)).unwrap(), AppendOutcome::Full);

        let record = builder.close().unwrap();
        assert_eq!(record.num_samples(), 3);
        assert_eq!(record.start_timestamp_s, 10);
        assert_eq!(record.end_timestamp_s, 30);
        assert_eq!(record.block_configuration, config());
        assert!(!builder.is_open());
    }

    #[test]
    fn test_mask_mismatch_is_full() {
        let mut builder = RecordBuilder::new(3);
        builder.open(config(), 0).unwrap();
        let outcome = builder
            .append(Element::new(0).with_humidity(50.0))
            .unwrap();
        assert_eq!(outcome, AppendOutcome::Full);
        assert_eq!(builder.num_samples(), 0);
    }

    #[test]
    fn test_close_empty_discards() {
        let mut builder = RecordBuilder::new(3);
        builder.open(config(), 0).unwrap();
        assert!(matches!(builder.close(), Err(LogError::NoOpenRecord)));
        assert!(!builder.is_open());
    }

    #[test]
    fn test_age() {
        let mut builder = RecordBuilder::new(3);
        assert_eq!(builder.age_s(100), None);
        builder.open(config(), 0).unwrap();
        assert_eq!(builder.age_s(100), None);
        builder.append(temp(40)).unwrap();
        assert_eq!(builder.age_s(100), Some(60));
    }
}
