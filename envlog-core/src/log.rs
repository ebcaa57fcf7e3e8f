//! Log controller.
//!
//! [`AppLog`] ties the record builder, page allocator, record codec and read
//! cursor to a [`PageStore`] and a [`ConfigStore`]. A single scheduler drives
//! [`AppLog::process`]; readers may call [`AppLog::read`] from other threads.
//!
//! Lock order is writer state, then allocator, then flash. The allocator lock
//! is never held across page I/O except during purge.

use crate::allocator::{Allocation, CommittedPage, PageAllocator};
use crate::codec::encode_record;
use crate::config::{LogConfig, OverflowPolicy};
use crate::config_store::ConfigStore;
use crate::cursor::{self, ReadOutcome, ReadState, RecordSource};
use crate::element::Element;
use crate::error::LogError;
use crate::record::{AppendOutcome, Record, RecordBuilder};
use crate::recovery::{load_page, RecoveryReport, RecoveryScanner};
use crate::sensor::{Sensor, SensorError};
use crate::{max_samples_for_page, ELEMENT_MAX_SIZE, STORAGE_RECORD_HEADER_SIZE};
use envlog_flash::{FlashGeometry, PageId, PageStore, ERASED_BYTE};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Tuning for [`AppLog::open`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogOptions {
    /// Samples per record. Defaults to what one page can hold.
    pub max_samples: Option<u16>,
    /// Commit a partially filled record once its first sample is this old.
    pub flush_after_s: Option<u32>,
}

impl LogOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_samples(mut self, max_samples: u16) -> Self {
        self.max_samples = Some(max_samples);
        self
    }

    pub fn with_flush_after(mut self, seconds: u32) -> Self {
        self.flush_after_s = Some(seconds);
        self
    }
}

/// A record written to flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommitInfo {
    pub page: PageId,
    pub sequence: u32,
    pub num_samples: u16,
    /// Page whose older record was reclaimed to make room.
    pub reclaimed: Option<PageId>,
}

/// Result of one [`AppLog::process`] tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// The sampling interval has not elapsed yet.
    NotDue,
    /// The sample was added to the open record.
    Appended { num_samples: u16 },
    /// A record was written during this tick.
    Committed(CommitInfo),
}

/// Counters since the log was opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LogStats {
    pub samples_logged: u64,
    pub samples_dropped: u64,
    pub records_written: u64,
    pub pages_reclaimed: u64,
    pub corrupt_records: u64,
    pub erases: u64,
    pub reads: u64,
}

/// Point-in-time description of the log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogInfo {
    pub geometry: FlashGeometry,
    pub max_samples: u16,
    pub config: LogConfig,
    pub committed_pages: usize,
    pub committed_samples: u64,
    pub open_samples: u16,
    pub oldest: Option<CommittedPage>,
    pub newest: Option<CommittedPage>,
    pub next_sequence: u32,
    pub halted: bool,
}

#[derive(Default)]
struct Counters {
    samples_logged: AtomicU64,
    samples_dropped: AtomicU64,
    records_written: AtomicU64,
    pages_reclaimed: AtomicU64,
    corrupt_records: AtomicU64,
    erases: AtomicU64,
    reads: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LogStats {
        LogStats {
            samples_logged: self.samples_logged.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            pages_reclaimed: self.pages_reclaimed.load(Ordering::Relaxed),
            corrupt_records: self.corrupt_records.load(Ordering::Relaxed),
            erases: self.erases.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
        }
    }
}

struct WriterState {
    builder: RecordBuilder,
    last_sample_s: Option<u32>,
    /// Set when STOP refused a commit; cleared by purge or a switch to WRAP.
    halted: bool,
}

/// Clears the write-in-progress flag when dropped.
struct WriteGuard<'a>(&'a AtomicBool);

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The sensor log.
pub struct AppLog<F: PageStore> {
    flash: Mutex<F>,
    geometry: FlashGeometry,
    max_samples: u16,
    flush_after_s: Option<u32>,
    config_store: Mutex<Box<dyn ConfigStore>>,
    config: RwLock<LogConfig>,
    writer: Mutex<WriterState>,
    allocator: RwLock<PageAllocator>,
    writing: AtomicBool,
    stats: Counters,
}

impl<F: PageStore> AppLog<F> {
    /// Validates the geometry and wraps `flash`. Call [`init`](Self::init)
    /// before logging.
    pub fn open(
        flash: F,
        config_store: impl ConfigStore + 'static,
        options: LogOptions,
    ) -> Result<Self, LogError> {
        let geometry = flash.geometry();
        if geometry.page_count == 0 {
            return Err(LogError::InvalidGeometry {
                reason: "device has no pages".to_string(),
            });
        }
        if geometry.page_size < STORAGE_RECORD_HEADER_SIZE + ELEMENT_MAX_SIZE {
            return Err(LogError::InvalidGeometry {
                reason: format!(
                    "page size {} cannot hold a header and one element",
                    geometry.page_size
                ),
            });
        }

        let capacity = max_samples_for_page(geometry.page_size).min(u16::MAX as usize) as u16;
        let max_samples = options.max_samples.unwrap_or(capacity);
        if max_samples == 0 || max_samples > capacity {
            return Err(LogError::InvalidGeometry {
                reason: format!(
                    "max_samples {} outside 1..={} for {}-byte pages",
                    max_samples, capacity, geometry.page_size
                ),
            });
        }
        if options.flush_after_s == Some(0) {
            return Err(LogError::InvalidConfig {
                reason: "flush_after_s must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            flash: Mutex::new(flash),
            geometry,
            max_samples,
            flush_after_s: options.flush_after_s,
            config_store: Mutex::new(Box::new(config_store)),
            config: RwLock::new(LogConfig::default()),
            writer: Mutex::new(WriterState {
                builder: RecordBuilder::new(max_samples),
                last_sample_s: None,
                halted: false,
            }),
            allocator: RwLock::new(PageAllocator::new(geometry.page_count)),
            writing: AtomicBool::new(false),
            stats: Counters::default(),
        })
    }

    /// Loads the stored configuration (storing the defaults on first use)
    /// and rebuilds the committed window from flash. Never erases.
    pub fn init(&self) -> Result<RecoveryReport, LogError> {
        let _guard = self.begin_write()?;
        let mut writer = self.writer.lock();

        let config = {
            let mut store = self.config_store.lock();
            match store.load()? {
                Some(config) => config,
                None => {
                    let config = LogConfig::default();
                    store.store(&config)?;
                    tracing::info!("No stored log configuration, using defaults");
                    config
                }
            }
        };
        *self.config.write() = config;

        let report = {
            let mut flash = self.flash.lock();
            RecoveryScanner::new(self.max_samples).scan(&mut *flash)?
        };
        self.allocator
            .write()
            .restore(report.window.clone(), report.next_sequence());

        writer.builder.discard();
        writer.last_sample_s = None;
        writer.halted = false;

        tracing::info!(
            "Log initialized: {} every {}s ({}), {} records with {} samples",
            config.fields,
            config.interval_s,
            config.overflow,
            report.window.len(),
            report.samples()
        );
        Ok(report)
    }

    pub fn config_get(&self) -> LogConfig {
        *self.config.read()
    }

    /// Validates, persists and applies `config`.
    ///
    /// Samples already buffered were taken under the old configuration, so the
    /// open record is committed first. If that write fails the record stays
    /// buffered and is committed by the next [`process`](Self::process) call.
    pub fn config_set(&self, config: LogConfig) -> Result<(), LogError> {
        config.validate()?;
        let _guard = self.begin_write()?;
        let mut writer = self.writer.lock();

        self.config_store.lock().store(&config)?;
        let previous = std::mem::replace(&mut *self.config.write(), config);

        if config.overflow == OverflowPolicy::Wrap && writer.halted {
            tracing::info!("Overflow policy changed to wrap, resuming logging");
            writer.halted = false;
        }

        tracing::info!(
            "Log configuration updated: {} every {}s ({})",
            config.fields,
            config.interval_s,
            config.overflow
        );

        if previous != config {
            if writer.builder.has_samples() {
                if let Err(e) = self.commit_open(&mut writer) {
                    tracing::warn!("Could not flush record after configuration change: {}", e);
                }
            } else {
                writer.builder.discard();
            }
        }
        Ok(())
    }

    /// Runs one scheduler tick at `now_s`.
    ///
    /// Takes a sample if the interval has elapsed and commits the open record
    /// once it is full or older than the flush threshold.
    pub fn process(&self, now_s: u32, sensor: &mut dyn Sensor) -> Result<ProcessStatus, LogError> {
        let _guard = self.begin_write()?;
        let config = self.config_get();
        let mut writer = self.writer.lock();

        if let Some(last) = writer.last_sample_s {
            if now_s < last.saturating_add(config.interval_s) {
                return Ok(ProcessStatus::NotDue);
            }
        }

        if writer.halted {
            writer.last_sample_s = Some(now_s);
            Counters::bump(&self.stats.samples_dropped);
            tracing::debug!("Storage full, sample at {}s dropped", now_s);
            return Err(LogError::StorageFull);
        }

        let mut committed = None;

        // A record left by a failed commit or taken under an older
        // configuration is written before anything new is buffered.
        let stale = writer
            .builder
            .current()
            .is_some_and(|r| r.block_configuration != config);
        if writer.builder.is_full() || (stale && writer.builder.has_samples()) {
            match self.commit_open(&mut writer) {
                Ok(info) => committed = Some(info),
                Err(e) => {
                    writer.last_sample_s = Some(now_s);
                    Counters::bump(&self.stats.samples_dropped);
                    tracing::warn!("Pending record not written, sample at {}s dropped: {}", now_s, e);
                    return Err(e);
                }
            }
        } else if stale {
            writer.builder.discard();
        }

        let element = match self.sample(now_s, sensor, &config) {
            Ok(element) => element,
            Err(e) => {
                Counters::bump(&self.stats.samples_dropped);
                return Err(e);
            }
        };

        if !writer.builder.is_open() {
            writer.builder.open(config, now_s)?;
        }
        if writer.builder.append(element)? == AppendOutcome::Full {
            match self.commit_open(&mut writer) {
                Ok(info) => committed = Some(info),
                Err(e) => {
                    writer.last_sample_s = Some(now_s);
                    Counters::bump(&self.stats.samples_dropped);
                    return Err(e);
                }
            }
            writer.builder.open(config, now_s)?;
            writer.builder.append(element)?;
        }
        writer.last_sample_s = Some(now_s);
        Counters::bump(&self.stats.samples_logged);

        let aged = match (self.flush_after_s, writer.builder.age_s(now_s)) {
            (Some(limit), Some(age)) => age >= limit,
            _ => false,
        };
        if writer.builder.is_full() || aged {
            // The sample stays buffered if this fails.
            committed = Some(self.commit_open(&mut writer)?);
        }

        Ok(match committed {
            Some(info) => ProcessStatus::Committed(info),
            None => ProcessStatus::Appended {
                num_samples: writer.builder.num_samples(),
            },
        })
    }

    /// Commits the open record now, if it holds any samples.
    pub fn flush(&self) -> Result<Option<CommitInfo>, LogError> {
        let _guard = self.begin_write()?;
        let mut writer = self.writer.lock();
        if !writer.builder.has_samples() {
            writer.builder.discard();
            return Ok(None);
        }
        self.commit_open(&mut writer).map(Some)
    }

    /// Reads up to `max_count` committed elements starting at `cursor`.
    ///
    /// Samples still buffered in the open record are not visible.
    pub fn read(&self, cursor: ReadState, max_count: usize) -> Result<ReadOutcome, LogError> {
        let snapshot = self.allocator.read().snapshot();
        let mut source = FlashSource {
            flash: &self.flash,
            max_samples: self.max_samples,
            reads: &self.stats.reads,
        };
        let outcome = cursor::read(&snapshot, &mut source, cursor, max_count)?;
        self.stats
            .corrupt_records
            .fetch_add(outcome.corrupt_pages.len() as u64, Ordering::Relaxed);
        Ok(outcome)
    }

    /// Erases every page that is not blank and forgets all records.
    ///
    /// Buffered samples are discarded and a STOP halt is lifted. Calling it
    /// on an empty log does nothing.
    pub fn purge_flash(&self) -> Result<(), LogError> {
        let _guard = self.begin_write()?;
        let mut writer = self.writer.lock();
        writer.builder.discard();
        writer.last_sample_s = None;
        writer.halted = false;

        let mut allocator = self.allocator.write();
        allocator.purge();

        let mut flash = self.flash.lock();
        let mut buf = vec![0u8; self.geometry.page_size];
        let mut erased = 0u32;
        for page in 0..self.geometry.page_count {
            flash.read(page, &mut buf)?;
            if buf.iter().all(|&b| b == ERASED_BYTE) {
                continue;
            }
            flash.erase(page)?;
            Counters::bump(&self.stats.erases);
            erased += 1;
        }
        flash.sync()?;

        tracing::info!("Log purged ({} pages erased)", erased);
        Ok(())
    }

    pub fn stats(&self) -> LogStats {
        self.stats.snapshot()
    }

    pub fn info(&self) -> LogInfo {
        let (open_samples, halted) = {
            let writer = self.writer.lock();
            (writer.builder.num_samples(), writer.halted)
        };
        let allocator = self.allocator.read();
        let snapshot = allocator.snapshot();

        LogInfo {
            geometry: self.geometry,
            max_samples: self.max_samples,
            config: self.config_get(),
            committed_pages: snapshot.len(),
            committed_samples: snapshot.pages.iter().map(|p| p.num_samples as u64).sum(),
            open_samples,
            oldest: snapshot.oldest().copied(),
            newest: snapshot.newest().copied(),
            next_sequence: allocator.next_sequence(),
            halted,
        }
    }

    pub fn geometry(&self) -> FlashGeometry {
        self.geometry
    }

    pub fn max_samples(&self) -> u16 {
        self.max_samples
    }

    fn begin_write(&self) -> Result<WriteGuard<'_>, LogError> {
        self.writing
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| LogError::Busy)?;
        Ok(WriteGuard(&self.writing))
    }

    fn sample(&self, now_s: u32, sensor: &mut dyn Sensor, config: &LogConfig) -> Result<Element, LogError> {
        let reading = sensor.read(config.fields)?;
        Element::from_reading(now_s, &reading, config.fields)
            .map_err(|field| LogError::Sensor(SensorError::Unavailable(field)))
    }

    /// Writes the open record to the next page.
    ///
    /// A reclaimed page leaves the window only once it has been erased. On
    /// failure the record is put back into the builder.
    fn commit_open(&self, writer: &mut WriterState) -> Result<CommitInfo, LogError> {
        let policy = self.config.read().overflow;
        let mut record = writer.builder.close()?;

        let allocation = match self.allocator.read().next_write_page(policy) {
            Ok(allocation) => allocation,
            Err(e) => {
                if matches!(e, LogError::StorageFull) && !writer.halted {
                    tracing::warn!("Storage full under stop policy, logging halted");
                    writer.halted = true;
                }
                writer.builder.restore(record);
                return Err(e);
            }
        };

        record.page = Some(allocation.page);
        record.sequence = allocation.sequence;

        if let Err(e) = self.write_record(&allocation, &record) {
            tracing::warn!("Record write to page {} failed: {}", allocation.page, e);
            writer.builder.restore(record);
            return Err(e);
        }

        let committed = CommittedPage {
            page: allocation.page,
            sequence: allocation.sequence,
            start_timestamp_s: record.start_timestamp_s,
            end_timestamp_s: record.end_timestamp_s,
            num_samples: record.num_samples(),
        };
        self.allocator.write().commit(committed);
        Counters::bump(&self.stats.records_written);

        tracing::debug!(
            "Committed record {} to page {} ({} samples)",
            committed.sequence,
            committed.page,
            committed.num_samples
        );

        Ok(CommitInfo {
            page: committed.page,
            sequence: committed.sequence,
            num_samples: committed.num_samples,
            reclaimed: allocation.reclaimed.map(|p| p.page),
        })
    }

    /// Erases the allocated page, drops a reclaimed record from the window,
    /// then programs `record`.
    fn write_record(&self, allocation: &Allocation, record: &Record) -> Result<(), LogError> {
        let page = allocation.page;
        let encoded = encode_record(record, self.geometry.page_size, self.max_samples)?;

        self.flash.lock().erase(page)?;
        Counters::bump(&self.stats.erases);

        if let Some(old) = allocation.reclaimed {
            self.allocator.write().pop_oldest();
            Counters::bump(&self.stats.pages_reclaimed);
            tracing::debug!(
                "Reclaimed page {} (record {}, {} samples)",
                old.page,
                old.sequence,
                old.num_samples
            );
        }

        let mut flash = self.flash.lock();
        flash.program(page, &encoded)?;
        flash.sync()?;
        Ok(())
    }
}

/// Loads records for the cursor, locking the flash per page.
struct FlashSource<'a, F> {
    flash: &'a Mutex<F>,
    max_samples: u16,
    reads: &'a AtomicU64,
}

impl<F: PageStore> RecordSource for FlashSource<'_, F> {
    fn load(&mut self, page: PageId) -> Result<Option<Record>, LogError> {
        Counters::bump(self.reads);
        let mut flash = self.flash.lock();
        load_page(&mut *flash, page, self.max_samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldMask;
    use crate::config_store::MemoryConfigStore;
    use crate::cursor::{CursorState, Gap};
    use crate::sensor::Reading;
    use envlog_flash::file::IMAGE_FILENAME;
    use envlog_flash::{FileFlash, MemFlash};
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn sensor() -> impl FnMut(FieldMask) -> Result<Reading, SensorError> {
        |_| Ok(Reading::new(21.5, 45.0, 101_325.0))
    }

    /// Two 128-byte pages, three samples per record, 10 s interval.
    fn small_log(policy: OverflowPolicy) -> (AppLog<MemFlash>, MemFlash) {
        let flash = MemFlash::new(FlashGeometry::new(128, 2));
        let store = MemoryConfigStore::with_config(
            LogConfig::default()
                .with_interval(10)
                .with_overflow(policy),
        );
        let log = AppLog::open(flash.clone(), store, LogOptions::new().with_max_samples(3)).unwrap();
        log.init().unwrap();
        (log, flash)
    }

    fn run(log: &AppLog<MemFlash>, times: impl IntoIterator<Item = u32>) {
        let mut sensor = sensor();
        for t in times {
            log.process(t, &mut sensor).unwrap();
        }
    }

    fn timestamps(outcome: &ReadOutcome) -> Vec<u32> {
        outcome.elements.iter().map(|e| e.timestamp_s).collect()
    }

    #[test]
    fn test_wrap_scenario() {
        let (log, _flash) = small_log(OverflowPolicy::Wrap);
        run(&log, (0..=80).step_by(10));

        let outcome = log.read(ReadState::new(), 6).unwrap();
        assert_eq!(timestamps(&outcome), vec![30, 40, 50, 60, 70, 80]);
        assert_eq!(outcome.state, CursorState::EndOfLog);
        assert_eq!(log.stats().pages_reclaimed, 1);
        assert_eq!(log.stats().records_written, 3);
    }

    #[test]
    fn test_commit_reports_reclaim() {
        let (log, _flash) = small_log(OverflowPolicy::Wrap);
        run(&log, (0..=70).step_by(10));

        let status = log.process(80, &mut sensor()).unwrap();
        assert_eq!(
            status,
            ProcessStatus::Committed(CommitInfo {
                page: 0,
                sequence: 2,
                num_samples: 3,
                reclaimed: Some(0),
            })
        );
    }

    #[test]
    fn test_interval_gating() {
        let (log, _flash) = small_log(OverflowPolicy::Wrap);
        let mut sensor = sensor();

        assert_eq!(
            log.process(100, &mut sensor).unwrap(),
            ProcessStatus::Appended { num_samples: 1 }
        );
        assert_eq!(log.process(105, &mut sensor).unwrap(), ProcessStatus::NotDue);
        assert_eq!(
            log.process(110, &mut sensor).unwrap(),
            ProcessStatus::Appended { num_samples: 2 }
        );
    }

    #[test]
    fn test_stop_halts_until_purge() {
        let (log, flash) = small_log(OverflowPolicy::Stop);
        run(&log, (0..=70).step_by(10));

        let mut sensor = sensor();
        assert!(matches!(log.process(80, &mut sensor), Err(LogError::StorageFull)));
        assert!(matches!(log.process(90, &mut sensor), Err(LogError::StorageFull)));
        assert!(log.info().halted);

        let outcome = log.read(ReadState::new(), 10).unwrap();
        assert_eq!(timestamps(&outcome), vec![0, 10, 20, 30, 40, 50]);

        log.purge_flash().unwrap();
        assert!(!log.info().halted);
        assert!(flash.page_bytes(0).iter().all(|&b| b == ERASED_BYTE));
        assert_eq!(
            log.process(100, &mut sensor).unwrap(),
            ProcessStatus::Appended { num_samples: 1 }
        );
    }

    #[test]
    fn test_switch_to_wrap_resumes() {
        let (log, _flash) = small_log(OverflowPolicy::Stop);
        run(&log, (0..=70).step_by(10));
        assert!(log.process(80, &mut sensor()).is_err());

        log.config_set(log.config_get().with_overflow(OverflowPolicy::Wrap))
            .unwrap();
        assert!(!log.info().halted);

        // The buffered full record was flushed by reclaiming page 0.
        let outcome = log.read(ReadState::new(), 10).unwrap();
        assert_eq!(timestamps(&outcome), vec![30, 40, 50, 60, 70, 80]);
    }

    #[test]
    fn test_config_change_starts_new_record() {
        let flash = MemFlash::new(FlashGeometry::new(256, 4));
        let log = AppLog::open(flash, MemoryConfigStore::new(), LogOptions::new()).unwrap();
        log.init().unwrap();
        log.config_set(LogConfig::default().with_interval(10)).unwrap();

        run(&log, [0, 10]);
        log.config_set(
            LogConfig::default()
                .with_interval(10)
                .with_fields(FieldMask::HUMIDITY),
        )
        .unwrap();
        run(&log, [20, 30]);
        log.flush().unwrap();

        let outcome = log.read(ReadState::new(), 10).unwrap();
        assert_eq!(timestamps(&outcome), vec![0, 10, 20, 30]);
        assert_eq!(outcome.elements[1].fields(), FieldMask::ALL);
        assert_eq!(outcome.elements[1].pressure_pa, Some(101_325.0));
        assert_eq!(outcome.elements[2].fields(), FieldMask::HUMIDITY);
        assert_eq!(outcome.elements[2].temperature_c, None);
        assert_eq!(log.info().committed_pages, 2);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (log, _flash) = small_log(OverflowPolicy::Wrap);
        let before = log.config_get();
        assert!(matches!(
            log.config_set(before.with_interval(0)),
            Err(LogError::InvalidConfig { .. })
        ));
        assert!(matches!(
            log.config_set(before.with_fields(FieldMask::EMPTY)),
            Err(LogError::InvalidConfig { .. })
        ));
        assert_eq!(log.config_get(), before);
    }

    #[test]
    fn test_init_stores_defaults() {
        let store = MemoryConfigStore::new();
        let flash = MemFlash::new(FlashGeometry::new(128, 2));
        let log = AppLog::open(flash, store.clone(), LogOptions::new()).unwrap();
        log.init().unwrap();

        assert_eq!(store.get(), Some(LogConfig::default()));
        assert_eq!(log.config_get(), LogConfig::default());
    }

    #[test]
    fn test_invalid_geometry() {
        let tiny = MemFlash::new(FlashGeometry::new(40, 2));
        assert!(matches!(
            AppLog::open(tiny, MemoryConfigStore::new(), LogOptions::new()),
            Err(LogError::InvalidGeometry { .. })
        ));

        let flash = MemFlash::new(FlashGeometry::new(128, 2));
        assert!(matches!(
            AppLog::open(flash, MemoryConfigStore::new(), LogOptions::new().with_max_samples(7)),
            Err(LogError::InvalidGeometry { .. })
        ));
    }

    #[test]
    fn test_program_failure_keeps_record() {
        let (log, flash) = small_log(OverflowPolicy::Wrap);
        run(&log, [0, 10]);

        flash.fail_next_programs(1);
        let mut sensor = sensor();
        assert!(matches!(log.process(20, &mut sensor), Err(LogError::StorageIo(_))));
        assert_eq!(log.info().open_samples, 3);
        assert_eq!(log.info().committed_pages, 0);

        // The retry succeeds, so this tick's sample is kept.
        let status = log.process(30, &mut sensor).unwrap();
        assert!(matches!(status, ProcessStatus::Committed(CommitInfo { page: 0, .. })));
        assert_eq!(log.info().open_samples, 1);

        let outcome = log.read(ReadState::new(), 10).unwrap();
        assert_eq!(timestamps(&outcome), vec![0, 10, 20]);
    }

    #[test]
    fn test_sample_dropped_while_flush_pending() {
        let (log, flash) = small_log(OverflowPolicy::Wrap);
        run(&log, [0, 10]);

        flash.fail_next_programs(2);
        let mut sensor = sensor();
        assert!(log.process(20, &mut sensor).is_err());
        assert!(log.process(30, &mut sensor).is_err());
        assert_eq!(log.stats().samples_dropped, 1);

        log.process(40, &mut sensor).unwrap();
        log.flush().unwrap();
        let outcome = log.read(ReadState::new(), 10).unwrap();
        assert_eq!(timestamps(&outcome), vec![0, 10, 20, 40]);
    }

    #[test]
    fn test_sensor_error_drops_sample() {
        let (log, _flash) = small_log(OverflowPolicy::Wrap);
        let mut failing = |_: FieldMask| Err::<Reading, _>(SensorError::NotReady);
        assert!(matches!(
            log.process(0, &mut failing),
            Err(LogError::Sensor(SensorError::NotReady))
        ));

        let mut partial = |_: FieldMask| {
            Ok::<_, SensorError>(Reading {
                temperature_c: Some(20.0),
                ..Reading::default()
            })
        };
        assert!(matches!(
            log.process(0, &mut partial),
            Err(LogError::Sensor(SensorError::Unavailable(_)))
        ));
        assert_eq!(log.stats().samples_dropped, 2);
        assert_eq!(log.info().open_samples, 0);
    }

    #[test]
    fn test_time_based_flush() {
        let flash = MemFlash::new(FlashGeometry::new(128, 2));
        let store = MemoryConfigStore::with_config(LogConfig::default().with_interval(10));
        let options = LogOptions::new().with_max_samples(3).with_flush_after(15);
        let log = AppLog::open(flash, store, options).unwrap();
        log.init().unwrap();

        run(&log, [0, 10]);
        assert_eq!(log.info().committed_pages, 0);
        let status = log.process(20, &mut sensor()).unwrap();
        assert!(matches!(status, ProcessStatus::Committed(CommitInfo { num_samples: 3, .. })));

        let mut sensor = sensor();
        log.process(30, &mut sensor).unwrap();
        let status = log.process(45, &mut sensor).unwrap();
        assert!(matches!(status, ProcessStatus::Committed(CommitInfo { num_samples: 2, .. })));
    }

    #[test]
    fn test_busy_while_writing() {
        let (log, _flash) = small_log(OverflowPolicy::Wrap);
        let guard = log.begin_write().unwrap();
        assert!(matches!(log.process(0, &mut sensor()), Err(LogError::Busy)));
        assert!(matches!(log.purge_flash(), Err(LogError::Busy)));
        drop(guard);
        assert!(log.process(0, &mut sensor()).is_ok());
    }

    #[test]
    fn test_purge_idempotent() {
        let (log, flash) = small_log(OverflowPolicy::Wrap);
        run(&log, (0..=50).step_by(10));
        let old = log.read(ReadState::new(), 4).unwrap().cursor;

        log.purge_flash().unwrap();
        let counts = flash.erase_counts();
        log.purge_flash().unwrap();
        assert_eq!(flash.erase_counts(), counts);

        let outcome = log.read(old, 10).unwrap();
        assert_eq!(outcome.state, CursorState::Empty);
        assert!(outcome.elements.is_empty());
    }

    #[test]
    fn test_stale_cursor_after_wrap() {
        let (log, _flash) = small_log(OverflowPolicy::Wrap);
        run(&log, (0..=50).step_by(10));
        let first = log.read(ReadState::new(), 1).unwrap();
        assert_eq!(timestamps(&first), vec![0]);

        run(&log, (60..=80).step_by(10));
        let outcome = log.read(first.cursor, 10).unwrap();
        assert_eq!(timestamps(&outcome), vec![30, 40, 50, 60, 70, 80]);
        assert_eq!(
            outcome.gap,
            Some(Gap {
                stale_from_ms: 10_000,
                resumed_at_ms: 30_000,
            })
        );
    }

    #[test]
    fn test_drained_cursor_survives_wrap() {
        let (log, _flash) = small_log(OverflowPolicy::Wrap);
        run(&log, (0..=50).step_by(10));
        let drained = log.read(ReadState::new(), 10).unwrap();
        assert_eq!(drained.state, CursorState::EndOfLog);

        // Both pages reclaimed, but only after the cursor had read them.
        run(&log, (60..=110).step_by(10));
        let outcome = log.read(drained.cursor, 10).unwrap();
        assert_eq!(timestamps(&outcome), vec![60, 70, 80, 90, 100, 110]);
        assert!(outcome.gap.is_none());
        assert_eq!(log.stats().pages_reclaimed, 2);
    }

    #[test]
    fn test_drained_cursor_reports_lost_record() {
        let (log, _flash) = small_log(OverflowPolicy::Wrap);
        run(&log, (0..=50).step_by(10));
        let drained = log.read(ReadState::new(), 10).unwrap();

        run(&log, (60..=140).step_by(10));
        let outcome = log.read(drained.cursor, 10).unwrap();
        assert_eq!(timestamps(&outcome), vec![90, 100, 110, 120, 130, 140]);
        assert_eq!(
            outcome.gap,
            Some(Gap {
                stale_from_ms: 50_001,
                resumed_at_ms: 90_000,
            })
        );
    }

    #[test]
    fn test_erase_failure_keeps_reclaimed_page() {
        let (log, flash) = small_log(OverflowPolicy::Wrap);
        run(&log, (0..=70).step_by(10));

        flash.fail_next_erases(1);
        let mut sensor = sensor();
        assert!(matches!(log.process(80, &mut sensor), Err(LogError::StorageIo(_))));
        assert_eq!(log.stats().pages_reclaimed, 0);
        assert_eq!(log.info().committed_pages, 2);

        // Page 0 still holds its record, so it stays readable.
        let outcome = log.read(ReadState::new(), 10).unwrap();
        assert_eq!(timestamps(&outcome), vec![0, 10, 20, 30, 40, 50]);

        let status = log.process(90, &mut sensor).unwrap();
        assert!(matches!(
            status,
            ProcessStatus::Committed(CommitInfo { page: 0, reclaimed: Some(0), .. })
        ));
        assert_eq!(log.stats().pages_reclaimed, 1);
        let outcome = log.read(ReadState::new(), 10).unwrap();
        assert_eq!(timestamps(&outcome), vec![30, 40, 50, 60, 70, 80]);
    }

    #[test]
    fn test_program_failure_after_reclaim() {
        let (log, flash) = small_log(OverflowPolicy::Wrap);
        run(&log, (0..=70).step_by(10));

        flash.fail_next_programs(1);
        let mut sensor = sensor();
        assert!(matches!(log.process(80, &mut sensor), Err(LogError::StorageIo(_))));

        // The erase went through, so the old record is gone for good.
        assert_eq!(log.stats().pages_reclaimed, 1);
        let outcome = log.read(ReadState::new(), 10).unwrap();
        assert_eq!(timestamps(&outcome), vec![30, 40, 50]);

        let status = log.process(90, &mut sensor).unwrap();
        assert!(matches!(
            status,
            ProcessStatus::Committed(CommitInfo { page: 0, reclaimed: None, .. })
        ));
        assert_eq!(log.stats().pages_reclaimed, 1);
        let outcome = log.read(ReadState::new(), 10).unwrap();
        assert_eq!(timestamps(&outcome), vec![30, 40, 50, 60, 70, 80]);
    }

    #[test]
    fn test_corrupt_record_skipped() {
        let flash = MemFlash::new(FlashGeometry::new(128, 4));
        let store = MemoryConfigStore::with_config(LogConfig::default().with_interval(10));
        let log = AppLog::open(flash.clone(), store, LogOptions::new().with_max_samples(2)).unwrap();
        log.init().unwrap();
        run(&log, (0..60).step_by(10));

        flash.corrupt(1, 40);
        let outcome = log.read(ReadState::new(), 10).unwrap();
        assert_eq!(timestamps(&outcome), vec![0, 10, 40, 50]);
        assert_eq!(outcome.corrupt_pages, vec![1]);
        assert_eq!(log.stats().corrupt_records, 1);
    }

    #[test]
    fn test_restart_recovers_window() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join(IMAGE_FILENAME);
        let geometry = FlashGeometry::new(128, 3);
        let options = LogOptions::new().with_max_samples(3);

        {
            let flash = FileFlash::create(&image, geometry).unwrap();
            let log = AppLog::open(flash, crate::FileConfigStore::in_dir(dir.path()), options).unwrap();
            log.init().unwrap();
            log.config_set(LogConfig::default().with_interval(10)).unwrap();
            run_file(&log, (0..110).step_by(10));
            log.flush().unwrap();
        }

        let flash = FileFlash::open(&image, geometry).unwrap();
        let log = AppLog::open(flash, crate::FileConfigStore::in_dir(dir.path()), options).unwrap();
        let report = log.init().unwrap();
        assert_eq!(report.window.len(), 3);
        assert_eq!(log.config_get().interval_s, 10);

        let outcome = log.read(ReadState::new(), 20).unwrap();
        assert_eq!(timestamps(&outcome), vec![30, 40, 50, 60, 70, 80, 90, 100]);

        run_file(&log, [110, 120, 130]);
        let info = log.info();
        assert_eq!(info.newest.map(|p| p.sequence), Some(4));
        assert_eq!(info.oldest.map(|p| p.start_timestamp_s), Some(60));
    }

    fn run_file(log: &AppLog<FileFlash>, times: impl IntoIterator<Item = u32>) {
        let mut sensor = sensor();
        for t in times {
            log.process(t, &mut sensor).unwrap();
        }
    }

    #[test]
    fn test_concurrent_reader() {
        let flash = MemFlash::new(FlashGeometry::new(128, 4));
        let store = MemoryConfigStore::with_config(LogConfig::default().with_interval(1));
        let log = AppLog::open(flash, store, LogOptions::new().with_max_samples(3)).unwrap();
        log.init().unwrap();

        std::thread::scope(|s| {
            s.spawn(|| {
                let mut sensor = sensor();
                for t in 0..300 {
                    log.process(t, &mut sensor).unwrap();
                }
            });
            s.spawn(|| {
                let mut cursor = ReadState::new();
                let mut last = None;
                for _ in 0..200 {
                    let outcome = log.read(cursor, 5).unwrap();
                    for element in &outcome.elements {
                        if outcome.gap.is_none() {
                            assert!(last.map_or(true, |l| element.timestamp_s > l));
                        }
                        last = Some(element.timestamp_s);
                    }
                    cursor = outcome.cursor;
                }
            });
        });
    }

    fn mem_log(max_samples: u16, pages: u32) -> AppLog<MemFlash> {
        let flash = MemFlash::new(FlashGeometry::new(4096, pages));
        let store = MemoryConfigStore::with_config(LogConfig::default().with_interval(1));
        let log = AppLog::open(flash, store, LogOptions::new().with_max_samples(max_samples)).unwrap();
        log.init().unwrap();
        log
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_round_trip(readings in prop::collection::vec((-40.0f32..85.0, 0.0f32..100.0, 30_000.0f32..110_000.0), 1..=254)) {
            let log = mem_log(254, 2);
            for (i, (t, h, p)) in readings.iter().enumerate() {
                let reading = Reading::new(*t, *h, *p);
                let mut sensor = move |_: FieldMask| Ok::<_, SensorError>(reading);
                log.process(i as u32, &mut sensor).unwrap();
            }
            log.flush().unwrap();

            let outcome = log.read(ReadState::new(), 1000).unwrap();
            prop_assert_eq!(outcome.elements.len(), readings.len());
            for (i, (element, (t, h, p))) in outcome.elements.iter().zip(&readings).enumerate() {
                prop_assert_eq!(element.timestamp_s, i as u32);
                prop_assert_eq!(element.temperature_c, Some(*t));
                prop_assert_eq!(element.humidity_rh, Some(*h));
                prop_assert_eq!(element.pressure_pa, Some(*p));
            }
        }

        #[test]
        fn prop_cursor_resumable(total in 1u32..60, k in 0usize..60, m in 0usize..60) {
            let log = mem_log(4, 32);
            run(&log, 0..total);
            log.flush().unwrap();

            let whole = log.read(ReadState::new(), k + m).unwrap();
            let first = log.read(ReadState::new(), k).unwrap();
            let second = log.read(first.cursor, m).unwrap();

            let mut split = first.elements.clone();
            split.extend(second.elements);
            prop_assert_eq!(split, whole.elements);
        }
    }
}
