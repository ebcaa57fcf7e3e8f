//! Periodic tick runner.
//!
//! Drives [`AppLog::process`] from a tokio interval. The log decides on each
//! tick whether a sample is due, so the tick period only bounds how late a
//! sample can be.

use crate::settings::RunnerSettings;
use envlog_core::{AppLog, LogError, ProcessStatus, Sensor};
use envlog_flash::PageStore;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;

/// Source of the current time in seconds.
pub type Clock = Box<dyn Fn() -> u32 + Send + Sync>;

/// Wall-clock time as Unix seconds.
pub fn system_clock() -> u32 {
    chrono::Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32
}

/// Runs the log's periodic tick until shut down.
pub struct Runner<F: PageStore> {
    log: Arc<AppLog<F>>,
    sensor: Mutex<Box<dyn Sensor + Send>>,
    settings: RunnerSettings,
    clock: Clock,
    ticks: AtomicU64,
    commits: AtomicU64,
    errors: AtomicU64,
    last_error: Mutex<Option<String>>,
    shutdown: AtomicBool,
    notify: Notify,
}

impl<F: PageStore> Runner<F> {
    /// Creates a runner using the system clock.
    pub fn new(log: Arc<AppLog<F>>, sensor: Box<dyn Sensor + Send>, settings: RunnerSettings) -> Self {
        Self {
            log,
            sensor: Mutex::new(sensor),
            settings,
            clock: Box::new(system_clock),
            ticks: AtomicU64::new(0),
            commits: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            last_error: Mutex::new(None),
            shutdown: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Replaces the clock.
    pub fn with_clock(mut self, clock: impl Fn() -> u32 + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn log(&self) -> &Arc<AppLog<F>> {
        &self.log
    }

    /// Runs a single tick at the current clock time.
    pub fn tick(&self) -> Result<ProcessStatus, LogError> {
        let now = (self.clock)();
        self.ticks.fetch_add(1, Ordering::Relaxed);

        let result = {
            let mut sensor = self.sensor.lock();
            self.log.process(now, &mut **sensor)
        };

        match &result {
            Ok(ProcessStatus::Committed(info)) => {
                self.commits.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    "Committed record to page {} (seq {}, {} samples{})",
                    info.page,
                    info.sequence,
                    info.num_samples,
                    info.reclaimed
                        .map(|p| format!(", reclaimed page {}", p))
                        .unwrap_or_default()
                );
            }
            Ok(ProcessStatus::Appended { num_samples }) => {
                tracing::debug!("Sample logged at {} ({} buffered)", now, num_samples);
            }
            Ok(ProcessStatus::NotDue) => {}
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                *self.last_error.lock() = Some(e.to_string());
                if e.is_retryable() {
                    tracing::warn!("Tick at {} failed: {}", now, e);
                } else {
                    tracing::error!("Tick at {} failed: {}", now, e);
                }
            }
        }

        result
    }

    /// Runs the tick loop (call from a background task).
    ///
    /// The open record is flushed when the loop stops.
    pub async fn run(&self) {
        tracing::info!("Runner started (tick_ms={})", self.settings.tick_ms);

        let mut interval = tokio::time::interval(self.settings.tick());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = interval.tick() => {}
            }

            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            let _ = self.tick();
        }

        match self.log.flush() {
            Ok(Some(info)) => tracing::info!(
                "Flushed {} buffered samples to page {}",
                info.num_samples,
                info.page
            ),
            Ok(None) => {}
            Err(e) => tracing::warn!("Flush on shutdown failed: {}", e),
        }

        tracing::info!("Runner stopped");
    }

    /// Signals the runner to shut down.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.notify.notify_one();
    }

    /// Returns runner statistics.
    pub fn stats(&self) -> RunnerStats {
        RunnerStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            last_error: self.last_error.lock().clone(),
        }
    }
}

/// Runner statistics.
#[derive(Debug, Clone, Default)]
pub struct RunnerStats {
    pub ticks: u64,
    pub commits: u64,
    pub errors: u64,
    pub last_error: Option<String>,
}
