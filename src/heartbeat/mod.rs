use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Local};

use crate::config::HeartbeatConfig;
use crate::journal::Journal;
use crate::logging::Logger;
use crate::shutdown::ShutdownFlag;

pub const TIMESTAMP_PREFIX: &str = "timestamp:";
pub const TIMESTAMP_PATTERN: &str = "%a, %d %b %Y %H:%M:%S %z";
pub const MIN_INTERVAL_MS: u64 = 100;

/// Upper bound on one uninterrupted sleep, so shutdown latency stays bounded
/// regardless of the configured interval.
const SLEEP_SLICE: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub enum HeartbeatError {
    InvalidInterval { provided_ms: u64 },
    AlreadyRunning,
    JoinFailed,
}

impl fmt::Display for HeartbeatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInterval { provided_ms } => write!(
                f,
                "heartbeat interval must be at least {MIN_INTERVAL_MS}ms, got {provided_ms}ms"
            ),
            Self::AlreadyRunning => write!(f, "heartbeat is already running"),
            Self::JoinFailed => write!(f, "heartbeat worker thread join failed"),
        }
    }
}

impl std::error::Error for HeartbeatError {}

/// Single background worker appending one timestamp line to the journal per
/// interval. Observes the process-wide shutdown flag between sleep slices
/// and exits promptly once it is set.
pub struct Heartbeat {
    interval: Duration,
    journal: Arc<Journal>,
    logger: Arc<Logger>,
    shutdown: ShutdownFlag,
    worker: Option<JoinHandle<()>>,
}

impl Heartbeat {
    pub fn new(
        journal: Arc<Journal>,
        logger: Arc<Logger>,
        shutdown: ShutdownFlag,
        config: HeartbeatConfig,
    ) -> Result<Self, HeartbeatError> {
        if config.interval_ms < MIN_INTERVAL_MS {
            return Err(HeartbeatError::InvalidInterval {
                provided_ms: config.interval_ms,
            });
        }

        Ok(Self {
            interval: Duration::from_millis(config.interval_ms),
            journal,
            logger,
            shutdown,
            worker: None,
        })
    }

    pub fn start(&mut self) -> Result<(), HeartbeatError> {
        if self.worker.is_some() {
            return Err(HeartbeatError::AlreadyRunning);
        }

        let interval = self.interval;
        let journal = Arc::clone(&self.journal);
        let logger = Arc::clone(&self.logger);
        let shutdown = self.shutdown.clone();

        self.worker = Some(thread::spawn(move || {
            loop {
                if !sleep_observing(&shutdown, interval) {
                    break;
                }

                let line = format_timestamp_line(Local::now());
                if let Err(error) = journal.append(line.as_bytes()) {
                    logger.warn(
                        Some("heartbeat"),
                        &format!("timestamp append failed: {error}"),
                    );
                }
            }
        }));

        Ok(())
    }

    /// Joins the worker. Callers set the shutdown flag first; the worker
    /// observes it within one sleep slice.
    pub fn stop(&mut self) -> Result<(), HeartbeatError> {
        if let Some(handle) = self.worker.take() {
            return handle.join().map_err(|_| HeartbeatError::JoinFailed);
        }

        Ok(())
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        if self.shutdown.is_set() {
            if let Some(handle) = self.worker.take() {
                let _ = handle.join();
            }
        }
    }
}

pub fn format_timestamp_line(now: DateTime<Local>) -> String {
    format!("{TIMESTAMP_PREFIX}{}\n", now.format(TIMESTAMP_PATTERN))
}

/// Sleeps `total` in bounded slices, checking the flag between slices.
/// Returns false as soon as the flag is observed set.
fn sleep_observing(shutdown: &ShutdownFlag, total: Duration) -> bool {
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if shutdown.is_set() {
            return false;
        }
        let slice = remaining.min(SLEEP_SLICE);
        thread::sleep(slice);
        remaining = remaining.saturating_sub(slice);
    }
    !shutdown.is_set()
}
