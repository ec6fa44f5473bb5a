use crate::core::types::{Events, ThreadId};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Structure for a single log entry
#[derive(Debug, Serialize)]
pub struct LogEntry<'a> {
    /// Thread that performed the action
    pub thread_id: ThreadId,
    /// Semaphore or condition variable involved (0 for thread-only events)
    pub object_id: usize,
    /// Type of event that occurred
    pub event: Events,
    /// Active threads after the event
    pub active: usize,
    /// Per-thread blocked map after the event
    pub block_map: &'a str,
    /// Seconds since the Unix epoch, microsecond precision
    pub timestamp: f64,
}

/// Determines where the logger writes
#[derive(Debug)]
pub enum LoggerMode {
    /// Logging is disabled entirely
    Disabled,
    /// Log to standard error (verbose mode)
    Stderr,
    /// Log to the specified file
    ToFile(File),
}

/// Logger for recording tracker events
///
/// Writes happen synchronously on the calling thread: the tracker lives
/// inside someone else's process and must not start threads of its own.
#[derive(Debug)]
pub struct EventLogger {
    mode: LoggerMode,
}

impl Default for EventLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLogger {
    /// Create a new logger with logging disabled
    pub fn new() -> Self {
        EventLogger {
            mode: LoggerMode::Disabled,
        }
    }

    /// Create a new logger that writes to standard error
    pub fn stderr() -> Self {
        EventLogger {
            mode: LoggerMode::Stderr,
        }
    }

    /// Create a new logger that appends to the specified file
    pub fn with_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .context("Failed to open log file")?;

        Ok(EventLogger {
            mode: LoggerMode::ToFile(file),
        })
    }

    /// Check if logging is enabled
    pub fn is_enabled(&self) -> bool {
        !matches!(self.mode, LoggerMode::Disabled)
    }

    /// Log an event
    ///
    /// `block_map` is only evaluated when logging is enabled; rendering it
    /// walks every registered thread.
    pub fn log_event(
        &self,
        thread_id: ThreadId,
        object_id: usize,
        event: Events,
        active: usize,
        block_map: impl FnOnce() -> String,
    ) {
        // Early return if logging is disabled
        if let LoggerMode::Disabled = self.mode {
            return;
        }

        let now = Utc::now();
        let timestamp = now.timestamp() as f64 + now.timestamp_subsec_micros() as f64 / 1_000_000.0;
        let block_map = block_map();

        let entry = LogEntry {
            thread_id,
            object_id,
            event,
            active,
            block_map: &block_map,
            timestamp,
        };

        let Ok(json) = serde_json::to_string(&entry) else {
            return;
        };

        match &self.mode {
            LoggerMode::Disabled => {}
            LoggerMode::Stderr => {
                let _ = writeln!(std::io::stderr().lock(), "{json}");
            }
            LoggerMode::ToFile(file) => {
                let mut file = file;
                let _ = writeln!(file, "{json}");
                let _ = file.flush();
            }
        }
    }
}
