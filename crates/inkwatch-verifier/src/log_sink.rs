//! Append-only diagnostic log for the verification engine
//!
//! Every engine transition lands here in insertion order. Entries are never
//! reordered or deduplicated; callers read the tail with [`LogSink::recent`]
//! and trim with [`LogSink::clear`].

use inkwatch_core::{LogEntry, LogLevel};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{error, info, warn};

/// Timestamped record of engine events
#[derive(Debug, Default)]
pub struct LogSink {
    entries: Mutex<Vec<LogEntry>>,
    verbose: AtomicBool,
}

impl LogSink {
    /// Create a sink; `verbose` mirrors each entry to `tracing`
    pub fn new(verbose: bool) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            verbose: AtomicBool::new(verbose),
        }
    }

    pub fn set_verbose(&self, verbose: bool) {
        self.verbose.store(verbose, Ordering::Relaxed);
    }

    /// Append an entry
    pub fn record(&self, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry::new(level, message);

        if self.verbose.load(Ordering::Relaxed) {
            match level {
                LogLevel::Info => info!("{}", entry.message),
                LogLevel::Warn => warn!("{}", entry.message),
                LogLevel::Error => error!("{}", entry.message),
            }
        }

        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.record(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.record(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.record(LogLevel::Error, message);
    }

    /// The last `count` entries, or all of them when `count` is `None` or zero
    pub fn recent(&self, count: Option<usize>) -> Vec<LogEntry> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match count {
            Some(n) if n > 0 => entries[entries.len().saturating_sub(n)..].to_vec(),
            _ => entries.clone(),
        }
    }

    /// Drop all entries, then record that the log was cleared
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.info("Logs cleared");
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
