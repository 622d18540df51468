//! Progress/log sink
//!
//! The joiner reports progress through [`LogSink::append`]. Sinks are
//! append-only and may be written from the background join thread; the
//! display surface ([`LogConsole`]) is owned by the foreground.

use chrono::{DateTime, Local};
use std::sync::Mutex;
use tracing::info;

/// One log console line
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub at: DateTime<Local>,
    pub message: String,
}

impl LogEntry {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            at: Local::now(),
            message: message.into(),
        }
    }

    /// `HH:MM:SS message`, the console rendering
    pub fn render(&self) -> String {
        format!("{} {}", self.at.format("%H:%M:%S"), self.message)
    }
}

pub trait LogSink: Send + Sync {
    fn append(&self, entry: LogEntry);

    fn log(&self, message: String) {
        self.append(LogEntry::now(message));
    }
}

/// Headless sink: every message goes to `tracing` only
pub struct TracingSink;

impl LogSink for TracingSink {
    fn append(&self, entry: LogEntry) {
        info!(target: "towel_joiner::console", "{}", entry.message);
    }
}

/// Collects entries in memory
#[derive(Default)]
pub struct MemorySink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|e| e.iter().map(|l| l.message.clone()).collect())
            .unwrap_or_default()
    }
}

impl LogSink for MemorySink {
    fn append(&self, entry: LogEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}

/// Foreground-owned console buffer. Append-only; readers track how much they
/// have already displayed with a cursor.
#[derive(Debug, Default)]
pub struct LogConsole {
    entries: Vec<LogEntry>,
}

impl LogConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Entries appended after `cursor`
    pub fn since(&self, cursor: usize) -> &[LogEntry] {
        &self.entries[cursor.min(self.entries.len())..]
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.entries.iter().any(|e| e.message.contains(needle))
    }
}
