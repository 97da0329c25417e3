//! Bounded log of provider failures.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::ErrorKind;

/// Maximum records kept per chain.
pub const DEFAULT_CAPACITY: usize = 50;

/// Records older than this are purged on the next write.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Records younger than this are reported as recent.
pub const DEFAULT_RECENT_WINDOW: Duration = Duration::from_secs(5 * 60);

/// One failed provider attempt.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub provider: String,
    pub kind: ErrorKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) recorded_at: Instant,
}

/// Ring buffer of [`ErrorRecord`]s; the oldest record is overwritten when full.
#[derive(Debug)]
pub struct ErrorLog {
    entries: VecDeque<ErrorRecord>,
    capacity: usize,
    retention: Duration,
    recent_window: Duration,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_CAPACITY, DEFAULT_RETENTION, DEFAULT_RECENT_WINDOW)
    }

    pub fn with_limits(capacity: usize, retention: Duration, recent_window: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            retention,
            recent_window,
        }
    }

    pub fn record(&mut self, record: ErrorRecord) {
        let now = record.recorded_at;
        self.entries
            .retain(|entry| now.saturating_duration_since(entry.recorded_at) < self.retention);

        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(record);
    }

    /// Records within the recent window, oldest first.
    pub fn recent(&self, now: Instant) -> Vec<ErrorRecord> {
        self.entries
            .iter()
            .filter(|entry| now.saturating_duration_since(entry.recorded_at) < self.recent_window)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::new()
    }
}
