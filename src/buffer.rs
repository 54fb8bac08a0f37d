//! Bounded rolling context buffer shared by every ingest.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

/// Default number of records retained in the context window.
pub const DEFAULT_CAPACITY: usize = 100;

/// One normalized line of log text and the time its ingest arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl LogRecord {
    pub fn new(text: impl Into<String>, received_at: DateTime<Utc>) -> Self {
        Self {
            text: text.into(),
            received_at,
        }
    }

    /// Stamp every record of one ingest with the same arrival time.
    pub fn batch(texts: Vec<String>, received_at: DateTime<Utc>) -> Vec<LogRecord> {
        texts
            .into_iter()
            .map(|text| LogRecord { text, received_at })
            .collect()
    }
}

/// FIFO ring of the most recent records.  Capacity is fixed at
/// construction; the oldest record is evicted once it is exceeded.
#[derive(Debug)]
pub struct ContextBuffer {
    capacity: usize,
    inner: Mutex<VecDeque<LogRecord>>,
}

impl ContextBuffer {
    /// Panics if `capacity` is zero; configuration rejects that earlier.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "context buffer capacity must be positive");
        Self {
            capacity,
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn append(&self, records: Vec<LogRecord>) {
        let mut guard = self.lock();
        self.push_all(&mut guard, records);
    }

    /// Owned copy of the buffered text, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        Self::texts(&self.lock())
    }

    /// Append and snapshot inside a single critical section so the returned
    /// window never reflects a half-applied append from another ingest.
    pub fn append_and_snapshot(&self, records: Vec<LogRecord>) -> Vec<String> {
        let mut guard = self.lock();
        self.push_all(&mut guard, records);
        Self::texts(&guard)
    }

    /// Empty the buffer, returning how many records were dropped.
    pub fn clear(&self) -> usize {
        let mut guard = self.lock();
        let dropped = guard.len();
        guard.clear();
        dropped
    }

    fn push_all(&self, buf: &mut VecDeque<LogRecord>, records: Vec<LogRecord>) {
        for record in records {
            buf.push_back(record);
            while buf.len() > self.capacity {
                buf.pop_front();
            }
        }
    }

    fn texts(buf: &VecDeque<LogRecord>) -> Vec<String> {
        buf.iter().map(|r| r.text.clone()).collect()
    }

    // VecDeque operations cannot leave the deque half-updated, so a
    // poisoned lock is safe to keep using.
    fn lock(&self) -> MutexGuard<'_, VecDeque<LogRecord>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ContextBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
