//! Run counters and the traversal page cursor
//!
//! All counters share one critical section so a snapshot always reflects a
//! consistent ordering of increments across worker threads.

use parking_lot::Mutex;
use serde::Serialize;

/// Named monotonic counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    ExtractedDocs,
    Processed,
    Migrated,
    New,
    Skipped,
    Replaced,
    Failed,
}

/// Point-in-time copy of every counter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub extracted_docs: u64,
    pub processed: u64,
    pub migrated: u64,
    pub new: u64,
    pub skipped: u64,
    pub replaced: u64,
    pub failed: u64,
    pub page_index: u64,
}

impl CounterSnapshot {
    fn slot(&mut self, kind: CounterKind) -> &mut u64 {
        match kind {
            CounterKind::ExtractedDocs => &mut self.extracted_docs,
            CounterKind::Processed => &mut self.processed,
            CounterKind::Migrated => &mut self.migrated,
            CounterKind::New => &mut self.new,
            CounterKind::Skipped => &mut self.skipped,
            CounterKind::Replaced => &mut self.replaced,
            CounterKind::Failed => &mut self.failed,
        }
    }
}

/// Counters shared by every worker of a run
#[derive(Debug, Default)]
pub struct Counters {
    values: Mutex<CounterSnapshot>,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter, returning its value before the increment
    pub fn increment(&self, kind: CounterKind) -> u64 {
        let mut values = self.values.lock();
        let slot = values.slot(kind);
        let previous = *slot;
        *slot += 1;
        previous
    }

    /// Increment several counters in one critical section
    pub fn increment_all(&self, kinds: &[CounterKind]) {
        let mut values = self.values.lock();
        for kind in kinds {
            *values.slot(*kind) += 1;
        }
    }

    pub fn get(&self, kind: CounterKind) -> u64 {
        *self.values.lock().slot(kind)
    }

    /// Advance the page cursor, returning the page to fetch
    pub fn increase_page_index(&self) -> u64 {
        let mut values = self.values.lock();
        let previous = values.page_index;
        values.page_index += 1;
        previous
    }

    pub fn page_index(&self) -> u64 {
        self.values.lock().page_index
    }

    /// Only called when the traversal moves to another folder
    pub(crate) fn reset_page_index(&self) {
        self.values.lock().page_index = 0;
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        *self.values.lock()
    }
}
