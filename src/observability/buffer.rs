//! Bounded in-memory log history.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::observability::logging::LogEntry;

/// Entries kept for history replay.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1000;

/// Fixed-capacity ring of the most recent entries. The oldest entry is
/// evicted on overflow.
pub struct LogBuffer {
    entries: Mutex<VecDeque<Arc<LogEntry>>>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, entry: Arc<LogEntry>) {
        if self.capacity == 0 {
            return;
        }
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Matching entries, oldest first.
    pub fn snapshot<F>(&self, mut accept: F) -> Vec<Arc<LogEntry>>
    where
        F: FnMut(&LogEntry) -> bool,
    {
        match self.entries.lock() {
            Ok(entries) => entries
                .iter()
                .filter(|entry| {
                    let entry: &LogEntry = entry;
                    accept(entry)
                })
                .cloned()
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}
