//! Bounded in-memory log buffers, one per script name.
//!
//! Backs `GET /scripts/:id/logs`. Records are process-local and lost on
//! restart; the sandbox's rate limiter decides what reaches this store.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use parking_lot::Mutex;

use keyrelay_core::{ScriptLogRecord, ScriptLogSink};

const DEFAULT_CAPACITY: usize = 256;

/// Ring buffer of recent adapter log records, keyed by script name.
pub struct ScriptLogStore {
    buffers: Mutex<HashMap<String, VecDeque<ScriptLogRecord>>>,
    capacity: usize,
}

impl ScriptLogStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Append one record, evicting the oldest when the buffer is full.
    pub fn push(&self, script_name: &str, level: &str, message: &str) {
        let mut buffers = self.buffers.lock();
        let buffer = buffers
            .entry(script_name.to_string())
            .or_insert_with(VecDeque::new);
        if buffer.len() == self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(ScriptLogRecord {
            timestamp: Utc::now(),
            level: level.to_string(),
            message: message.to_string(),
        });
    }

    /// Drop the buffer for a script (called when its entry is deleted).
    pub fn remove(&self, script_name: &str) {
        self.buffers.lock().remove(script_name);
    }
}

impl Default for ScriptLogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptLogSink for ScriptLogStore {
    fn records(&self, script_name: &str) -> Vec<ScriptLogRecord> {
        self.buffers
            .lock()
            .get(script_name)
            .map(|buffer| buffer.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_read_back_in_order() {
        let store = ScriptLogStore::with_capacity(4);
        store.push("grok", "info", "first");
        store.push("grok", "warn", "second");

        let records = store.records("grok");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].message, "first");
        assert_eq!(records[1].level, "warn");
        assert!(store.records("other").is_empty());
    }

    #[test]
    fn capacity_evicts_oldest() {
        let store = ScriptLogStore::with_capacity(2);
        store.push("grok", "info", "a");
        store.push("grok", "info", "b");
        store.push("grok", "info", "c");

        let records = store.records("grok");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].message, "b");
        assert_eq!(records[1].message, "c");
    }
}
