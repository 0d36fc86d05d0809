//! Captured response bodies
//!
//! Opt-in record of what the API answered, written next to the report for
//! debugging failed runs. Bounded so long runs cannot grow it without limit.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::http::HttpResponse;

pub const DEFAULT_JOURNAL_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    pub iteration: u64,
    pub step: String,
    pub url: String,
    pub status_code: u16,
    pub response_body: Value,
}

#[derive(Debug)]
pub struct ResponseJournal {
    entries: Mutex<Vec<JournalEntry>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl Default for ResponseJournal {
    fn default() -> Self {
        Self::new(DEFAULT_JOURNAL_CAPACITY)
    }
}

impl ResponseJournal {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn record(&self, iteration: u64, step: &str, url: &str, response: &HttpResponse) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        entries.push(JournalEntry {
            timestamp: Utc::now(),
            iteration,
            step: step.to_string(),
            url: url.to_string(),
            status_code: response.status,
            response_body: response
                .json()
                .cloned()
                .unwrap_or_else(|| Value::String(response.body.clone())),
        });
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().clone()
    }

    /// Entries not kept because the journal was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&*self.entries.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_is_enforced() {
        let journal = ResponseJournal::new(2);
        let response = HttpResponse::new(200, r#"{"ok":true}"#);
        for i in 0..5 {
            journal.record(i, "get_token", "http://api/auth", &response);
        }
        assert_eq!(journal.entries().len(), 2);
        assert_eq!(journal.dropped(), 3);
    }

    #[test]
    fn test_non_json_body_is_kept_as_text() {
        let journal = ResponseJournal::default();
        journal.record(0, "upload_file", "http://api/up", &HttpResponse::new(502, "bad gateway"));
        let entries = journal.entries();
        assert_eq!(entries[0].response_body, Value::String("bad gateway".into()));
        assert_eq!(entries[0].status_code, 502);
    }
}
