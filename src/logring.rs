//! In-memory log ring (C2)
//!
//! A `tracing` layer that mirrors every emitted record into a bounded FIFO
//! ring so recent history can be served over the API without touching disk.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

const RING_CAPACITY: usize = 500;

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub level: String,
    /// The `tracing` target, e.g. `awarr::downloader::queue`.
    pub category: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

struct RingInner {
    next_id: u64,
    entries: VecDeque<LogEntry>,
}

pub struct LogRing {
    inner: Mutex<RingInner>,
}

impl LogRing {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(RingInner {
                next_id: 1,
                entries: VecDeque::with_capacity(RING_CAPACITY),
            }),
        })
    }

    fn push(&self, level: &Level, category: &str, message: String, details: Option<String>) {
        let mut inner = self.inner.lock().unwrap();
        if inner.entries.len() >= RING_CAPACITY {
            inner.entries.pop_front();
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.push_back(LogEntry {
            id,
            timestamp: Utc::now(),
            level: level.to_string(),
            category: category.to_string(),
            message,
            details,
        });
    }

    /// Newest-last snapshot, optionally filtered by level and category prefix.
    pub fn entries(&self, level: Option<&str>, category: Option<&str>) -> Vec<LogEntry> {
        let inner = self.inner.lock().unwrap();
        inner
            .entries
            .iter()
            .filter(|e| level.map_or(true, |l| e.level.eq_ignore_ascii_case(l)))
            .filter(|e| category.map_or(true, |c| e.category.starts_with(c)))
            .cloned()
            .collect()
    }

}

/// `tracing_subscriber` layer feeding the ring.
pub struct LogRingLayer {
    ring: Arc<LogRing>,
}

impl LogRingLayer {
    pub fn new(ring: Arc<LogRing>) -> Self {
        Self { ring }
    }
}

impl<S: Subscriber> Layer<S> for LogRingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldCollector::default();
        event.record(&mut visitor);
        self.ring.push(
            event.metadata().level(),
            event.metadata().target(),
            visitor.message,
            if visitor.details.is_empty() {
                None
            } else {
                Some(visitor.details)
            },
        );
    }
}

#[derive(Default)]
struct FieldCollector {
    message: String,
    details: String,
}

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            if !self.details.is_empty() {
                self.details.push_str(", ");
            }
            let _ = write!(self.details, "{}={:?}", field.name(), value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            if !self.details.is_empty() {
                self.details.push_str(", ");
            }
            let _ = write!(self.details, "{}={}", field.name(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_is_bounded_fifo() {
        let ring = LogRing::new();
        for i in 0..(RING_CAPACITY + 25) {
            ring.push(&Level::INFO, "awarr::test", format!("entry {}", i), None);
        }
        let entries = ring.entries(None, None);
        assert_eq!(entries.len(), RING_CAPACITY);
        // The oldest 25 entries were evicted.
        assert_eq!(entries.first().unwrap().message, "entry 25");
        assert_eq!(
            entries.last().unwrap().message,
            format!("entry {}", RING_CAPACITY + 24)
        );
    }

    #[test]
    fn filters_by_level_and_category() {
        let ring = LogRing::new();
        ring.push(&Level::INFO, "awarr::sonarr", "a".into(), None);
        ring.push(&Level::WARN, "awarr::sonarr", "b".into(), None);
        ring.push(&Level::WARN, "awarr::downloader", "c".into(), None);

        assert_eq!(ring.entries(Some("warn"), None).len(), 2);
        assert_eq!(ring.entries(Some("warn"), Some("awarr::sonarr")).len(), 1);
        assert_eq!(ring.entries(None, Some("awarr::")).len(), 3);
    }

    #[test]
    fn ids_are_monotonic() {
        let ring = LogRing::new();
        ring.push(&Level::INFO, "t", "x".into(), None);
        ring.push(&Level::INFO, "t", "y".into(), None);
        let entries = ring.entries(None, None);
        assert!(entries[0].id < entries[1].id);
    }
}
