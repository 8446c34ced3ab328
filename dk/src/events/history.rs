//! Emission history and slow-dispatch diagnostics

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

/// Bounded FIFO; pushing past capacity evicts the oldest entry
#[derive(Debug, Clone)]
pub struct Ring<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> Ring<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, entry: T) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Oldest first
    pub fn to_vec(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }
}

/// One recorded emission
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub sequence: u64,
    pub event: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

/// A dispatch pass that took longer than the slow threshold
#[derive(Debug, Clone, Serialize)]
pub struct SlowDispatch {
    pub event: String,
    pub listeners: usize,
    pub elapsed_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

/// Slow-dispatch records pruned to a retention window
#[derive(Debug)]
pub(crate) struct Diagnostics {
    threshold: Duration,
    retention: Duration,
    entries: VecDeque<(Instant, SlowDispatch)>,
}

impl Diagnostics {
    pub fn new(threshold: Duration, retention: Duration) -> Self {
        Self {
            threshold,
            retention,
            entries: VecDeque::new(),
        }
    }

    /// Record the pass if it crossed the threshold; returns whether it did
    pub fn observe(&mut self, event: &str, listeners: usize, elapsed: Duration) -> bool {
        let now = Instant::now();
        self.prune(now);
        if elapsed <= self.threshold {
            return false;
        }
        self.entries.push_back((
            now,
            SlowDispatch {
                event: event.to_string(),
                listeners,
                elapsed_ms: elapsed.as_millis() as u64,
                recorded_at: Utc::now(),
            },
        ));
        true
    }

    pub fn snapshot(&mut self) -> Vec<SlowDispatch> {
        self.prune(Instant::now());
        self.entries.iter().map(|(_, d)| d.clone()).collect()
    }

    fn prune(&mut self, now: Instant) {
        while let Some((at, _)) = self.entries.front() {
            if now.duration_since(*at) > self.retention {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }
}
