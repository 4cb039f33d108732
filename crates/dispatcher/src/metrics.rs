//! Per-sink delivery accounting

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Fate of one bucket offered to a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Written,
    Failed,
    /// Queue was full when the bucket was offered
    Dropped,
}

/// Counters shared by a sink's handle and its worker
#[derive(Debug, Default)]
pub struct SinkMetrics {
    queue_len: AtomicUsize,
    written: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    /// Highest sequence written so far
    last_sequence: AtomicU64,
}

impl SinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: Outcome, sequence: u64) {
        let counter = match outcome {
            Outcome::Written => {
                self.last_sequence.fetch_max(sequence, Ordering::Relaxed);
                &self.written
            }
            Outcome::Failed => &self.failed,
            Outcome::Dropped => &self.dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
    }

    pub fn queue_len(&self) -> usize {
        self.queue_len.load(Ordering::Relaxed)
    }

    pub fn write_count(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_len: self.queue_len(),
            write_count: self.write_count(),
            failure_count: self.failure_count(),
            dropped_count: self.dropped_count(),
            last_sequence: self.last_sequence.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SinkMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MetricsSnapshot {
    pub queue_len: usize,
    pub write_count: u64,
    pub failure_count: u64,
    pub dropped_count: u64,
    /// 0 until the first successful write
    pub last_sequence: u64,
}

impl MetricsSnapshot {
    /// Buckets offered to the sink, whatever became of them
    pub fn offered(&self) -> u64 {
        self.write_count + self.failure_count + self.dropped_count
    }

    /// Share of offered buckets that were written, 0-1
    pub fn delivery_ratio(&self) -> f64 {
        match self.offered() {
            0 => 1.0,
            offered => self.write_count as f64 / offered as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcomes_land_in_their_counters() {
        let metrics = SinkMetrics::new();
        metrics.record(Outcome::Written, 7);
        metrics.record(Outcome::Written, 5);
        metrics.record(Outcome::Failed, 8);
        metrics.record(Outcome::Dropped, 9);
        metrics.set_queue_len(3);

        assert_eq!(
            metrics.snapshot(),
            MetricsSnapshot {
                queue_len: 3,
                write_count: 2,
                failure_count: 1,
                dropped_count: 1,
                last_sequence: 7,
            }
        );
    }

    #[test]
    fn test_delivery_ratio() {
        assert_eq!(MetricsSnapshot::default().delivery_ratio(), 1.0);

        let snapshot = MetricsSnapshot {
            write_count: 3,
            dropped_count: 1,
            ..Default::default()
        };
        assert_eq!(snapshot.offered(), 4);
        assert!((snapshot.delivery_ratio() - 0.75).abs() < f64::EPSILON);
    }
}
