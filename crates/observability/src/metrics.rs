//! Peer sync metrics
//!
//! Records bucket, clock and transport metrics through the `metrics` facade
//! and keeps an in-memory aggregate for end-of-run summaries.

use std::collections::HashMap;

use contracts::TimeBucket;
use metrics::{counter, gauge, histogram};

/// Record metrics for an assembled bucket
///
/// Called once per aggregator tick.
///
/// # Example
///
/// ```ignore
/// let bucket = aggregator.tick(now, &active, plan);
/// observability::record_bucket(&bucket);
/// ```
pub fn record_bucket(bucket: &TimeBucket) {
    counter!("peer_sync_buckets_total").increment(1);
    gauge!("peer_sync_last_bucket_sequence").set(bucket.sequence as f64);

    if bucket.expected_devices() > 0 {
        histogram!("peer_sync_bucket_coverage_ratio").record(bucket.coverage());
    }

    if let Some(skew) = bucket.max_skew_ms() {
        histogram!("peer_sync_bucket_max_skew_ms").record(skew as f64);
    }

    gauge!("peer_sync_devices_missing").set(bucket.missing.len() as f64);
    for device_id in &bucket.missing {
        counter!("peer_sync_device_missing_total", "device_id" => device_id.to_string())
            .increment(1);
    }
}

/// Record a freshly applied clock offset
pub fn record_clock_offset(device_id: &str, offset_ms: i64) {
    gauge!("peer_sync_clock_offset_ms", "device_id" => device_id.to_string())
        .set(offset_ms as f64);
    counter!("peer_sync_clock_rounds_total", "device_id" => device_id.to_string()).increment(1);
}

/// Record a reading accepted by the coordinator
pub fn record_reading_received(device_id: &str, sensor_kind: &str) {
    counter!(
        "peer_sync_readings_received_total",
        "device_id" => device_id.to_string(),
        "sensor_kind" => sensor_kind.to_string()
    )
    .increment(1);
}

/// Record an inbound or outbound message that was dropped
pub fn record_message_dropped(reason: &str) {
    counter!("peer_sync_messages_dropped_total", "reason" => reason.to_string()).increment(1);
}

/// Record a bucket handed to a sink
pub fn record_bucket_dispatched(sink_name: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "peer_sync_buckets_dispatched_total",
        "sink" => sink_name.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record buffer depth for one device
pub fn record_buffer_depth(device_id: &str, depth: usize) {
    gauge!("peer_sync_buffer_depth", "device_id" => device_id.to_string()).set(depth as f64);
}

/// Bucket metrics aggregator
///
/// Aggregates in memory for summaries at the end of a run.
#[derive(Debug, Clone, Default)]
pub struct BucketMetricsAggregator {
    pub total_buckets: u64,

    /// Buckets where at least one active device had no match
    pub buckets_with_missing: u64,

    /// Per-bucket coverage (0-1)
    pub coverage_stats: RunningStats,

    /// Per-bucket max |reading - reference| (ms)
    pub skew_stats: RunningStats,

    pub matched_counts: HashMap<String, u64>,
    pub missing_counts: HashMap<String, u64>,
}

impl BucketMetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bucket: &TimeBucket) {
        self.total_buckets += 1;

        if !bucket.missing.is_empty() {
            self.buckets_with_missing += 1;
        }
        for device_id in &bucket.missing {
            *self.missing_counts.entry(device_id.to_string()).or_insert(0) += 1;
        }
        for device_id in bucket.per_device.keys() {
            *self.matched_counts.entry(device_id.to_string()).or_insert(0) += 1;
        }

        if bucket.expected_devices() > 0 {
            self.coverage_stats.push(bucket.coverage());
        }
        if let Some(skew) = bucket.max_skew_ms() {
            self.skew_stats.push(skew as f64);
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_buckets: self.total_buckets,
            buckets_with_missing: self.buckets_with_missing,
            missing_rate: if self.total_buckets > 0 {
                self.buckets_with_missing as f64 / self.total_buckets as f64 * 100.0
            } else {
                0.0
            },
            coverage: StatsSummary::from(&self.coverage_stats),
            max_skew_ms: StatsSummary::from(&self.skew_stats),
            device_matched_counts: self.matched_counts.clone(),
            device_missing_counts: self.missing_counts.clone(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Metrics summary
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub total_buckets: u64,
    pub buckets_with_missing: u64,
    pub missing_rate: f64,
    pub coverage: StatsSummary,
    pub max_skew_ms: StatsSummary,
    pub device_matched_counts: HashMap<String, u64>,
    pub device_missing_counts: HashMap<String, u64>,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Bucket Metrics Summary ===")?;
        writeln!(f, "Total buckets: {}", self.total_buckets)?;
        writeln!(
            f,
            "Buckets with missing devices: {} ({:.2}%)",
            self.buckets_with_missing, self.missing_rate
        )?;
        writeln!(f, "Coverage: {}", self.coverage)?;
        writeln!(f, "Max skew (ms): {}", self.max_skew_ms)?;

        let mut devices: Vec<_> = self
            .device_matched_counts
            .keys()
            .chain(self.device_missing_counts.keys())
            .collect();
        devices.sort();
        devices.dedup();
        if !devices.is_empty() {
            writeln!(f, "Per device (matched / missing):")?;
            for device in devices {
                writeln!(
                    f,
                    "  {}: {} / {}",
                    device,
                    self.device_matched_counts.get(device).unwrap_or(&0),
                    self.device_missing_counts.get(device).unwrap_or(&0)
                )?;
            }
        }

        Ok(())
    }
}

/// Statistics summary
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online statistics (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{DeviceId, ProcessedReading, SensorKind};

    fn bucket(sequence: u64, matched: &[(&str, i64)], missing: &[&str]) -> TimeBucket {
        TimeBucket {
            reference_time: 1_000,
            sequence,
            per_device: matched
                .iter()
                .map(|(id, ts)| {
                    (
                        DeviceId::from(*id),
                        ProcessedReading::new(*ts, SensorKind::Light, "raw", vec![1.0]),
                    )
                })
                .collect(),
            missing: missing.iter().map(|id| DeviceId::from(*id)).collect(),
        }
    }

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();

        stats.push(1.0);
        stats.push(2.0);
        stats.push(3.0);
        stats.push(4.0);
        stats.push(5.0);

        assert_eq!(stats.count(), 5);
        assert!((stats.mean() - 3.0).abs() < 1e-10);
        assert!((stats.min() - 1.0).abs() < 1e-10);
        assert!((stats.max() - 5.0).abs() < 1e-10);
        assert!((stats.variance() - 2.5).abs() < 1e-10);
    }

    #[test]
    fn test_aggregator_update() {
        let mut aggregator = BucketMetricsAggregator::new();

        aggregator.update(&bucket(1, &[("a", 990), ("b", 1_004)], &[]));
        aggregator.update(&bucket(2, &[("a", 1_000)], &["b"]));
        aggregator.update(&bucket(3, &[], &[]));

        let summary = aggregator.summary();
        assert_eq!(summary.total_buckets, 3);
        assert_eq!(summary.buckets_with_missing, 1);
        assert_eq!(summary.coverage.count, 2);
        assert!((summary.coverage.mean - 0.75).abs() < 1e-10);
        assert!((summary.max_skew_ms.max - 10.0).abs() < 1e-10);
        assert_eq!(summary.device_matched_counts.get("a"), Some(&2));
        assert_eq!(summary.device_missing_counts.get("b"), Some(&1));

        let text = summary.to_string();
        assert!(text.contains("Total buckets: 3"));
        assert!(text.contains("b: 1 / 1"));
    }

    #[test]
    fn test_aggregator_reset() {
        let mut aggregator = BucketMetricsAggregator::new();
        aggregator.update(&bucket(1, &[("a", 1_000)], &[]));
        aggregator.reset();
        assert_eq!(aggregator.total_buckets, 0);
        assert!(aggregator.matched_counts.is_empty());
    }

    #[test]
    fn test_recorders_without_exporter() {
        // Facade calls are no-ops without an installed recorder
        record_bucket(&bucket(1, &[("a", 1_000)], &["b"]));
        record_clock_offset("a", -2);
        record_reading_received("a", "light");
        record_message_dropped("parse");
        record_bucket_dispatched("log", true);
        record_buffer_depth("a", 3);
    }
}
