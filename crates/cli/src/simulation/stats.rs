//! Run statistics.

use std::time::Duration;

use contracts::{DeviceStatus, Millis, SensorKind, UnavailableReason};
use dispatcher::MetricsSnapshot;
use observability::BucketMetricsAggregator;
use serde::Serialize;

/// What one simulated peer ended up with
#[derive(Debug, Clone, Serialize)]
pub struct PeerReport {
    pub name: String,
    /// Configured wall-clock lead over the coordinator (ms)
    pub configured_skew_ms: Millis,
    /// Offset the participant converged to (ms)
    pub estimated_offset_ms: Millis,
    pub completed_rounds: u64,
    pub status: DeviceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unavailable: Option<(SensorKind, UnavailableReason)>,
}

impl PeerReport {
    /// |estimated - configured|
    pub fn offset_error_ms(&self) -> Millis {
        (self.estimated_offset_ms - self.configured_skew_ms).abs()
    }
}

/// Statistics from a run
#[derive(Debug, Clone, Default)]
pub struct SimulationStats {
    /// Measurement duration
    pub duration: Duration,

    /// Buckets produced by the aggregator
    pub buckets: u64,

    pub peers: Vec<PeerReport>,

    /// Per-sink dispatch counters
    pub sinks: Vec<(String, MetricsSnapshot)>,

    /// Bucket coverage and skew
    pub bucket_metrics: BucketMetricsAggregator,
}

impl SimulationStats {
    /// Buckets per second
    pub fn bucket_rate(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.buckets as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                       Run Statistics                         ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("📊 Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Buckets: {}", self.buckets);
        println!("   ├─ Buckets/s: {:.2}", self.bucket_rate());
        println!("   └─ Peers: {}", self.peers.len());

        if !self.peers.is_empty() {
            println!("\n⏱  Clock Offsets");
            for (i, peer) in self.peers.iter().enumerate() {
                let prefix = if i == self.peers.len() - 1 { "└─" } else { "├─" };
                print!(
                    "   {} {}: estimated {} ms, configured {} ms, error {} ms ({} rounds, {:?})",
                    prefix,
                    peer.name,
                    peer.estimated_offset_ms,
                    peer.configured_skew_ms,
                    peer.offset_error_ms(),
                    peer.completed_rounds,
                    peer.status
                );
                match peer.unavailable {
                    Some((kind, reason)) => println!(" [{kind} unavailable: {reason:?}]"),
                    None => println!(),
                }
            }
        }

        if !self.sinks.is_empty() {
            println!("\n📤 Sinks");
            for (i, (name, snapshot)) in self.sinks.iter().enumerate() {
                let prefix = if i == self.sinks.len() - 1 { "└─" } else { "├─" };
                println!(
                    "   {} {}: written {}, failed {}, dropped {} ({:.1}% delivered, last #{})",
                    prefix,
                    name,
                    snapshot.write_count,
                    snapshot.failure_count,
                    snapshot.dropped_count,
                    snapshot.delivery_ratio() * 100.0,
                    snapshot.last_sequence
                );
            }
        }

        println!("\n{}", self.bucket_metrics.summary());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_error_and_rate() {
        let report = PeerReport {
            name: "a".into(),
            configured_skew_ms: 250,
            estimated_offset_ms: 247,
            completed_rounds: 4,
            status: DeviceStatus::Idle,
            unavailable: None,
        };
        assert_eq!(report.offset_error_ms(), 3);

        let stats = SimulationStats {
            duration: Duration::from_secs(2),
            buckets: 10,
            ..Default::default()
        };
        assert!((stats.bucket_rate() - 5.0).abs() < f64::EPSILON);
        assert_eq!(SimulationStats::default().bucket_rate(), 0.0);
    }
}
