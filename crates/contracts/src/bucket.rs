//! TimeBucket - Aggregator output
//!
//! One reconstructed cross-device snapshot for a single reference instant.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{DeviceId, ProcessedReading, Timestamp};

/// Cross-device snapshot
///
/// Contains, per active device, the reading closest to `reference_time`
/// within the staleness threshold. Devices without such a reading are only
/// listed in `missing`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeBucket {
    /// Reference instant on the coordinator clock (ms)
    pub reference_time: Timestamp,

    /// Bucket sequence number (monotonically increasing per aggregator)
    pub sequence: u64,

    /// Matched readings (device_id -> reading)
    pub per_device: HashMap<DeviceId, ProcessedReading>,

    /// Active devices that had no match this tick
    pub missing: Vec<DeviceId>,
}

impl TimeBucket {
    /// Number of devices that were asked for a match
    pub fn expected_devices(&self) -> usize {
        self.per_device.len() + self.missing.len()
    }

    /// Fraction of asked devices that matched, 0-1
    pub fn coverage(&self) -> f64 {
        let expected = self.expected_devices();
        if expected == 0 {
            0.0
        } else {
            self.per_device.len() as f64 / expected as f64
        }
    }

    /// Largest |reading.timestamp - reference_time| across matched devices
    pub fn max_skew_ms(&self) -> Option<i64> {
        self.per_device
            .values()
            .map(|reading| (reading.timestamp - self.reference_time).abs())
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SensorKind;

    #[test]
    fn test_coverage_and_skew() {
        let mut bucket = TimeBucket {
            reference_time: 1000,
            sequence: 1,
            ..Default::default()
        };
        assert_eq!(bucket.coverage(), 0.0);
        assert_eq!(bucket.max_skew_ms(), None);

        bucket.per_device.insert(
            "a".into(),
            ProcessedReading::new(990, SensorKind::Light, "raw", vec![1.0]),
        );
        bucket.per_device.insert(
            "b".into(),
            ProcessedReading::new(1004, SensorKind::Light, "raw", vec![2.0]),
        );
        bucket.missing.push("c".into());
        bucket.missing.push("d".into());

        assert_eq!(bucket.expected_devices(), 4);
        assert!((bucket.coverage() - 0.5).abs() < f64::EPSILON);
        assert_eq!(bucket.max_skew_ms(), Some(10));
    }
}
