//! Time-alignment matcher.
//!
//! Picks, from one device's buffered samples, the one captured closest to
//! a reference instant.

use contracts::{DeviceStatus, Millis, Sample, SensorKind, Timestamp};

/// Nearest sample to `reference` among `candidates`.
///
/// Only samples of `sensor_kind` captured while the device was not idle are
/// considered. Ties go to the earliest candidate in slice order. Returns
/// `None` when nothing qualifies or the best distance exceeds
/// `max_threshold`.
pub fn find_nearest(
    reference: Timestamp,
    candidates: &[Sample],
    sensor_kind: SensorKind,
    max_threshold: Millis,
) -> Option<&Sample> {
    candidates
        .iter()
        .filter(|sample| {
            sample.reading.sensor_kind == sensor_kind && sample.status != DeviceStatus::Idle
        })
        .min_by_key(|sample| distance(sample, reference))
        .filter(|sample| distance(sample, reference) <= max_threshold)
}

fn distance(sample: &Sample, reference: Timestamp) -> Millis {
    (sample.timestamp() - reference).abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::ProcessedReading;

    fn sample(timestamp: Timestamp, kind: SensorKind, status: DeviceStatus) -> Sample {
        Sample::new(
            "a".into(),
            status,
            ProcessedReading::new(timestamp, kind, "raw", vec![timestamp as f64]),
        )
    }

    fn active(timestamps: &[Timestamp]) -> Vec<Sample> {
        timestamps
            .iter()
            .map(|ts| sample(*ts, SensorKind::Light, DeviceStatus::Active))
            .collect()
    }

    #[test]
    fn test_nearest_within_threshold() {
        let candidates = active(&[90, 100, 120]);
        let found = find_nearest(105, &candidates, SensorKind::Light, 8).unwrap();
        assert_eq!(found.timestamp(), 100);
    }

    #[test]
    fn test_nearest_beyond_threshold() {
        let candidates = active(&[90, 100, 120]);
        assert!(find_nearest(105, &candidates, SensorKind::Light, 3).is_none());
    }

    #[test]
    fn test_boundary_distance_is_accepted() {
        let candidates = active(&[100]);
        assert!(find_nearest(105, &candidates, SensorKind::Light, 5).is_some());
        assert!(find_nearest(105, &candidates, SensorKind::Light, 4).is_none());
    }

    #[test]
    fn test_idle_samples_excluded_even_if_closest() {
        let candidates = vec![
            sample(104, SensorKind::Light, DeviceStatus::Idle),
            sample(110, SensorKind::Light, DeviceStatus::Active),
        ];
        let found = find_nearest(105, &candidates, SensorKind::Light, 20).unwrap();
        assert_eq!(found.timestamp(), 110);

        let only_idle = vec![sample(105, SensorKind::Light, DeviceStatus::Idle)];
        assert!(find_nearest(105, &only_idle, SensorKind::Light, 20).is_none());
    }

    #[test]
    fn test_kind_mismatch_excluded() {
        let candidates = vec![
            sample(105, SensorKind::Microphone, DeviceStatus::Active),
            sample(111, SensorKind::Light, DeviceStatus::Active),
        ];
        let found = find_nearest(105, &candidates, SensorKind::Light, 20).unwrap();
        assert_eq!(found.timestamp(), 111);
    }

    #[test]
    fn test_tie_goes_to_first_inserted() {
        let candidates = active(&[110, 100]);
        let found = find_nearest(105, &candidates, SensorKind::Light, 10).unwrap();
        assert_eq!(found.timestamp(), 110);
    }

    #[test]
    fn test_empty_candidates() {
        assert!(find_nearest(0, &[], SensorKind::Light, 1000).is_none());
    }
}
