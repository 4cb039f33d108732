//! ProcessedReading - sensor output after processing
//!
//! What a sensor pipeline hands to the core, and what the coordinator buffers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{DeviceId, DeviceStatus, Timestamp};

/// Sensor kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Accelerometer,
    Gyroscope,
    Magnetometer,
    Barometer,
    Light,
    Microphone,
}

impl SensorKind {
    /// All known kinds, in declaration order
    pub const ALL: [SensorKind; 6] = [
        SensorKind::Accelerometer,
        SensorKind::Gyroscope,
        SensorKind::Magnetometer,
        SensorKind::Barometer,
        SensorKind::Light,
        SensorKind::Microphone,
    ];

    /// Sensor-specific send interval, if the kind dictates one.
    ///
    /// `None` means the interval requested by the coordinator is used.
    pub fn default_interval_ms(self) -> Option<u64> {
        match self {
            SensorKind::Microphone => Some(100),
            SensorKind::Barometer => Some(500),
            _ => None,
        }
    }

    /// Processing tag produced by the default pipeline for this kind
    pub fn default_tag(self) -> &'static str {
        match self {
            SensorKind::Microphone => "sound_pressure",
            SensorKind::Accelerometer | SensorKind::Gyroscope => "minmax",
            _ => "raw",
        }
    }

    /// Snake-case name, as used in config files and on the command line
    pub fn as_str(self) -> &'static str {
        match self {
            SensorKind::Accelerometer => "accelerometer",
            SensorKind::Gyroscope => "gyroscope",
            SensorKind::Magnetometer => "magnetometer",
            SensorKind::Barometer => "barometer",
            SensorKind::Light => "light",
            SensorKind::Microphone => "microphone",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SensorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SensorKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown sensor kind '{s}'"))
    }
}

/// Processed sensor reading
///
/// Immutable once built; re-stamping produces a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedReading {
    /// Adjusted-clock capture time (ms)
    pub timestamp: Timestamp,

    /// Which sensor produced it
    pub sensor_kind: SensorKind,

    /// Processing method, e.g. "raw", "minmax", "sound_pressure"
    pub tag: String,

    /// Processed values
    pub values: Vec<f64>,
}

impl ProcessedReading {
    /// Create a reading
    pub fn new(
        timestamp: Timestamp,
        sensor_kind: SensorKind,
        tag: impl Into<String>,
        values: Vec<f64>,
    ) -> Self {
        Self {
            timestamp,
            sensor_kind,
            tag: tag.into(),
            values,
        }
    }

    /// Copy of this reading carrying a different timestamp
    pub fn restamped(&self, timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            ..self.clone()
        }
    }
}

/// Buffered unit: a reading plus where it came from and the
/// originating device's status at capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Originating device
    pub device_id: DeviceId,

    /// Device status when the reading was captured
    pub status: DeviceStatus,

    /// The reading
    pub reading: ProcessedReading,
}

impl Sample {
    /// Create a sample
    pub fn new(device_id: DeviceId, status: DeviceStatus, reading: ProcessedReading) -> Self {
        Self {
            device_id,
            status,
            reading,
        }
    }

    /// Shortcut to the reading's timestamp
    #[inline]
    pub fn timestamp(&self) -> Timestamp {
        self.reading.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse_roundtrip() {
        for kind in SensorKind::ALL {
            assert_eq!(kind.as_str().parse::<SensorKind>(), Ok(kind));
        }
        assert_eq!("LIGHT".parse::<SensorKind>(), Ok(SensorKind::Light));
        assert!("thermometer".parse::<SensorKind>().is_err());
    }

    #[test]
    fn test_restamped_keeps_payload() {
        let reading = ProcessedReading::new(10, SensorKind::Light, "raw", vec![1.0, 2.0]);
        let moved = reading.restamped(42);
        assert_eq!(moved.timestamp, 42);
        assert_eq!(moved.values, reading.values);
        assert_eq!(reading.timestamp, 10);
    }

    #[test]
    fn test_microphone_has_default_interval() {
        assert_eq!(SensorKind::Microphone.default_interval_ms(), Some(100));
        assert_eq!(SensorKind::Accelerometer.default_interval_ms(), None);
    }
}
