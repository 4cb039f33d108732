//! DeploymentConfig - Config Loader output
//!
//! Describes a full deployment: the coordinator, clock sync cadence, buffer
//! capacities, aggregation tuning, the simulated peers and the bucket output
//! routes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{Millis, SensorKind};

/// Config version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete deployment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Config version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Coordinator settings
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Clock exchange cadence
    #[serde(default)]
    pub clock: ClockSyncConfig,

    /// Store and history capacities
    #[serde(default)]
    pub buffer: BufferConfig,

    /// Aggregation tuning
    #[serde(default)]
    pub aggregator: AggregatorConfig,

    /// Participants to spin up in a local simulation
    #[serde(default)]
    pub peers: Vec<PeerProfile>,

    /// Bucket output routes
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
}

/// Coordinator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Name advertised to participants
    #[serde(default = "default_display_name")]
    pub display_name: String,

    /// Whether the coordinator also samples its own sensor
    #[serde(default = "default_true")]
    pub self_contributing: bool,

    /// Requested send interval when a sensor has no interval of its own
    #[serde(default = "default_sample_interval_ms")]
    pub default_sample_interval_ms: u64,

    /// Sensor measured when none is given on the command line
    #[serde(default = "default_sensor_kind")]
    pub sensor_kind: SensorKind,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            display_name: default_display_name(),
            self_contributing: true,
            default_sample_interval_ms: default_sample_interval_ms(),
            sensor_kind: default_sensor_kind(),
        }
    }
}

fn default_display_name() -> String {
    "coordinator".to_string()
}

fn default_true() -> bool {
    true
}

fn default_sample_interval_ms() -> u64 {
    100
}

fn default_sensor_kind() -> SensorKind {
    SensorKind::Accelerometer
}

/// Clock exchange cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockSyncConfig {
    /// Period of the SYNC / FOLLOW_UP broadcast (ms)
    #[serde(default = "default_sync_period_ms")]
    pub sync_period_ms: u64,
}

impl Default for ClockSyncConfig {
    fn default() -> Self {
        Self {
            sync_period_ms: default_sync_period_ms(),
        }
    }
}

fn default_sync_period_ms() -> u64 {
    1000
}

/// Store and history capacities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Samples kept per device before the oldest is evicted
    #[serde(default = "default_device_capacity")]
    pub device_capacity: usize,

    /// Buckets retained in the coordinator history
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            device_capacity: default_device_capacity(),
            history_capacity: default_history_capacity(),
        }
    }
}

fn default_device_capacity() -> usize {
    10
}

fn default_history_capacity() -> usize {
    100
}

/// Aggregation tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Staleness threshold as a multiple of the sample interval
    #[serde(default = "default_threshold_factor")]
    pub threshold_factor: f64,

    /// Reference instants are floored to a multiple of this (ms)
    #[serde(default = "default_quantum_ms")]
    pub quantum_ms: i64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            threshold_factor: default_threshold_factor(),
            quantum_ms: default_quantum_ms(),
        }
    }
}

impl AggregatorConfig {
    /// Matching threshold for a given sample interval
    pub fn threshold_for(&self, interval_ms: u64) -> Millis {
        (interval_ms as f64 * self.threshold_factor).round() as Millis
    }
}

fn default_threshold_factor() -> f64 {
    2.0
}

fn default_quantum_ms() -> i64 {
    10
}

/// Simulated participant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerProfile {
    /// Unique name, becomes the device id
    pub name: String,

    /// How far this peer's wall clock runs ahead of the coordinator (ms)
    #[serde(default)]
    pub clock_skew_ms: Millis,

    /// One-way delivery latency to and from this peer (ms)
    #[serde(default)]
    pub latency_ms: u64,

    /// Sensors present on the device; empty means all
    #[serde(default)]
    pub supported_sensors: Vec<SensorKind>,

    /// Sensors present but with access refused
    #[serde(default)]
    pub denied_sensors: Vec<SensorKind>,
}

impl PeerProfile {
    /// Whether `kind` is physically present on this peer
    pub fn supports(&self, kind: SensorKind) -> bool {
        self.supported_sensors.is_empty() || self.supported_sensors.contains(&kind)
    }
}

/// Sink output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Sink name
    pub name: String,

    /// Sink type
    pub sink_type: SinkType,

    /// Queue capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Type-specific parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
}

fn default_queue_capacity() -> usize {
    100
}

/// Sink type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkType {
    /// Log output
    Log,
    /// JSON Lines file output
    File,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            version: ConfigVersion::V1,
            coordinator: CoordinatorConfig::default(),
            clock: ClockSyncConfig::default(),
            buffer: BufferConfig::default(),
            aggregator: AggregatorConfig::default(),
            peers: Vec::new(),
            sinks: Vec::new(),
        }
    }
}

impl DeploymentConfig {
    /// Interval used for a measurement of `kind` when the caller gives none
    pub fn sample_interval_for(&self, kind: SensorKind) -> u64 {
        kind.default_interval_ms()
            .unwrap_or(self.coordinator.default_sample_interval_ms)
    }

    /// Find a peer profile by name
    pub fn peer(&self, name: &str) -> Option<&PeerProfile> {
        self.peers.iter().find(|peer| peer.name == name)
    }
}
