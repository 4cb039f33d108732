//! Layered error definitions
//!
//! Categorized by source: config / transport / sensor / protocol

use thiserror::Error;

use crate::{DeviceId, SensorKind};

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Transport Errors =====
    /// Send to a peer failed (unreachable or unknown id)
    #[error("transport error sending to '{device_id}': {message}")]
    Transport { device_id: String, message: String },

    // ===== Sensor Errors =====
    /// Sensor capability absent on this device
    #[error("sensor unavailable: {kind}")]
    SensorUnavailable { kind: SensorKind },

    /// Sensor present but access not granted
    #[error("permission denied for sensor: {kind}")]
    PermissionDenied { kind: SensorKind },

    // ===== Protocol Errors =====
    /// Malformed inbound payload
    #[error("failed to decode message from '{from}': {message}")]
    Parse { from: String, message: String },

    /// Message from a device that is not the expected peer
    #[error("message from unknown sender '{sender}' (expected {expected})")]
    UnknownSender { sender: String, expected: String },

    // ===== Sink Errors =====
    /// Bucket sink write failed
    #[error("sink '{sink_name}' write error: {message}")]
    SinkWrite { sink_name: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create transport error
    pub fn transport(device_id: &DeviceId, message: impl Into<String>) -> Self {
        Self::Transport {
            device_id: device_id.to_string(),
            message: message.into(),
        }
    }

    /// Create parse error
    pub fn parse(from: &DeviceId, message: impl Into<String>) -> Self {
        Self::Parse {
            from: from.to_string(),
            message: message.into(),
        }
    }

    /// Create unknown sender error
    pub fn unknown_sender(sender: &DeviceId, expected: impl Into<String>) -> Self {
        Self::UnknownSender {
            sender: sender.to_string(),
            expected: expected.into(),
        }
    }

    /// Create sink write error
    pub fn sink_write(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkWrite {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }

    /// Whether this error is one of the sensor-unavailability kinds
    pub fn is_sensor_unavailable(&self) -> bool {
        matches!(
            self,
            Self::SensorUnavailable { .. } | Self::PermissionDenied { .. }
        )
    }
}
