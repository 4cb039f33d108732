//! Message - typed envelopes exchanged over the transport

use serde::{Deserialize, Serialize};

use crate::{DeviceId, ProcessedReading, SensorKind, Timestamp};

/// Lifecycle status of a device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    /// Connected, handshake not completed
    #[default]
    Init,
    /// Ready, no measurement running
    Idle,
    /// Measurement running
    Active,
    /// Reported failure (reverts to idle locally)
    Error,
    /// Shut down
    Finished,
}

/// Which side of the protocol sent a message
///
/// Kept apart from [`DeviceStatus`]: "sent by the coordinator" is not a
/// lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Coordinator,
    Participant,
}

/// Clock exchange phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Sync,
    FollowUp,
    DelayRequest,
    DelayResponse,
}

/// Why a sensor cannot be started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    /// Capability absent on the device
    NotSupported,
    /// Capability present, access not granted
    PermissionDenied,
}

/// Common envelope fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Sender's adjusted clock at send time
    pub send_timestamp: Timestamp,

    /// Sender id
    pub sender_id: DeviceId,

    /// Sender role
    pub role: Role,

    /// Sender lifecycle status at send time
    pub status: DeviceStatus,
}

/// Message payload, exactly one variant per message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessageBody {
    /// Coordinator → participant: your id is `assigned_id`
    Handshake { assigned_id: DeviceId },

    /// Coordinator → participants: start sampling
    StartMeasurement {
        sensor_kind: SensorKind,
        sample_interval_ms: u64,
    },

    /// Coordinator → participants: stop sampling
    StopMeasurement,

    /// Participant → coordinator: one processed reading
    SensorReading { reading: ProcessedReading },

    /// Participant → coordinator: the requested sensor cannot be started
    SensorUnavailable {
        sensor_kind: SensorKind,
        reason: UnavailableReason,
    },

    /// Clock exchange step
    ClockSync { phase: SyncPhase },

    /// Diagnostic ping; a request (`reply == false`) is echoed back
    Ping {
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
        reply: bool,
    },
}

impl MessageBody {
    /// Short variant name for logs and metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            MessageBody::Handshake { .. } => "handshake",
            MessageBody::StartMeasurement { .. } => "start_measurement",
            MessageBody::StopMeasurement => "stop_measurement",
            MessageBody::SensorReading { .. } => "sensor_reading",
            MessageBody::SensorUnavailable { .. } => "sensor_unavailable",
            MessageBody::ClockSync { .. } => "clock_sync",
            MessageBody::Ping { .. } => "ping",
        }
    }
}

/// Message exchanged between peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub header: MessageHeader,
    pub body: MessageBody,
}

impl Message {
    /// Build a message
    pub fn new(
        send_timestamp: Timestamp,
        sender_id: DeviceId,
        role: Role,
        status: DeviceStatus,
        body: MessageBody,
    ) -> Self {
        Self {
            header: MessageHeader {
                send_timestamp,
                sender_id,
                role,
                status,
            },
            body,
        }
    }

    /// Whether the header claims the message comes from the coordinator
    pub fn is_from_coordinator(&self) -> bool {
        self.header.role == Role::Coordinator && self.header.sender_id.is_coordinator()
    }

    /// Clock phase, if this is a clock message
    pub fn sync_phase(&self) -> Option<SyncPhase> {
        match self.body {
            MessageBody::ClockSync { phase } => Some(phase),
            _ => None,
        }
    }
}
