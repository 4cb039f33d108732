//! Inbound events, one enum per role
//!
//! The transport turns connection changes and received payloads into these
//! and hands them to the role's `handle_event`.

use bytes::Bytes;
use contracts::DeviceId;

/// Events delivered to a participant
#[derive(Debug, Clone)]
pub enum ParticipantEvent {
    /// Link to the coordinator is up
    Connected { coordinator: DeviceId },
    /// Encoded message received
    Payload { from: DeviceId, bytes: Bytes },
    /// Link to the coordinator is gone
    Disconnected,
}

/// Events delivered to the coordinator
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    /// A device started connecting
    ConnectionInitiated {
        device: DeviceId,
        display_name: String,
    },
    /// Outcome of a connection attempt
    ConnectionResult { device: DeviceId, accepted: bool },
    /// Encoded message received
    Payload { from: DeviceId, bytes: Bytes },
    /// A device went away
    Disconnected { device: DeviceId },
}

impl CoordinatorEvent {
    /// Device the event concerns
    pub fn device(&self) -> &DeviceId {
        match self {
            CoordinatorEvent::ConnectionInitiated { device, .. }
            | CoordinatorEvent::ConnectionResult { device, .. }
            | CoordinatorEvent::Disconnected { device } => device,
            CoordinatorEvent::Payload { from, .. } => from,
        }
    }
}
