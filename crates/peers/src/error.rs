//! Role error types

use contracts::{ContractError, DeviceStatus};
use thiserror::Error;

/// Errors raised while driving a coordinator or participant
///
/// None of these are fatal: event handlers return them so the caller can
/// log and keep going.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Valid message that makes no sense in the current state
    #[error("unexpected '{kind}' message from '{from}' while {status:?}")]
    UnexpectedMessage {
        from: String,
        kind: &'static str,
        status: DeviceStatus,
    },

    /// Operation not allowed in the current state
    #[error("cannot {operation} while {status:?}")]
    InvalidState {
        operation: &'static str,
        status: DeviceStatus,
    },

    #[error(transparent)]
    Contract(#[from] ContractError),
}

impl PeerError {
    pub fn unexpected(from: impl Into<String>, kind: &'static str, status: DeviceStatus) -> Self {
        Self::UnexpectedMessage {
            from: from.into(),
            kind,
            status,
        }
    }

    pub fn invalid_state(operation: &'static str, status: DeviceStatus) -> Self {
        Self::InvalidState { operation, status }
    }

    /// Whether the underlying cause is a missing or refused sensor
    pub fn is_sensor_unavailable(&self) -> bool {
        matches!(self, Self::Contract(err) if err.is_sensor_unavailable())
    }
}

/// Role Result alias
pub type Result<T> = std::result::Result<T, PeerError>;
