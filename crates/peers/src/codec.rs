//! Wire encoding for [`Message`]
//!
//! Compact bincode on the wire, JSON for diagnostics. Decoding never panics:
//! malformed or oversized input becomes a `ContractError::Parse`.

use bincode::Options;
use bytes::Bytes;
use contracts::{ContractError, DeviceId, Message};

/// Largest accepted encoded message
pub const MAX_MESSAGE_BYTES: u64 = 64 * 1024;

fn options() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_MESSAGE_BYTES)
}

/// Encode a message for the transport
pub fn encode(message: &Message) -> Result<Bytes, ContractError> {
    options()
        .serialize(message)
        .map(Bytes::from)
        .map_err(|e| ContractError::Other(format!("failed to encode message: {e}")))
}

/// Decode a payload received from `from`
pub fn decode(from: &DeviceId, bytes: &[u8]) -> Result<Message, ContractError> {
    options()
        .deserialize(bytes)
        .map_err(|e| ContractError::parse(from, e.to_string()))
}

/// Human-readable rendering for logs and tooling
pub fn to_json(message: &Message) -> Result<String, ContractError> {
    serde_json::to_string(message)
        .map_err(|e| ContractError::Other(format!("failed to render message: {e}")))
}
