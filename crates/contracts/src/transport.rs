//! Transport trait - peer transport collaborator
//!
//! Discovery, connection establishment and reliable delivery live outside the
//! core. The core hands over already-encoded payloads and receives inbound
//! payloads through its role's event handler.

use bytes::Bytes;

use crate::{ContractError, DeviceId};

/// Peer transport
///
/// `send` and `broadcast` must not block: implementations enqueue and return.
pub trait Transport: Send + Sync {
    /// Id of the local endpoint
    fn local_id(&self) -> &DeviceId;

    /// Send `payload` to a single peer
    ///
    /// # Errors
    /// `ContractError::Transport` if the peer is unknown or unreachable
    fn send(&self, to: &DeviceId, payload: Bytes) -> Result<(), ContractError>;

    /// Fan-out to every connected peer
    ///
    /// Best-effort: individual failures are logged by the implementation and
    /// never propagated.
    fn broadcast(&self, payload: Bytes);

    /// Ids of the currently connected peers
    fn connected_peers(&self) -> Vec<DeviceId>;
}
