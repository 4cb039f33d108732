//! # Contracts
//!
//! Frozen interface contracts shared by every crate in the workspace: the
//! message protocol exchanged between peers, the reading / bucket data model,
//! deployment configuration and the two external collaborator traits
//! (transport and sensor). Business crates depend on this crate only.
//!
//! ## Time Model
//! - `Timestamp` is milliseconds (`i64`) on the sender's *adjusted* clock
//! - the coordinator's adjusted clock is its wall clock; a participant's is
//!   its wall clock minus the currently applied offset

mod bucket;
mod config;
mod device_id;
mod error;
mod message;
mod reading;
mod sensor_source;
mod sink;
mod transport;

pub use bucket::*;
pub use config::*;
pub use device_id::{DeviceId, COORDINATOR_ID};
pub use error::*;
pub use message::*;
pub use reading::*;
pub use sensor_source::{LatestValueSlot, SensorSource};
pub use sink::*;
pub use transport::Transport;

/// Milliseconds on a device's adjusted clock.
pub type Timestamp = i64;

/// Signed millisecond duration (clock offsets, distances).
pub type Millis = i64;
