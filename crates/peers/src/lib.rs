//! # Peers
//!
//! The two protocol roles and what they need around them:
//!
//! - [`Coordinator`]: reference clock, sync loop, per-device store and
//!   bucket aggregation
//! - [`Participant`]: clock offset estimation and the periodic reading
//!   send loop
//! - [`codec`]: wire encoding of [`contracts::Message`]
//! - [`loopback`]: in-process transport for simulation and tests
//! - [`MockSensor`]: synthetic sensor source
//!
//! Both roles are driven by feeding events to `handle_event`; neither
//! owns a task that reads from the transport.

pub mod codec;
mod coordinator;
mod error;
mod event;
pub mod loopback;
mod participant;
mod periodic;
mod sensor;

pub use coordinator::{Coordinator, CoordinatorSettings, DeviceRecord};
pub use error::{PeerError, Result};
pub use event::{CoordinatorEvent, ParticipantEvent};
pub use loopback::{drive_coordinator, drive_participant, LoopbackNetwork, LoopbackTransport};
pub use participant::Participant;
pub use periodic::PeriodicTask;
pub use sensor::{synthetic_reading, MockSensor, SensorCapabilities};
