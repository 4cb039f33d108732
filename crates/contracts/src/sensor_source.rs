//! SensorSource trait - Sensor collaborator abstraction
//!
//! The core never touches capture hardware or signal processing. It starts a
//! sensor, pulls the freshest processed value on its own schedule, and stops
//! it again.

use std::sync::{Mutex, PoisonError};

use crate::{ContractError, ProcessedReading, SensorKind};

/// Sensor collaborator
///
/// Mock and real sensors implement the same API.
///
/// # Example
///
/// ```ignore
/// let sensor: Arc<dyn SensorSource> = platform_sensor();
/// sensor.start(SensorKind::Accelerometer)?;
/// if let Some(reading) = sensor.latest_reading(SensorKind::Accelerometer) {
///     // stamp and send
/// }
/// sensor.stop();
/// ```
pub trait SensorSource: Send + Sync {
    /// Start capturing `kind`
    ///
    /// # Errors
    /// - `ContractError::SensorUnavailable` if the capability is absent
    /// - `ContractError::PermissionDenied` if access is not granted
    fn start(&self, kind: SensorKind) -> Result<(), ContractError>;

    /// Freshest processed value, or `None` if nothing has been produced yet.
    ///
    /// Reading does not consume: two calls without a new capture in between
    /// return the same value.
    fn latest_reading(&self, kind: SensorKind) -> Option<ProcessedReading>;

    /// Stop capturing and release every exclusive resource
    fn stop(&self);

    /// Check if currently capturing
    fn is_running(&self) -> bool;
}

/// Single-slot mailbox, overwrite on write, read without consume.
///
/// This is the hand-off point between a capture callback and the periodic
/// send loop. It is deliberately not a queue: the loop always wants the
/// freshest value.
#[derive(Debug, Default)]
pub struct LatestValueSlot {
    slot: Mutex<Option<ProcessedReading>>,
}

impl LatestValueSlot {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the stored value
    pub fn put(&self, reading: ProcessedReading) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(reading);
    }

    /// Clone of the stored value, leaving it in place
    pub fn peek(&self) -> Option<ProcessedReading> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drop the stored value
    pub fn clear(&self) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
