//! Mock sensor
//!
//! Stands in for platform capture during simulation and tests. A producer
//! task writes synthetic readings into a [`LatestValueSlot`] at the kind's
//! native rate; the send loop peeks the slot on its own schedule.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use contracts::{
    ContractError, LatestValueSlot, PeerProfile, ProcessedReading, SensorKind, SensorSource,
    Timestamp,
};
use sync_engine::clock::WallClock;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Capture period when the kind has no native rate
const DEFAULT_CAPTURE_PERIOD_MS: u64 = 20;

/// Which kinds a mock device offers
#[derive(Debug, Clone, Default)]
pub struct SensorCapabilities {
    /// Kinds present on the device; empty means every kind
    pub supported: Vec<SensorKind>,
    /// Present but access refused
    pub denied: Vec<SensorKind>,
}

impl SensorCapabilities {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn only(kinds: impl IntoIterator<Item = SensorKind>) -> Self {
        Self {
            supported: kinds.into_iter().collect(),
            denied: Vec::new(),
        }
    }

    pub fn denying(mut self, kinds: impl IntoIterator<Item = SensorKind>) -> Self {
        self.denied.extend(kinds);
        self
    }

    pub fn from_profile(profile: &PeerProfile) -> Self {
        Self {
            supported: profile.supported_sensors.clone(),
            denied: profile.denied_sensors.clone(),
        }
    }

    /// Why `kind` cannot be started, if it cannot
    pub fn check(&self, kind: SensorKind) -> Result<(), ContractError> {
        if !self.supported.is_empty() && !self.supported.contains(&kind) {
            return Err(ContractError::SensorUnavailable { kind });
        }
        if self.denied.contains(&kind) {
            return Err(ContractError::PermissionDenied { kind });
        }
        Ok(())
    }
}

/// Simulated sensor
pub struct MockSensor {
    capabilities: SensorCapabilities,
    clock: Arc<dyn WallClock>,
    slot: Arc<LatestValueSlot>,
    running: Arc<AtomicBool>,
    active_kind: Mutex<Option<SensorKind>>,
    producer: Mutex<Option<JoinHandle<()>>>,
    autoplay: bool,
}

impl std::fmt::Debug for MockSensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSensor")
            .field("capabilities", &self.capabilities)
            .field("running", &self.is_running())
            .field("autoplay", &self.autoplay)
            .finish()
    }
}

impl MockSensor {
    /// Sensor that produces synthetic readings once started
    pub fn new(capabilities: SensorCapabilities, clock: Arc<dyn WallClock>) -> Self {
        Self::build(capabilities, clock, true)
    }

    /// Sensor without a producer; readings come only from [`Self::inject`]
    pub fn manual(capabilities: SensorCapabilities, clock: Arc<dyn WallClock>) -> Self {
        Self::build(capabilities, clock, false)
    }

    fn build(capabilities: SensorCapabilities, clock: Arc<dyn WallClock>, autoplay: bool) -> Self {
        Self {
            capabilities,
            clock,
            slot: Arc::new(LatestValueSlot::new()),
            running: Arc::new(AtomicBool::new(false)),
            active_kind: Mutex::new(None),
            producer: Mutex::new(None),
            autoplay,
        }
    }

    /// Place a reading in the slot as if it had just been captured
    pub fn inject(&self, reading: ProcessedReading) {
        self.slot.put(reading);
    }

    pub fn capabilities(&self) -> &SensorCapabilities {
        &self.capabilities
    }

    pub fn active_kind(&self) -> Option<SensorKind> {
        *self
            .active_kind
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_producer(&self, kind: SensorKind) -> Result<JoinHandle<()>, ContractError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| ContractError::Other("mock sensor needs a tokio runtime".to_string()))?;

        let period = Duration::from_millis(
            kind.default_interval_ms()
                .unwrap_or(DEFAULT_CAPTURE_PERIOD_MS),
        );
        let slot = self.slot.clone();
        let clock = self.clock.clone();
        let running = self.running.clone();

        Ok(runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            while running.load(Ordering::SeqCst) {
                interval.tick().await;
                let now = clock.now_ms();
                slot.put(synthetic_reading(kind, now));
                trace!(kind = %kind, timestamp = now, "mock reading captured");
            }
        }))
    }
}

impl SensorSource for MockSensor {
    fn start(&self, kind: SensorKind) -> Result<(), ContractError> {
        self.capabilities.check(kind)?;

        // Restarting replaces the previous capture
        self.stop();

        self.running.store(true, Ordering::SeqCst);
        if self.autoplay {
            match self.spawn_producer(kind) {
                Ok(handle) => {
                    *self.producer.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                }
                Err(err) => {
                    self.running.store(false, Ordering::SeqCst);
                    return Err(err);
                }
            }
        }
        *self
            .active_kind
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(kind);

        debug!(kind = %kind, autoplay = self.autoplay, "mock sensor started");
        Ok(())
    }

    fn latest_reading(&self, kind: SensorKind) -> Option<ProcessedReading> {
        if !self.is_running() {
            return None;
        }
        self.slot.peek().filter(|reading| reading.sensor_kind == kind)
    }

    fn stop(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        if let Some(handle) = self
            .producer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        self.slot.clear();
        *self
            .active_kind
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;

        if was_running {
            debug!("mock sensor stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for MockSensor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Deterministic values shaped like what each pipeline produces
pub fn synthetic_reading(kind: SensorKind, now: Timestamp) -> ProcessedReading {
    let phase = (now as f64) / 1000.0;
    let values = match kind {
        SensorKind::Accelerometer => {
            let swing = 0.5 * phase.sin();
            vec![9.81 - swing.abs(), 9.81 + swing.abs()]
        }
        SensorKind::Gyroscope => {
            let swing = 0.1 * (2.0 * phase).sin();
            vec![-swing.abs(), swing.abs()]
        }
        SensorKind::Magnetometer => vec![
            22.0 + phase.sin(),
            -5.0 + phase.cos(),
            40.0 + 0.5 * phase.sin(),
        ],
        SensorKind::Barometer => vec![1013.25 + 0.05 * phase.sin()],
        SensorKind::Light => vec![320.0 + 15.0 * (0.5 * phase).sin()],
        SensorKind::Microphone => vec![42.0 + 3.0 * (3.0 * phase).sin().abs()],
    };
    ProcessedReading::new(now, kind, kind.default_tag(), values)
}
