//! Coordinator role
//!
//! Owns the reference clock, the per-device sample store and the bucket
//! history. Three periodic loops run while measuring:
//! - sync loop: SYNC then FOLLOW_UP to every participant, until shutdown
//! - aggregator: one bucket every 2 x sample interval
//! - self collection: the coordinator's own sensor, when it contributes

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use contracts::{
    AggregatorConfig, ContractError, DeploymentConfig, DeviceId, DeviceStatus, Message,
    MessageBody, Role, Sample, SensorKind, SensorSource, SyncPhase, TimeBucket, Timestamp,
    Transport, UnavailableReason,
};
use serde::Serialize;
use sync_engine::clock::{ReferenceClock, WallClock};
use sync_engine::{BucketAggregator, BucketHistory, DeviceSampleStore, MeasurementPlan};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, trace, warn};

use crate::codec;
use crate::error::{PeerError, Result};
use crate::event::CoordinatorEvent;
use crate::periodic::PeriodicTask;

/// Coordinator tunables
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub display_name: String,
    pub sync_period: Duration,
    pub default_sample_interval_ms: u64,
    pub self_contributing: bool,
    pub device_capacity: usize,
    pub history_capacity: usize,
    pub aggregator: AggregatorConfig,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from_config(&DeploymentConfig::default())
    }
}

impl CoordinatorSettings {
    pub fn from_config(config: &DeploymentConfig) -> Self {
        Self {
            display_name: config.coordinator.display_name.clone(),
            sync_period: Duration::from_millis(config.clock.sync_period_ms),
            default_sample_interval_ms: config.coordinator.default_sample_interval_ms,
            self_contributing: config.coordinator.self_contributing,
            device_capacity: config.buffer.device_capacity,
            history_capacity: config.buffer.history_capacity,
            aggregator: config.aggregator.clone(),
        }
    }
}

/// What the coordinator knows about one connected device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceRecord {
    pub device_id: DeviceId,
    pub display_name: String,
    pub status: DeviceStatus,
    pub handshake_complete: bool,
    /// Last sensor refusal the device reported
    pub unavailable: Option<(SensorKind, UnavailableReason)>,
    pub connected_at: Timestamp,
    pub last_seen: Timestamp,
}

#[derive(Debug, Default)]
struct MeasurementState {
    status: DeviceStatus,
    plan: Option<MeasurementPlan>,
    /// Requested interval as broadcast, before any sensor override
    requested_interval_ms: u64,
    self_collecting: bool,
}

struct Shared {
    id: DeviceId,
    settings: CoordinatorSettings,
    transport: Arc<dyn Transport>,
    sensor: Option<Arc<dyn SensorSource>>,
    clock: ReferenceClock,
    devices: RwLock<HashMap<DeviceId, DeviceRecord>>,
    store: Arc<DeviceSampleStore>,
    aggregator: BucketAggregator,
    state: RwLock<MeasurementState>,
}

impl Shared {
    fn status(&self) -> DeviceStatus {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .status
    }

    fn message(&self, timestamp: Timestamp, body: MessageBody) -> Message {
        Message::new(
            timestamp,
            self.id.clone(),
            Role::Coordinator,
            self.status(),
            body,
        )
    }

    fn send(&self, to: &DeviceId, body: MessageBody) -> Result<()> {
        let message = self.message(self.clock.adjusted_time(), body);
        let bytes = codec::encode(&message)?;
        self.transport.send(to, bytes)?;
        Ok(())
    }

    fn broadcast(&self, timestamp: Timestamp, body: MessageBody) {
        let message = self.message(timestamp, body);
        match codec::encode(&message) {
            Ok(bytes) => self.transport.broadcast(bytes),
            Err(e) => warn!(error = %e, "failed to encode broadcast"),
        }
    }

    /// SYNC and FOLLOW_UP share the same send time t1
    fn sync_round(&self) {
        let t1 = self.clock.adjusted_time();
        self.broadcast(t1, MessageBody::ClockSync { phase: SyncPhase::Sync });
        self.broadcast(
            t1,
            MessageBody::ClockSync {
                phase: SyncPhase::FollowUp,
            },
        );
        trace!(t1, "sync round broadcast");
    }

    fn active_devices(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self
            .devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|record| record.handshake_complete)
            .map(|record| record.device_id.clone())
            .collect();
        if self
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .self_collecting
        {
            ids.push(self.id.clone());
        }
        ids.sort();
        ids
    }

    fn aggregate(&self, plan: MeasurementPlan) -> TimeBucket {
        let active = self.active_devices();
        self.aggregator
            .tick(self.clock.adjusted_time(), &active, plan)
    }

    fn collect_own(&self, sensor: &dyn SensorSource, kind: SensorKind) {
        let Some(reading) = sensor.latest_reading(kind) else {
            return;
        };
        let reading = reading.restamped(self.clock.adjusted_time());
        self.store
            .append(&self.id, Sample::new(self.id.clone(), DeviceStatus::Active, reading));
    }
}

#[derive(Debug, Default)]
struct Control {
    sync_loop: Option<PeriodicTask>,
    aggregator_loop: Option<PeriodicTask>,
    collection_loop: Option<PeriodicTask>,
}

/// Coordinator-side state machine
pub struct Coordinator {
    shared: Arc<Shared>,
    control: tokio::sync::Mutex<Control>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("status", &self.status())
            .field("devices", &self.device_count())
            .finish()
    }
}

impl Coordinator {
    /// `sensor` is the coordinator's own sensor, used only when
    /// `settings.self_contributing` is set.
    pub fn new(
        settings: CoordinatorSettings,
        transport: Arc<dyn Transport>,
        sensor: Option<Arc<dyn SensorSource>>,
        wall: Arc<dyn WallClock>,
    ) -> Self {
        let store = Arc::new(DeviceSampleStore::new(settings.device_capacity));
        let history = Arc::new(BucketHistory::new(settings.history_capacity));
        let aggregator = BucketAggregator::new(settings.aggregator.clone(), store.clone(), history);

        Self {
            shared: Arc::new(Shared {
                id: DeviceId::coordinator(),
                settings,
                transport,
                sensor,
                clock: ReferenceClock::new(wall),
                devices: RwLock::new(HashMap::new()),
                store,
                aggregator,
                state: RwLock::new(MeasurementState::default()),
            }),
            control: tokio::sync::Mutex::new(Control::default()),
        }
    }

    pub fn status(&self) -> DeviceStatus {
        self.shared.status()
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.shared.settings
    }

    /// Reference clock reading
    pub fn now(&self) -> Timestamp {
        self.shared.clock.adjusted_time()
    }

    /// Running measurement, if any
    pub fn measurement(&self) -> Option<MeasurementPlan> {
        self.shared
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .plan
    }

    /// Connected devices, sorted by id
    pub fn devices(&self) -> Vec<DeviceRecord> {
        let mut records: Vec<_> = self
            .shared
            .devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        records.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        records
    }

    pub fn device(&self, id: &DeviceId) -> Option<DeviceRecord> {
        self.shared
            .devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn device_count(&self) -> usize {
        self.shared
            .devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Devices the aggregator asks for a sample on each tick
    pub fn active_devices(&self) -> Vec<DeviceId> {
        self.shared.active_devices()
    }

    pub fn store(&self) -> &Arc<DeviceSampleStore> {
        &self.shared.store
    }

    /// Bucket history, oldest first
    pub fn history(&self) -> Vec<TimeBucket> {
        self.shared.aggregator.history().snapshot()
    }

    /// Every bucket produced from now on
    pub fn subscribe_buckets(&self) -> broadcast::Receiver<TimeBucket> {
        self.shared.aggregator.history().subscribe()
    }

    /// Run one aggregation pass now. `None` when not measuring.
    pub fn aggregate_now(&self) -> Option<TimeBucket> {
        self.measurement().map(|plan| self.shared.aggregate(plan))
    }

    /// INIT -> IDLE
    pub fn start(&self) -> Result<()> {
        let mut state = self
            .shared
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if state.status != DeviceStatus::Init {
            return Err(PeerError::invalid_state("start", state.status));
        }
        state.status = DeviceStatus::Idle;
        info!(name = %self.shared.settings.display_name, "coordinator ready");
        Ok(())
    }

    /// IDLE -> ACTIVE.
    ///
    /// `interval_ms` falls back to the configured default. Kinds with a
    /// native rate override it, as on participants.
    #[instrument(name = "coordinator_start_measurement", skip(self, kind), fields(kind = %kind))]
    pub async fn start_measurement(
        &self,
        kind: SensorKind,
        interval_ms: Option<u64>,
    ) -> Result<MeasurementPlan> {
        let mut control = self.control.lock().await;

        let status = self.status();
        if status != DeviceStatus::Idle {
            return Err(PeerError::invalid_state("start measurement", status));
        }

        let requested = interval_ms.unwrap_or(self.shared.settings.default_sample_interval_ms);
        let plan = MeasurementPlan::new(kind, kind.default_interval_ms().unwrap_or(requested));

        if control.sync_loop.is_none() {
            let shared = self.shared.clone();
            control.sync_loop = Some(PeriodicTask::spawn_immediate(
                "coordinator_sync",
                self.shared.settings.sync_period,
                move || shared.sync_round(),
            ));
        }

        self.shared.store.clear();

        let self_collecting = self.start_own_sensor(&mut control, plan);
        {
            let mut state = self
                .shared
                .state
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            state.status = DeviceStatus::Active;
            state.plan = Some(plan);
            state.requested_interval_ms = requested;
            state.self_collecting = self_collecting;
        }

        self.shared.broadcast(
            self.now(),
            MessageBody::StartMeasurement {
                sensor_kind: kind,
                sample_interval_ms: requested,
            },
        );

        let shared = self.shared.clone();
        control.aggregator_loop = Some(PeriodicTask::spawn(
            "coordinator_aggregator",
            Duration::from_millis(plan.aggregation_period_ms()),
            move || {
                shared.aggregate(plan);
            },
        ));

        info!(
            interval_ms = plan.interval_ms,
            devices = self.device_count(),
            self_collecting,
            "measurement started"
        );
        Ok(plan)
    }

    fn start_own_sensor(&self, control: &mut Control, plan: MeasurementPlan) -> bool {
        if !self.shared.settings.self_contributing {
            return false;
        }
        let Some(sensor) = self.shared.sensor.clone() else {
            return false;
        };
        if let Err(e) = sensor.start(plan.sensor_kind) {
            warn!(error = %e, "own sensor unavailable, not contributing");
            return false;
        }

        let shared = self.shared.clone();
        let kind = plan.sensor_kind;
        control.collection_loop = Some(PeriodicTask::spawn(
            "coordinator_collect",
            Duration::from_millis(plan.interval_ms),
            move || shared.collect_own(sensor.as_ref(), kind),
        ));
        true
    }

    /// ACTIVE -> IDLE. No-op unless ACTIVE.
    #[instrument(name = "coordinator_stop_measurement", skip(self))]
    pub async fn stop_measurement(&self) -> Result<()> {
        let mut control = self.control.lock().await;
        if self.status() != DeviceStatus::Active {
            debug!(status = ?self.status(), "stop requested while not measuring");
            return Ok(());
        }
        self.halt(&mut control).await;
        Ok(())
    }

    async fn halt(&self, control: &mut Control) {
        self.shared
            .broadcast(self.now(), MessageBody::StopMeasurement);

        if let Some(task) = control.aggregator_loop.take() {
            task.cancel().await;
        }
        if let Some(task) = control.collection_loop.take() {
            task.cancel().await;
        }

        let was_collecting = {
            let mut state = self
                .shared
                .state
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            state.status = DeviceStatus::Idle;
            state.plan = None;
            std::mem::take(&mut state.self_collecting)
        };
        if was_collecting {
            if let Some(sensor) = &self.shared.sensor {
                sensor.stop();
            }
        }

        info!(
            buckets = self.shared.aggregator.bucket_count(),
            "measurement stopped"
        );
    }

    /// Stop measuring and the sync loop; the coordinator is then FINISHED.
    pub async fn shutdown(&self) {
        let mut control = self.control.lock().await;
        if self.status() == DeviceStatus::Active {
            self.halt(&mut control).await;
        }
        if let Some(task) = control.sync_loop.take() {
            task.cancel().await;
        }
        self.shared
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .status = DeviceStatus::Finished;
        info!("coordinator shut down");
    }

    /// Send a diagnostic ping to one device
    pub fn ping(&self, device: &DeviceId, payload: Vec<u8>) -> Result<()> {
        self.shared.send(
            device,
            MessageBody::Ping {
                payload,
                reply: false,
            },
        )
    }

    /// Feed one inbound event.
    ///
    /// Errors are per-event: the coordinator stays usable.
    pub async fn handle_event(&self, event: CoordinatorEvent) -> Result<()> {
        match event {
            CoordinatorEvent::ConnectionInitiated {
                device,
                display_name,
            } => {
                self.on_connection_initiated(device, display_name);
                Ok(())
            }
            CoordinatorEvent::ConnectionResult { device, accepted } => {
                self.on_connection_result(device, accepted)
            }
            CoordinatorEvent::Payload { from, bytes } => self.handle_payload(&from, &bytes),
            CoordinatorEvent::Disconnected { device } => {
                self.on_disconnected(&device).await;
                Ok(())
            }
        }
    }

    fn on_connection_initiated(&self, device: DeviceId, display_name: String) {
        let now = self.now();
        debug!(device_id = %device, name = %display_name, "connection initiated");
        self.shared
            .devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                device.clone(),
                DeviceRecord {
                    device_id: device,
                    display_name,
                    status: DeviceStatus::Init,
                    handshake_complete: false,
                    unavailable: None,
                    connected_at: now,
                    last_seen: now,
                },
            );
    }

    fn on_connection_result(&self, device: DeviceId, accepted: bool) -> Result<()> {
        if !accepted {
            info!(device_id = %device, "connection rejected");
            self.shared
                .devices
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&device);
            return Ok(());
        }

        let now = self.now();
        {
            let mut devices = self
                .shared
                .devices
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let record = devices
                .entry(device.clone())
                .or_insert_with(|| DeviceRecord {
                    device_id: device.clone(),
                    display_name: device.to_string(),
                    status: DeviceStatus::Init,
                    handshake_complete: false,
                    unavailable: None,
                    connected_at: now,
                    last_seen: now,
                });
            record.status = DeviceStatus::Idle;
        }

        self.shared.send(
            &device,
            MessageBody::Handshake {
                assigned_id: device.clone(),
            },
        )?;
        if let Some(record) = self
            .shared
            .devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&device)
        {
            record.handshake_complete = true;
        }
        info!(device_id = %device, "device connected");

        // A device joining mid-measurement is told to start right away
        let joining = {
            let state = self
                .shared
                .state
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            state
                .plan
                .filter(|_| state.status == DeviceStatus::Active)
                .map(|plan| (plan.sensor_kind, state.requested_interval_ms))
        };
        if let Some((sensor_kind, sample_interval_ms)) = joining {
            self.shared.send(
                &device,
                MessageBody::StartMeasurement {
                    sensor_kind,
                    sample_interval_ms,
                },
            )?;
        }
        Ok(())
    }

    async fn on_disconnected(&self, device: &DeviceId) {
        let remaining = {
            let mut devices = self
                .shared
                .devices
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if devices.remove(device).is_none() {
                debug!(device_id = %device, "disconnect for unknown device");
                return;
            }
            devices.len()
        };
        self.shared.store.remove(device);
        info!(device_id = %device, remaining, "device disconnected");

        if remaining == 0 && self.status() == DeviceStatus::Active {
            info!("last device left, stopping measurement");
            if let Err(e) = self.stop_measurement().await {
                warn!(error = %e, "auto-stop failed");
            }
        }
    }

    #[instrument(level = "trace", name = "coordinator_payload", skip(self, from, bytes), fields(from = %from))]
    fn handle_payload(&self, from: &DeviceId, bytes: &[u8]) -> Result<()> {
        let message = codec::decode(from, bytes).inspect_err(|e| {
            warn!(error = %e, "dropping malformed message");
            observability::record_message_dropped("parse");
        })?;

        let receipt = self.now();
        let known = {
            let mut devices = self
                .shared
                .devices
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            match devices.get_mut(from) {
                Some(record) if message.header.role == Role::Participant => {
                    record.last_seen = receipt;
                    record.status = message.header.status;
                    true
                }
                _ => false,
            }
        };
        if !known {
            warn!(sender = %message.header.sender_id, "message from unknown device, dropped");
            observability::record_message_dropped("unknown_sender");
            return Err(ContractError::unknown_sender(from, "a connected participant").into());
        }

        match message.body {
            MessageBody::SensorReading { reading } => {
                observability::record_reading_received(from.as_str(), reading.sensor_kind.as_str());
                self.shared
                    .store
                    .append(from, Sample::new(from.clone(), message.header.status, reading));
                Ok(())
            }
            MessageBody::SensorUnavailable {
                sensor_kind,
                reason,
            } => {
                warn!(device_id = %from, kind = %sensor_kind, ?reason, "device cannot provide sensor");
                if let Some(record) = self
                    .shared
                    .devices
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get_mut(from)
                {
                    record.unavailable = Some((sensor_kind, reason));
                }
                Ok(())
            }
            MessageBody::ClockSync {
                phase: SyncPhase::DelayRequest,
            } => {
                let response = self.shared.message(
                    receipt,
                    MessageBody::ClockSync {
                        phase: SyncPhase::DelayResponse,
                    },
                );
                self.shared.transport.send(from, codec::encode(&response)?)?;
                Ok(())
            }
            MessageBody::Ping {
                payload,
                reply: false,
            } => self.shared.send(from, MessageBody::Ping { payload, reply: true }),
            MessageBody::Ping { reply: true, .. } => {
                debug!(device_id = %from, "ping reply received");
                Ok(())
            }
            body => Err(PeerError::unexpected(from.as_str(), body.kind(), self.status())),
        }
    }
}
