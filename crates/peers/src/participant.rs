//! Participant role
//!
//! ```text
//! INIT --Handshake--> IDLE --StartMeasurement--> ACTIVE
//!                      ^                           |
//!                      +------StopMeasurement------+
//! any --disconnect--> INIT
//! ```
//!
//! Clock messages are handled in every state. Only messages from the
//! coordinator are accepted.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use contracts::{
    ContractError, DeviceId, DeviceStatus, Message, MessageBody, Role, SensorKind, SensorSource,
    SyncPhase, Timestamp, Transport, UnavailableReason,
};
use sync_engine::clock::{ClockEstimate, ClockEstimator, WallClock};
use sync_engine::MeasurementPlan;
use tracing::{debug, info, instrument, trace, warn};

use crate::codec;
use crate::error::{PeerError, Result};
use crate::event::ParticipantEvent;
use crate::periodic::PeriodicTask;

#[derive(Debug, Default)]
struct Session {
    device_id: Option<DeviceId>,
    coordinator: Option<DeviceId>,
    status: DeviceStatus,
    plan: Option<MeasurementPlan>,
    unavailable: Option<(SensorKind, UnavailableReason)>,
}

struct Shared {
    transport: Arc<dyn Transport>,
    sensor: Arc<dyn SensorSource>,
    clock: Mutex<ClockEstimator>,
    session: RwLock<Session>,
}

impl Shared {
    fn clock(&self) -> MutexGuard<'_, ClockEstimator> {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn status(&self) -> DeviceStatus {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .status
    }

    fn set_status(&self, status: DeviceStatus) {
        self.session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .status = status;
    }

    fn adjusted_time(&self) -> Timestamp {
        self.clock().adjusted_time()
    }

    fn send_to_coordinator(&self, body: MessageBody) -> Result<()> {
        let (coordinator, sender_id, status) = {
            let session = self.session.read().unwrap_or_else(PoisonError::into_inner);
            let coordinator = session
                .coordinator
                .clone()
                .ok_or_else(|| PeerError::invalid_state("send without a coordinator", session.status))?;
            let sender_id = session
                .device_id
                .clone()
                .unwrap_or_else(|| self.transport.local_id().clone());
            (coordinator, sender_id, session.status)
        };

        let message = Message::new(
            self.adjusted_time(),
            sender_id,
            Role::Participant,
            status,
            body,
        );
        let bytes = codec::encode(&message)?;
        self.transport.send(&coordinator, bytes)?;
        Ok(())
    }

    /// One send-loop tick
    fn send_latest(&self, kind: SensorKind) {
        let Some(reading) = self.sensor.latest_reading(kind) else {
            trace!(kind = %kind, "no reading yet, tick skipped");
            return;
        };
        let reading = reading.restamped(self.adjusted_time());
        if let Err(e) = self.send_to_coordinator(MessageBody::SensorReading { reading }) {
            warn!(error = %e, "failed to send reading");
            observability::record_message_dropped("transport");
        }
    }
}

#[derive(Debug, Default)]
struct Control {
    send_loop: Option<PeriodicTask>,
}

/// Participant-side state machine
pub struct Participant {
    shared: Arc<Shared>,
    control: tokio::sync::Mutex<Control>,
}

impl std::fmt::Debug for Participant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Participant")
            .field("local_id", self.shared.transport.local_id())
            .field("status", &self.status())
            .finish()
    }
}

impl Participant {
    pub fn new(
        transport: Arc<dyn Transport>,
        sensor: Arc<dyn SensorSource>,
        wall: Arc<dyn WallClock>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                sensor,
                clock: Mutex::new(ClockEstimator::new(wall)),
                session: RwLock::new(Session::default()),
            }),
            control: tokio::sync::Mutex::new(Control::default()),
        }
    }

    pub fn status(&self) -> DeviceStatus {
        self.shared.status()
    }

    /// Id assigned by the coordinator's handshake
    pub fn device_id(&self) -> Option<DeviceId> {
        self.shared
            .session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .device_id
            .clone()
    }

    /// Running measurement, if any
    pub fn measurement(&self) -> Option<MeasurementPlan> {
        self.shared
            .session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .plan
    }

    /// Last sensor refusal reported to the coordinator
    pub fn last_unavailable(&self) -> Option<(SensorKind, UnavailableReason)> {
        self.shared
            .session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .unavailable
    }

    /// Local estimate of the coordinator's clock
    pub fn adjusted_time(&self) -> Timestamp {
        self.shared.adjusted_time()
    }

    pub fn clock_estimate(&self) -> ClockEstimate {
        self.shared.clock().estimate()
    }

    /// Feed one inbound event.
    ///
    /// Errors are per-message: the participant stays usable.
    pub async fn handle_event(&self, event: ParticipantEvent) -> Result<()> {
        match event {
            ParticipantEvent::Connected { coordinator } => {
                info!(coordinator = %coordinator, "connected to coordinator");
                let mut session = self
                    .shared
                    .session
                    .write()
                    .unwrap_or_else(PoisonError::into_inner);
                session.coordinator = Some(coordinator);
                session.status = DeviceStatus::Init;
                Ok(())
            }
            ParticipantEvent::Payload { from, bytes } => self.handle_payload(&from, &bytes).await,
            ParticipantEvent::Disconnected => {
                self.handle_disconnect().await;
                Ok(())
            }
        }
    }

    #[instrument(level = "trace", name = "participant_payload", skip(self, from, bytes), fields(from = %from))]
    async fn handle_payload(&self, from: &DeviceId, bytes: &[u8]) -> Result<()> {
        let message = codec::decode(from, bytes).inspect_err(|e| {
            warn!(error = %e, "dropping malformed message");
            observability::record_message_dropped("parse");
        })?;

        let expected = self
            .shared
            .session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .coordinator
            .clone();
        if expected.as_ref() != Some(from) || !message.is_from_coordinator() {
            warn!(sender = %message.header.sender_id, "message not from the coordinator, dropped");
            observability::record_message_dropped("unknown_sender");
            let expected = expected.map(|id| id.to_string()).unwrap_or_else(|| "none".to_string());
            return Err(ContractError::unknown_sender(from, expected).into());
        }

        let t1 = message.header.send_timestamp;
        match message.body {
            MessageBody::Handshake { assigned_id } => self.on_handshake(from, assigned_id),
            MessageBody::StartMeasurement {
                sensor_kind,
                sample_interval_ms,
            } => self.begin_measurement(from, sensor_kind, sample_interval_ms).await,
            MessageBody::StopMeasurement => self.stop_measurement().await,
            MessageBody::ClockSync { phase } => self.on_clock_sync(from, phase, t1),
            MessageBody::Ping {
                payload,
                reply: false,
            } => self
                .shared
                .send_to_coordinator(MessageBody::Ping { payload, reply: true }),
            MessageBody::Ping { reply: true, .. } => {
                debug!("ping reply received");
                Ok(())
            }
            body @ (MessageBody::SensorReading { .. } | MessageBody::SensorUnavailable { .. }) => {
                Err(PeerError::unexpected(from.as_str(), body.kind(), self.status()))
            }
        }
    }

    fn on_handshake(&self, from: &DeviceId, assigned_id: DeviceId) -> Result<()> {
        let mut session = self
            .shared
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if session.status != DeviceStatus::Init {
            return Err(PeerError::unexpected(from.as_str(), "handshake", session.status));
        }
        info!(device_id = %assigned_id, "handshake complete");
        session.device_id = Some(assigned_id);
        session.status = DeviceStatus::Idle;
        Ok(())
    }

    async fn begin_measurement(
        &self,
        from: &DeviceId,
        kind: SensorKind,
        requested_interval_ms: u64,
    ) -> Result<()> {
        let mut control = self.control.lock().await;

        match self.status() {
            DeviceStatus::Idle => {}
            DeviceStatus::Active => {
                debug!("measurement restarted by coordinator");
                self.halt(&mut control).await;
            }
            status => return Err(PeerError::unexpected(from.as_str(), "start_measurement", status)),
        }

        if let Err(err) = self.shared.sensor.start(kind) {
            let reason = match err {
                ContractError::PermissionDenied { .. } => UnavailableReason::PermissionDenied,
                _ => UnavailableReason::NotSupported,
            };
            warn!(kind = %kind, ?reason, "sensor cannot be started");
            self.shared
                .session
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .unavailable = Some((kind, reason));
            if let Err(send_err) = self.shared.send_to_coordinator(MessageBody::SensorUnavailable {
                sensor_kind: kind,
                reason,
            }) {
                warn!(error = %send_err, "failed to report unavailable sensor");
            }
            return Err(err.into());
        }

        let interval_ms = kind.default_interval_ms().unwrap_or(requested_interval_ms);
        let plan = MeasurementPlan::new(kind, interval_ms);
        {
            let mut session = self
                .shared
                .session
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            session.status = DeviceStatus::Active;
            session.plan = Some(plan);
            session.unavailable = None;
        }

        let shared = self.shared.clone();
        control.send_loop = Some(PeriodicTask::spawn(
            "participant_send",
            Duration::from_millis(plan.interval_ms),
            move || shared.send_latest(kind),
        ));

        info!(kind = %kind, interval_ms = plan.interval_ms, "measurement started");
        Ok(())
    }

    /// Stop sampling and return to IDLE. No-op unless ACTIVE.
    pub async fn stop_measurement(&self) -> Result<()> {
        let mut control = self.control.lock().await;
        if self.status() != DeviceStatus::Active {
            debug!(status = ?self.status(), "stop requested while not measuring");
            return Ok(());
        }
        self.halt(&mut control).await;
        info!("measurement stopped");
        Ok(())
    }

    /// Stop everything and mark the participant finished
    pub async fn shutdown(&self) {
        let mut control = self.control.lock().await;
        self.halt(&mut control).await;
        self.shared.set_status(DeviceStatus::Finished);
        info!("participant shut down");
    }

    /// Cancel the send loop first, then release the sensor
    async fn halt(&self, control: &mut Control) {
        if let Some(task) = control.send_loop.take() {
            task.cancel().await;
        }
        self.shared.sensor.stop();

        let mut session = self
            .shared
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        session.plan = None;
        if session.status == DeviceStatus::Active {
            session.status = DeviceStatus::Idle;
        }
    }

    async fn handle_disconnect(&self) {
        let mut control = self.control.lock().await;
        self.halt(&mut control).await;
        self.shared.clock().reset();

        let mut session = self
            .shared
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *session = Session::default();
        info!("disconnected from coordinator");
    }

    fn on_clock_sync(&self, from: &DeviceId, phase: SyncPhase, send_timestamp: Timestamp) -> Result<()> {
        match phase {
            SyncPhase::Sync => {
                self.shared.clock().on_sync();
                Ok(())
            }
            SyncPhase::FollowUp => {
                if !self.shared.clock().on_follow_up(send_timestamp) {
                    return Ok(());
                }
                self.shared.send_to_coordinator(MessageBody::ClockSync {
                    phase: SyncPhase::DelayRequest,
                })?;
                self.shared.clock().on_delay_request_sent();
                Ok(())
            }
            SyncPhase::DelayResponse => {
                let applied = self.shared.clock().on_delay_response(send_timestamp);
                if let Some(offset) = applied {
                    let id = self
                        .device_id()
                        .unwrap_or_else(|| self.shared.transport.local_id().clone());
                    observability::record_clock_offset(id.as_str(), offset);
                    debug!(offset, "clock offset applied");
                }
                Ok(())
            }
            SyncPhase::DelayRequest => {
                Err(PeerError::unexpected(from.as_str(), "delay_request", self.status()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{synthetic_reading, MockSensor, SensorCapabilities};
    use bytes::Bytes;
    use sync_engine::clock::ManualClock;

    /// Records every outbound payload
    struct RecordingTransport {
        local: DeviceId,
        sent: Mutex<Vec<(DeviceId, Message)>>,
    }

    impl RecordingTransport {
        fn new(local: &str) -> Self {
            Self {
                local: local.into(),
                sent: Mutex::new(Vec::new()),
            }
        }

        fn sent(&self) -> Vec<(DeviceId, Message)> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Transport for RecordingTransport {
        fn local_id(&self) -> &DeviceId {
            &self.local
        }

        fn send(&self, to: &DeviceId, payload: Bytes) -> std::result::Result<(), ContractError> {
            let message = codec::decode(&self.local, &payload)?;
            self.sent.lock().unwrap().push((to.clone(), message));
            Ok(())
        }

        fn broadcast(&self, _payload: Bytes) {}

        fn connected_peers(&self) -> Vec<DeviceId> {
            Vec::new()
        }
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        transport: Arc<RecordingTransport>,
        sensor: Arc<MockSensor>,
        participant: Participant,
    }

    fn fixture(capabilities: SensorCapabilities) -> Fixture {
        let clock = Arc::new(ManualClock::new(10_000));
        let transport = Arc::new(RecordingTransport::new("phone-a"));
        let sensor = Arc::new(MockSensor::manual(capabilities, clock.clone()));
        let participant = Participant::new(transport.clone(), sensor.clone(), clock.clone());
        Fixture {
            clock,
            transport,
            sensor,
            participant,
        }
    }

    fn from_coordinator(ts: Timestamp, body: MessageBody) -> ParticipantEvent {
        let message = Message::new(
            ts,
            DeviceId::coordinator(),
            Role::Coordinator,
            DeviceStatus::Idle,
            body,
        );
        ParticipantEvent::Payload {
            from: DeviceId::coordinator(),
            bytes: codec::encode(&message).unwrap(),
        }
    }

    async fn connect(f: &Fixture) {
        f.participant
            .handle_event(ParticipantEvent::Connected {
                coordinator: DeviceId::coordinator(),
            })
            .await
            .unwrap();
        f.participant
            .handle_event(from_coordinator(
                0,
                MessageBody::Handshake {
                    assigned_id: "phone-a".into(),
                },
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_handshake_moves_to_idle() {
        let f = fixture(SensorCapabilities::all());
        assert_eq!(f.participant.status(), DeviceStatus::Init);
        connect(&f).await;
        assert_eq!(f.participant.status(), DeviceStatus::Idle);
        assert_eq!(f.participant.device_id(), Some("phone-a".into()));
    }

    #[tokio::test]
    async fn test_clock_round_sends_delay_request_and_applies_offset() {
        let f = fixture(SensorCapabilities::all());
        connect(&f).await;

        // Local clock runs 10 ms ahead of the coordinator
        f.participant
            .handle_event(from_coordinator(9_990, MessageBody::ClockSync { phase: SyncPhase::Sync }))
            .await
            .unwrap();
        f.participant
            .handle_event(from_coordinator(
                9_990,
                MessageBody::ClockSync {
                    phase: SyncPhase::FollowUp,
                },
            ))
            .await
            .unwrap();

        let sent = f.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, DeviceId::coordinator());
        assert_eq!(sent[0].1.sync_phase(), Some(SyncPhase::DelayRequest));

        f.participant
            .handle_event(from_coordinator(
                9_990,
                MessageBody::ClockSync {
                    phase: SyncPhase::DelayResponse,
                },
            ))
            .await
            .unwrap();

        assert_eq!(f.participant.clock_estimate().offset, 10);
        assert_eq!(f.participant.adjusted_time(), 9_990);
    }

    #[tokio::test]
    async fn test_unavailable_sensor_reports_and_stays_idle() {
        let f = fixture(SensorCapabilities::only([SensorKind::Accelerometer]));
        connect(&f).await;

        let err = f
            .participant
            .handle_event(from_coordinator(
                0,
                MessageBody::StartMeasurement {
                    sensor_kind: SensorKind::Microphone,
                    sample_interval_ms: 100,
                },
            ))
            .await
            .unwrap_err();

        assert!(err.is_sensor_unavailable());
        assert_eq!(f.participant.status(), DeviceStatus::Idle);
        let sent = f.transport.sent();
        assert!(matches!(
            sent[0].1.body,
            MessageBody::SensorUnavailable {
                sensor_kind: SensorKind::Microphone,
                reason: UnavailableReason::NotSupported,
            }
        ));
    }

    #[tokio::test]
    async fn test_denied_sensor_reports_permission() {
        let f = fixture(SensorCapabilities::all().denying([SensorKind::Light]));
        connect(&f).await;

        let _ = f
            .participant
            .handle_event(from_coordinator(
                0,
                MessageBody::StartMeasurement {
                    sensor_kind: SensorKind::Light,
                    sample_interval_ms: 50,
                },
            ))
            .await;

        assert_eq!(
            f.participant.last_unavailable(),
            Some((SensorKind::Light, UnavailableReason::PermissionDenied))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_loop_stamps_adjusted_time_and_stops() {
        let f = fixture(SensorCapabilities::all());
        connect(&f).await;

        f.participant
            .handle_event(from_coordinator(
                0,
                MessageBody::StartMeasurement {
                    sensor_kind: SensorKind::Accelerometer,
                    sample_interval_ms: 50,
                },
            ))
            .await
            .unwrap();
        assert_eq!(f.participant.status(), DeviceStatus::Active);
        assert_eq!(f.participant.measurement().map(|p| p.interval_ms), Some(50));

        // Nothing captured yet: ticks are skipped
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(f.transport.sent().is_empty());

        f.clock.set(20_000);
        f.sensor.inject(synthetic_reading(SensorKind::Accelerometer, 12_345));
        tokio::time::sleep(Duration::from_millis(60)).await;

        let sent = f.transport.sent();
        assert!(!sent.is_empty());
        match &sent[0].1.body {
            MessageBody::SensorReading { reading } => assert_eq!(reading.timestamp, 20_000),
            other => panic!("unexpected body {other:?}"),
        }
        assert_eq!(sent[0].1.header.status, DeviceStatus::Active);

        f.participant
            .handle_event(from_coordinator(0, MessageBody::StopMeasurement))
            .await
            .unwrap();
        assert_eq!(f.participant.status(), DeviceStatus::Idle);
        assert!(!f.sensor.is_running());

        let count = f.transport.sent().len();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(f.transport.sent().len(), count);
    }

    #[tokio::test]
    async fn test_sensor_interval_overrides_requested() {
        let f = fixture(SensorCapabilities::all());
        connect(&f).await;

        f.participant
            .handle_event(from_coordinator(
                0,
                MessageBody::StartMeasurement {
                    sensor_kind: SensorKind::Microphone,
                    sample_interval_ms: 20,
                },
            ))
            .await
            .unwrap();
        assert_eq!(f.participant.measurement().map(|p| p.interval_ms), Some(100));
        f.participant.stop_measurement().await.unwrap();
    }

    #[tokio::test]
    async fn test_foreign_sender_rejected() {
        let f = fixture(SensorCapabilities::all());
        connect(&f).await;

        let spoofed = Message::new(
            0,
            "phone-b".into(),
            Role::Coordinator,
            DeviceStatus::Idle,
            MessageBody::StopMeasurement,
        );
        let err = f
            .participant
            .handle_event(ParticipantEvent::Payload {
                from: "phone-b".into(),
                bytes: codec::encode(&spoofed).unwrap(),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PeerError::Contract(ContractError::UnknownSender { .. })
        ));
    }

    #[tokio::test]
    async fn test_disconnect_resets_to_init() {
        let f = fixture(SensorCapabilities::all());
        connect(&f).await;
        f.participant
            .handle_event(from_coordinator(
                0,
                MessageBody::StartMeasurement {
                    sensor_kind: SensorKind::Light,
                    sample_interval_ms: 50,
                },
            ))
            .await
            .unwrap();

        f.participant
            .handle_event(ParticipantEvent::Disconnected)
            .await
            .unwrap();

        assert_eq!(f.participant.status(), DeviceStatus::Init);
        assert!(f.participant.device_id().is_none());
        assert!(!f.sensor.is_running());
        assert_eq!(f.participant.clock_estimate().offset, 0);
    }

    #[tokio::test]
    async fn test_ping_is_echoed() {
        let f = fixture(SensorCapabilities::all());
        connect(&f).await;
        f.participant
            .handle_event(from_coordinator(
                0,
                MessageBody::Ping {
                    payload: vec![1, 2, 3],
                    reply: false,
                },
            ))
            .await
            .unwrap();

        let sent = f.transport.sent();
        assert_eq!(
            sent[0].1.body,
            MessageBody::Ping {
                payload: vec![1, 2, 3],
                reply: true
            }
        );
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dropped() {
        let f = fixture(SensorCapabilities::all());
        connect(&f).await;
        let result = f
            .participant
            .handle_event(ParticipantEvent::Payload {
                from: DeviceId::coordinator(),
                bytes: Bytes::from_static(&[0xde, 0xad]),
            })
            .await;
        assert!(matches!(
            result,
            Err(PeerError::Contract(ContractError::Parse { .. }))
        ));
        assert_eq!(f.participant.status(), DeviceStatus::Idle);
    }
}
