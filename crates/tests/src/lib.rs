//! # Integration Tests
//!
//! End-to-end scenarios over the loopback transport.
//!
//! Covers:
//! - config file to running coordinator
//! - clock offset convergence on skewed peers
//! - lifecycle edges (late joiner, last disconnect, refused sensor)
//! - bucket history bound and sink output

#[cfg(test)]
mod contract_tests {
    use contracts::{DeviceId, DeviceStatus, Message, MessageBody, Role, SensorKind};

    #[test]
    fn test_contracts_compile() {
        let _ = contracts::ConfigVersion::V1;
    }

    #[test]
    fn test_wire_message_survives_codec() {
        let message = Message::new(
            1_000,
            DeviceId::coordinator(),
            Role::Coordinator,
            DeviceStatus::Active,
            MessageBody::StartMeasurement {
                sensor_kind: SensorKind::Light,
                sample_interval_ms: 100,
            },
        );
        let bytes = peers::codec::encode(&message).unwrap();
        let decoded = peers::codec::decode(&DeviceId::coordinator(), &bytes).unwrap();
        assert_eq!(decoded, message);

        let json = peers::codec::to_json(&message).unwrap();
        assert!(json.contains("StartMeasurement"));
    }

    #[test]
    fn test_config_drives_coordinator_settings() {
        let toml = r#"
            [coordinator]
            display_name = "lab"
            sensor_kind = "barometer"

            [clock]
            sync_period_ms = 250

            [[peers]]
            name = "phone-a"
            clock_skew_ms = 30
        "#;
        let config =
            config_loader::ConfigLoader::load_from_str(toml, config_loader::ConfigFormat::Toml)
                .unwrap();
        let settings = peers::CoordinatorSettings::from_config(&config);

        assert_eq!(settings.display_name, "lab");
        assert_eq!(settings.sync_period.as_millis(), 250);
        assert_eq!(settings.device_capacity, 10);
        assert_eq!(settings.history_capacity, 100);
        assert_eq!(config.sample_interval_for(SensorKind::Barometer), 500);
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use contracts::{
        DeviceId, DeviceStatus, SensorKind, SensorSource, SinkConfig, SinkType,
        UnavailableReason,
    };
    use peers::{
        drive_coordinator, drive_participant, Coordinator, CoordinatorSettings, LoopbackNetwork,
        MockSensor, Participant, SensorCapabilities,
    };
    use sync_engine::clock::{SkewedClock, TokioClock, WallClock};
    use tokio::task::JoinHandle;

    const EPOCH: i64 = 1_700_000_000_000;

    struct Deployment {
        network: LoopbackNetwork,
        wall: Arc<dyn WallClock>,
        coordinator: Arc<Coordinator>,
        drivers: Vec<JoinHandle<()>>,
    }

    impl Deployment {
        fn new(settings: CoordinatorSettings) -> Self {
            let wall: Arc<dyn WallClock> = Arc::new(TokioClock::starting_at(EPOCH));
            let network = LoopbackNetwork::new();
            let (transport, inbox) = network.register_coordinator();
            let own: Arc<dyn SensorSource> =
                Arc::new(MockSensor::new(SensorCapabilities::all(), wall.clone()));
            let coordinator = Arc::new(Coordinator::new(settings, transport, Some(own), wall.clone()));
            coordinator.start().unwrap();
            let drivers = vec![drive_coordinator(coordinator.clone(), inbox)];

            Self {
                network,
                wall,
                coordinator,
                drivers,
            }
        }

        fn add_peer(
            &mut self,
            name: &str,
            skew_ms: i64,
            latency_ms: u64,
            capabilities: SensorCapabilities,
        ) -> Arc<Participant> {
            let clock: Arc<dyn WallClock> = Arc::new(SkewedClock::new(self.wall.clone(), skew_ms));
            let (transport, inbox) =
                self.network
                    .register(name, name, Duration::from_millis(latency_ms));
            let sensor = Arc::new(MockSensor::new(capabilities, clock.clone()));
            let participant = Arc::new(Participant::new(transport, sensor, clock));
            self.drivers
                .push(drive_participant(participant.clone(), inbox));
            participant
        }

        fn connect(&self, name: &str) {
            self.network.connect(&DeviceId::from(name)).unwrap();
        }

        fn disconnect(&self, name: &str) {
            self.network.disconnect(&DeviceId::from(name)).unwrap();
        }

        async fn teardown(self) {
            self.coordinator.shutdown().await;
            self.network.close();
            for driver in self.drivers {
                driver.abort();
            }
        }
    }

    fn peer_only_settings() -> CoordinatorSettings {
        CoordinatorSettings {
            sync_period: Duration::from_millis(100),
            self_contributing: false,
            ..Default::default()
        }
    }

    async fn settle(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_skewed_peers_converge_and_align() {
        let mut deployment = Deployment::new(peer_only_settings());
        let ahead = deployment.add_peer("ahead", 150, 5, SensorCapabilities::all());
        let behind = deployment.add_peer("behind", -70, 12, SensorCapabilities::all());
        deployment.connect("ahead");
        deployment.connect("behind");
        settle(50).await;

        assert_eq!(ahead.status(), DeviceStatus::Idle);
        assert_eq!(behind.status(), DeviceStatus::Idle);
        assert_eq!(ahead.device_id(), Some(DeviceId::from("ahead")));

        deployment
            .coordinator
            .start_measurement(SensorKind::Accelerometer, Some(50))
            .await
            .unwrap();
        settle(1_000).await;

        // Symmetric latency gives the exact skew
        let estimate = ahead.clock_estimate();
        assert!(estimate.completed_rounds >= 5);
        assert_eq!(estimate.offset, 150);
        assert_eq!(behind.clock_estimate().offset, -70);
        assert_eq!(ahead.adjusted_time(), deployment.coordinator.now());
        assert_eq!(ahead.status(), DeviceStatus::Active);

        let latest = deployment.coordinator.history().pop().unwrap();
        assert_eq!(latest.per_device.len(), 2, "missing: {:?}", latest.missing);
        for reading in latest.per_device.values() {
            assert!((reading.timestamp - latest.reference_time).abs() <= 100);
        }

        deployment.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_joiner_starts_measuring() {
        let mut deployment = Deployment::new(peer_only_settings());
        let first = deployment.add_peer("first", 0, 0, SensorCapabilities::all());
        let late = deployment.add_peer("late", 40, 3, SensorCapabilities::all());
        deployment.connect("first");
        settle(20).await;

        deployment
            .coordinator
            .start_measurement(SensorKind::Light, None)
            .await
            .unwrap();
        settle(100).await;
        assert_eq!(first.status(), DeviceStatus::Active);
        assert_eq!(late.status(), DeviceStatus::Init);

        deployment.connect("late");
        settle(100).await;
        assert_eq!(late.status(), DeviceStatus::Active);
        assert_eq!(
            late.measurement().map(|plan| plan.sensor_kind),
            Some(SensorKind::Light)
        );

        deployment.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_disconnect_stops_measurement() {
        let mut deployment = Deployment::new(peer_only_settings());
        let a = deployment.add_peer("a", 10, 0, SensorCapabilities::all());
        let _b = deployment.add_peer("b", -10, 0, SensorCapabilities::all());
        deployment.connect("a");
        deployment.connect("b");
        settle(20).await;

        deployment
            .coordinator
            .start_measurement(SensorKind::Gyroscope, Some(20))
            .await
            .unwrap();
        settle(200).await;

        deployment.disconnect("a");
        settle(20).await;
        assert_eq!(a.status(), DeviceStatus::Init);
        assert_eq!(a.clock_estimate().offset, 0);
        assert_eq!(deployment.coordinator.device_count(), 1);
        assert_eq!(deployment.coordinator.status(), DeviceStatus::Active);
        assert_eq!(
            deployment.coordinator.store().len(&DeviceId::from("a")),
            0
        );

        // Later buckets neither match nor miss the departed device
        let gone = DeviceId::from("a");
        let before = deployment.coordinator.history().last().unwrap().sequence;
        settle(200).await;
        let later: Vec<_> = deployment
            .coordinator
            .history()
            .into_iter()
            .filter(|bucket| bucket.sequence > before)
            .collect();
        assert!(!later.is_empty());
        for bucket in &later {
            assert!(!bucket.per_device.contains_key(&gone));
            assert!(!bucket.missing.contains(&gone));
            assert!(bucket.per_device.contains_key(&DeviceId::from("b")));
        }
        let fresh = deployment.coordinator.aggregate_now().unwrap();
        assert_eq!(fresh.expected_devices(), 1);
        assert!(!deployment.coordinator.active_devices().contains(&gone));

        deployment.disconnect("b");
        settle(20).await;
        assert_eq!(deployment.coordinator.device_count(), 0);
        assert_eq!(deployment.coordinator.status(), DeviceStatus::Idle);
        assert!(deployment.coordinator.measurement().is_none());

        deployment.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_sensor_reports_and_stays_idle() {
        let mut deployment = Deployment::new(peer_only_settings());
        let plain = deployment.add_peer(
            "plain",
            0,
            2,
            SensorCapabilities::only([SensorKind::Light, SensorKind::Microphone]),
        );
        let locked = deployment.add_peer(
            "locked",
            0,
            2,
            SensorCapabilities::all().denying([SensorKind::Microphone]),
        );
        deployment.connect("plain");
        deployment.connect("locked");
        settle(20).await;

        deployment
            .coordinator
            .start_measurement(SensorKind::Accelerometer, Some(50))
            .await
            .unwrap();
        settle(100).await;

        assert_eq!(plain.status(), DeviceStatus::Idle);
        assert_eq!(
            plain.last_unavailable(),
            Some((SensorKind::Accelerometer, UnavailableReason::NotSupported))
        );
        assert_eq!(locked.status(), DeviceStatus::Active);

        let record = deployment
            .coordinator
            .device(&DeviceId::from("plain"))
            .unwrap();
        assert_eq!(
            record.unavailable,
            Some((SensorKind::Accelerometer, UnavailableReason::NotSupported))
        );
        assert_eq!(deployment.coordinator.status(), DeviceStatus::Active);

        deployment.coordinator.stop_measurement().await.unwrap();
        settle(20).await;
        deployment
            .coordinator
            .start_measurement(SensorKind::Microphone, None)
            .await
            .unwrap();
        settle(100).await;

        assert_eq!(plain.status(), DeviceStatus::Active);
        assert_eq!(locked.status(), DeviceStatus::Idle);
        assert_eq!(
            locked.last_unavailable(),
            Some((SensorKind::Microphone, UnavailableReason::PermissionDenied))
        );

        deployment.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_keeps_latest_hundred_buckets() {
        let deployment = Deployment::new(CoordinatorSettings {
            sync_period: Duration::from_millis(100),
            ..Default::default()
        });

        let plan = deployment
            .coordinator
            .start_measurement(SensorKind::Accelerometer, Some(10))
            .await
            .unwrap();
        assert_eq!(plan.aggregation_period_ms(), 20);

        settle(3_000).await;
        deployment.coordinator.stop_measurement().await.unwrap();

        let history = deployment.coordinator.history();
        assert_eq!(history.len(), 100);
        let last = history[99].sequence;
        assert!(last > 100);
        assert_eq!(history[0].sequence, last - 99);
        assert!(history
            .windows(2)
            .all(|pair| pair[1].sequence == pair[0].sequence + 1));
        assert!(history
            .iter()
            .all(|bucket| bucket.reference_time % 10 == 0));

        // Coordinator contributes its own sensor
        let coordinator_id = DeviceId::coordinator();
        assert!(history[99].per_device.contains_key(&coordinator_id));

        deployment.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_buckets_reach_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("buckets.jsonl");

        let mut deployment = Deployment::new(peer_only_settings());
        deployment.add_peer("phone", 25, 4, SensorCapabilities::all());

        let sinks = vec![SinkConfig {
            name: "jsonl".to_string(),
            sink_type: SinkType::File,
            queue_capacity: 64,
            params: HashMap::from([(
                "path".to_string(),
                path.to_string_lossy().into_owned(),
            )]),
        }];
        let task = dispatcher::create_dispatcher(sinks, deployment.coordinator.subscribe_buckets())
            .unwrap()
            .spawn();

        deployment.connect("phone");
        settle(20).await;
        deployment
            .coordinator
            .start_measurement(SensorKind::Magnetometer, Some(25))
            .await
            .unwrap();
        settle(500).await;
        deployment.coordinator.stop_measurement().await.unwrap();

        let produced = deployment.coordinator.history().len();
        let metrics = task.stop().await;
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].1.write_count as usize, produced);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), produced);
        assert!(lines[0].get("reference_time").is_some());
        assert!(lines[0].get("coverage").is_some());
        assert!(lines
            .windows(2)
            .all(|pair| pair[0]["sequence"].as_u64() < pair[1]["sequence"].as_u64()));

        deployment.teardown().await;
    }
}
