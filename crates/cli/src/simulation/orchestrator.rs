//! Simulation orchestrator - brings a whole deployment up and down.
//!
//! Every peer runs in this process on a skewed view of the same wall clock,
//! connected to the coordinator through the loopback transport.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use contracts::{
    DeploymentConfig, DeviceId, DeviceStatus, PeerProfile, SensorKind, SensorSource, TimeBucket,
};
use observability::BucketMetricsAggregator;
use peers::{
    drive_coordinator, drive_participant, Coordinator, CoordinatorSettings, LoopbackNetwork,
    MockSensor, Participant, SensorCapabilities,
};
use sync_engine::clock::{SkewedClock, SystemClock, WallClock};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{PeerReport, SimulationStats};
use crate::error::CliError;

/// How long peers get to complete the handshake
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// Simulation configuration
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub deployment: DeploymentConfig,

    /// Measurement length (None = until shutdown)
    pub duration: Option<Duration>,

    pub sensor_kind: SensorKind,

    /// Requested sample interval
    pub interval_ms: u64,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

struct SimulatedPeer {
    profile: PeerProfile,
    participant: Arc<Participant>,
    driver: JoinHandle<()>,
}

/// Main orchestrator
pub struct Simulation {
    config: SimulationConfig,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    /// Run until the duration elapses or `shutdown` resolves
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<SimulationStats> {
        let deployment = &self.config.deployment;

        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        let wall: Arc<dyn WallClock> = Arc::new(SystemClock);
        let network = LoopbackNetwork::new();

        // Coordinator
        let (transport, inbox) = network.register_coordinator();
        let own_sensor: Arc<dyn SensorSource> =
            Arc::new(MockSensor::new(SensorCapabilities::all(), wall.clone()));
        let coordinator = Arc::new(Coordinator::new(
            CoordinatorSettings::from_config(deployment),
            transport,
            Some(own_sensor),
            wall.clone(),
        ));
        coordinator.start()?;
        let coordinator_driver = drive_coordinator(coordinator.clone(), inbox);

        // Participants
        let mut peers = Vec::with_capacity(deployment.peers.len());
        for profile in &deployment.peers {
            peers.push(spawn_peer(&network, profile, wall.clone()));
        }
        info!(peers = peers.len(), "Simulated peers registered");

        // Sinks and run statistics
        if deployment.sinks.is_empty() {
            warn!("No sinks configured - buckets are only summarized");
        }
        let dispatcher = dispatcher::create_dispatcher(
            deployment.sinks.clone(),
            coordinator.subscribe_buckets(),
        )
        .context("Failed to create dispatcher")?
        .spawn();
        let (collector_stop, collector) = spawn_collector(coordinator.subscribe_buckets());

        // Connect and wait for handshakes
        for peer in &peers {
            network
                .connect(&DeviceId::from(peer.profile.name.as_str()))
                .map_err(|e| CliError::deployment(e.to_string()))?;
        }
        wait_for_handshakes(&peers).await;

        let plan = coordinator
            .start_measurement(self.config.sensor_kind, Some(self.config.interval_ms))
            .await?;
        info!(
            kind = %plan.sensor_kind,
            interval_ms = plan.interval_ms,
            period_ms = plan.aggregation_period_ms(),
            "Measurement running"
        );

        let started = Instant::now();
        let run_for = async {
            match self.config.duration {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = run_for => info!("Measurement duration reached"),
            _ = shutdown => warn!("Received shutdown signal, stopping measurement..."),
        }
        let duration = started.elapsed();

        // Shutdown
        coordinator.stop_measurement().await?;
        // Let the stop broadcast reach every peer
        tokio::time::sleep(max_latency(deployment)).await;

        let reports = peers
            .iter()
            .map(|peer| peer_report(&coordinator, peer))
            .collect();

        coordinator.shutdown().await;
        for peer in &peers {
            peer.participant.shutdown().await;
        }

        let sinks = dispatcher.stop().await;
        let _ = collector_stop.send(());
        let bucket_metrics = collector
            .await
            .map_err(|e| CliError::deployment(format!("bucket collector failed: {e}")))?;

        network.close();
        coordinator_driver.abort();
        for peer in peers {
            peer.driver.abort();
        }

        let stats = SimulationStats {
            duration,
            buckets: bucket_metrics.total_buckets,
            peers: reports,
            sinks,
            bucket_metrics,
        };
        info!(
            buckets = stats.buckets,
            duration_secs = stats.duration.as_secs_f64(),
            "Simulation complete"
        );
        Ok(stats)
    }
}

fn spawn_peer(network: &LoopbackNetwork, profile: &PeerProfile, wall: Arc<dyn WallClock>) -> SimulatedPeer {
    let clock: Arc<dyn WallClock> = Arc::new(SkewedClock::new(wall, profile.clock_skew_ms));
    let (transport, inbox) = network.register(
        profile.name.as_str(),
        profile.name.as_str(),
        Duration::from_millis(profile.latency_ms),
    );
    let sensor = Arc::new(MockSensor::new(
        SensorCapabilities::from_profile(profile),
        clock.clone(),
    ));
    let participant = Arc::new(Participant::new(transport, sensor, clock));
    let driver = drive_participant(participant.clone(), inbox);

    debug!(
        peer = %profile.name,
        skew_ms = profile.clock_skew_ms,
        latency_ms = profile.latency_ms,
        "Simulated peer created"
    );
    SimulatedPeer {
        profile: profile.clone(),
        participant,
        driver,
    }
}

/// Fold every published bucket into run statistics until stopped
fn spawn_collector(
    mut rx: broadcast::Receiver<TimeBucket>,
) -> (oneshot::Sender<()>, JoinHandle<BucketMetricsAggregator>) {
    let (stop_tx, mut stop_rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        let mut metrics = BucketMetricsAggregator::new();
        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Ok(bucket) => metrics.update(&bucket),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Bucket collector lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = &mut stop_rx => {
                    while let Ok(bucket) = rx.try_recv() {
                        metrics.update(&bucket);
                    }
                    break;
                }
            }
        }
        metrics
    });
    (stop_tx, handle)
}

async fn wait_for_handshakes(peers: &[SimulatedPeer]) {
    let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
    loop {
        let pending = peers
            .iter()
            .filter(|peer| peer.participant.status() == DeviceStatus::Init)
            .count();
        if pending == 0 {
            info!(peers = peers.len(), "All peers connected");
            return;
        }
        if Instant::now() >= deadline {
            warn!(pending, "Some peers did not complete the handshake");
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn max_latency(deployment: &DeploymentConfig) -> Duration {
    let worst = deployment
        .peers
        .iter()
        .map(|p| p.latency_ms)
        .max()
        .unwrap_or(0);
    Duration::from_millis(worst + 10)
}

fn peer_report(coordinator: &Coordinator, peer: &SimulatedPeer) -> PeerReport {
    let estimate = peer.participant.clock_estimate();
    let unavailable = coordinator
        .device(&DeviceId::from(peer.profile.name.as_str()))
        .and_then(|record| record.unavailable);
    PeerReport {
        name: peer.profile.name.clone(),
        configured_skew_ms: peer.profile.clock_skew_ms,
        estimated_offset_ms: estimate.offset,
        completed_rounds: estimate.completed_rounds,
        status: peer.participant.status(),
        unavailable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment() -> DeploymentConfig {
        DeploymentConfig {
            peers: vec![
                PeerProfile {
                    name: "phone-a".into(),
                    clock_skew_ms: 120,
                    latency_ms: 0,
                    supported_sensors: Vec::new(),
                    denied_sensors: Vec::new(),
                },
                PeerProfile {
                    name: "phone-b".into(),
                    clock_skew_ms: -80,
                    latency_ms: 0,
                    supported_sensors: vec![SensorKind::Light],
                    denied_sensors: Vec::new(),
                },
            ],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_short_run_produces_buckets_and_offsets() {
        let mut deployment = deployment();
        deployment.clock.sync_period_ms = 100;

        let simulation = Simulation::new(SimulationConfig {
            deployment,
            duration: Some(Duration::from_millis(600)),
            sensor_kind: SensorKind::Accelerometer,
            interval_ms: 50,
            metrics_port: None,
        });
        let stats = simulation.run(std::future::pending()).await.unwrap();

        assert!(stats.buckets > 0);
        assert_eq!(stats.peers.len(), 2);

        let a = &stats.peers[0];
        assert!(a.completed_rounds > 0);
        assert!(a.offset_error_ms() <= 5, "offset error {}", a.offset_error_ms());
        assert_eq!(a.status, DeviceStatus::Idle);

        let b = &stats.peers[1];
        assert_eq!(
            b.unavailable.map(|(kind, _)| kind),
            Some(SensorKind::Accelerometer)
        );
    }

    #[test]
    fn test_max_latency_includes_margin() {
        let mut deployment = deployment();
        deployment.peers[1].latency_ms = 40;
        assert_eq!(max_latency(&deployment), Duration::from_millis(50));
    }
}
