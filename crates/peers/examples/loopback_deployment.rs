//! Loopback Deployment Example
//!
//! A coordinator and two skewed participants talking over the in-process
//! loopback network. Prints the clock offsets each participant converged on
//! and the buckets the coordinator assembled, then drops one participant to
//! show it leaving the buckets.
//!
//! Run with: cargo run -p peers --example loopback_deployment

use std::sync::Arc;
use std::time::Duration;

use contracts::{DeviceId, DeviceStatus, SensorKind, SensorSource};
use peers::{
    drive_coordinator, drive_participant, Coordinator, CoordinatorSettings, LoopbackNetwork,
    MockSensor, Participant, SensorCapabilities,
};
use sync_engine::clock::{SkewedClock, SystemClock, WallClock};

/// (name, clock skew ms, one-way latency ms)
const PEERS: [(&str, i64, u64); 2] = [("pixel", 250, 15), ("tablet", -120, 40)];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    observability::init()?;
    tracing::info!("Starting loopback deployment demo");

    let wall: Arc<dyn WallClock> = Arc::new(SystemClock);
    let network = LoopbackNetwork::new();

    // ==== Coordinator ====
    let (transport, inbox) = network.register_coordinator();
    let own_sensor: Arc<dyn SensorSource> =
        Arc::new(MockSensor::new(SensorCapabilities::all(), wall.clone()));
    let coordinator = Arc::new(Coordinator::new(
        CoordinatorSettings::default(),
        transport,
        Some(own_sensor),
        wall.clone(),
    ));
    coordinator.start()?;
    let coordinator_driver = drive_coordinator(coordinator.clone(), inbox);

    // ==== Participants ====
    let mut participants = Vec::new();
    for (name, skew_ms, latency_ms) in PEERS {
        let clock: Arc<dyn WallClock> = Arc::new(SkewedClock::new(wall.clone(), skew_ms));
        let (transport, inbox) =
            network.register(name, name, Duration::from_millis(latency_ms));
        let sensor = Arc::new(MockSensor::new(SensorCapabilities::all(), clock.clone()));
        let participant = Arc::new(Participant::new(transport, sensor, clock));
        let driver = drive_participant(participant.clone(), inbox);

        network.connect(&DeviceId::from(name))?;
        participants.push((name, skew_ms, participant, driver));
    }

    while participants
        .iter()
        .any(|(_, _, participant, _)| participant.status() == DeviceStatus::Init)
    {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tracing::info!(devices = coordinator.device_count(), "Handshakes complete");

    // ==== Measure ====
    let plan = coordinator
        .start_measurement(SensorKind::Microphone, None)
        .await?;
    tracing::info!(
        kind = %plan.sensor_kind,
        period_ms = plan.aggregation_period_ms(),
        "Measurement running"
    );
    tokio::time::sleep(Duration::from_secs(3)).await;

    println!("\nClock offsets:");
    for (name, skew_ms, participant, _) in &participants {
        let estimate = participant.clock_estimate();
        println!(
            "  {name}: configured {skew_ms} ms, estimated {} ms after {} rounds",
            estimate.offset, estimate.completed_rounds
        );
    }

    print_recent(&coordinator, "All devices connected");

    // ==== One participant leaves ====
    network.disconnect(&DeviceId::from(PEERS[1].0))?;
    tokio::time::sleep(Duration::from_secs(1)).await;
    print_recent(&coordinator, "After tablet disconnected");

    // ==== Shutdown ====
    coordinator.stop_measurement().await?;
    coordinator.shutdown().await;
    for (_, _, participant, _) in &participants {
        participant.shutdown().await;
    }
    network.close();
    coordinator_driver.abort();
    for (_, _, _, driver) in participants {
        driver.abort();
    }

    tracing::info!("Demo finished");
    Ok(())
}

fn print_recent(coordinator: &Coordinator, title: &str) {
    let history = coordinator.history();
    println!("\n{title} ({} buckets so far):", history.len());
    for bucket in history.iter().rev().take(3).rev() {
        let mut matched: Vec<String> = bucket.per_device.keys().map(|id| id.to_string()).collect();
        matched.sort();
        println!(
            "  #{} @ {}: matched [{}], missing {:?}",
            bucket.sequence,
            bucket.reference_time,
            matched.join(", "),
            bucket.missing
        );
    }
}
