//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::{DeploymentConfig, SensorKind};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    coordinator: CoordinatorInfo,
    timing: TimingInfo,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    peers: Vec<PeerInfo>,
    peer_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    sinks: Vec<SinkInfo>,
}

#[derive(Serialize)]
struct CoordinatorInfo {
    display_name: String,
    self_contributing: bool,
    sensor_kind: String,
    sample_interval_ms: u64,
}

#[derive(Serialize)]
struct TimingInfo {
    sync_period_ms: u64,
    aggregation_period_ms: u64,
    threshold_ms: i64,
    quantum_ms: i64,
    device_capacity: usize,
    history_capacity: usize,
}

#[derive(Serialize)]
struct PeerInfo {
    name: String,
    clock_skew_ms: i64,
    latency_ms: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    supported_sensors: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    denied_sensors: Vec<String>,
}

#[derive(Serialize)]
struct SinkInfo {
    name: String,
    sink_type: String,
    queue_capacity: usize,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let deployment = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&deployment, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&deployment, args);
    }

    Ok(())
}

fn kind_names(kinds: &[SensorKind]) -> Vec<String> {
    kinds.iter().map(|k| k.to_string()).collect()
}

fn build_config_info(deployment: &DeploymentConfig, args: &InfoArgs) -> ConfigInfo {
    let kind = deployment.coordinator.sensor_kind;
    let interval = deployment.sample_interval_for(kind);

    let peers = if args.peers {
        deployment
            .peers
            .iter()
            .map(|p| PeerInfo {
                name: p.name.clone(),
                clock_skew_ms: p.clock_skew_ms,
                latency_ms: p.latency_ms,
                supported_sensors: kind_names(&p.supported_sensors),
                denied_sensors: kind_names(&p.denied_sensors),
            })
            .collect()
    } else {
        Vec::new()
    };

    let sinks = if args.sinks {
        deployment
            .sinks
            .iter()
            .map(|s| SinkInfo {
                name: s.name.clone(),
                sink_type: format!("{:?}", s.sink_type),
                queue_capacity: s.queue_capacity,
            })
            .collect()
    } else {
        Vec::new()
    };

    ConfigInfo {
        version: format!("{:?}", deployment.version),
        coordinator: CoordinatorInfo {
            display_name: deployment.coordinator.display_name.clone(),
            self_contributing: deployment.coordinator.self_contributing,
            sensor_kind: kind.to_string(),
            sample_interval_ms: interval,
        },
        timing: TimingInfo {
            sync_period_ms: deployment.clock.sync_period_ms,
            aggregation_period_ms: interval * 2,
            threshold_ms: deployment.aggregator.threshold_for(interval),
            quantum_ms: deployment.aggregator.quantum_ms,
            device_capacity: deployment.buffer.device_capacity,
            history_capacity: deployment.buffer.history_capacity,
        },
        peers,
        peer_count: deployment.peers.len(),
        sinks,
    }
}

fn print_config_info(deployment: &DeploymentConfig, args: &InfoArgs) {
    let kind = deployment.coordinator.sensor_kind;
    let interval = deployment.sample_interval_for(kind);

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                Peer Syncer Configuration                     ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    println!("📡 Coordinator");
    println!("   ├─ Version: {:?}", deployment.version);
    println!("   ├─ Name: {}", deployment.coordinator.display_name);
    println!(
        "   ├─ Self-contributing: {}",
        deployment.coordinator.self_contributing
    );
    println!("   └─ Sensor: {} every {} ms", kind, interval);

    println!("\n⚙️  Timing");
    println!("   ├─ Clock sync period: {} ms", deployment.clock.sync_period_ms);
    println!("   ├─ Aggregation period: {} ms", interval * 2);
    println!(
        "   ├─ Match threshold: {} ms",
        deployment.aggregator.threshold_for(interval)
    );
    println!(
        "   └─ Buffers: {} samples/device, {} buckets history",
        deployment.buffer.device_capacity, deployment.buffer.history_capacity
    );

    println!("\n📱 Peers ({})", deployment.peers.len());
    if args.peers {
        for (i, peer) in deployment.peers.iter().enumerate() {
            let is_last = i == deployment.peers.len() - 1;
            let prefix = if is_last { "└─" } else { "├─" };
            let supported = if peer.supported_sensors.is_empty() {
                "all sensors".to_string()
            } else {
                kind_names(&peer.supported_sensors).join(", ")
            };
            println!(
                "   {} {} (skew {:+} ms, latency {} ms, {})",
                prefix, peer.name, peer.clock_skew_ms, peer.latency_ms, supported
            );
        }
    }

    if !deployment.sinks.is_empty() {
        println!("\n📤 Sinks ({})", deployment.sinks.len());
        if args.sinks {
            for (i, sink) in deployment.sinks.iter().enumerate() {
                let is_last = i == deployment.sinks.len() - 1;
                let prefix = if is_last { "└─" } else { "├─" };
                println!("   {} {} ({:?})", prefix, sink.name, sink.sink_type);
            }
        }
    }

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::PeerProfile;

    #[test]
    fn test_info_respects_flags() {
        let mut deployment = DeploymentConfig::default();
        deployment.peers.push(PeerProfile {
            name: "phone-a".into(),
            clock_skew_ms: 40,
            latency_ms: 5,
            supported_sensors: Vec::new(),
            denied_sensors: Vec::new(),
        });

        let mut args = InfoArgs {
            config: "deploy.toml".into(),
            json: true,
            peers: false,
            sinks: false,
        };
        let info = build_config_info(&deployment, &args);
        assert!(info.peers.is_empty());
        assert_eq!(info.peer_count, 1);
        assert_eq!(info.timing.aggregation_period_ms, 200);
        assert_eq!(info.timing.threshold_ms, 200);

        args.peers = true;
        let info = build_config_info(&deployment, &args);
        assert_eq!(info.peers[0].name, "phone-a");
    }
}
