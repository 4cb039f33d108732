//! `run` command implementation.

use std::time::Duration;

use anyhow::{Context, Result};
use contracts::DeploymentConfig;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::simulation::{Simulation, SimulationConfig};

/// Execute the `run` command
pub async fn run_simulation(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let deployment = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let sensor_kind = args.sensor.unwrap_or(deployment.coordinator.sensor_kind);
    let interval_ms = args
        .interval_ms
        .unwrap_or(deployment.coordinator.default_sample_interval_ms);
    if interval_ms == 0 {
        anyhow::bail!("--interval-ms must be greater than zero");
    }

    info!(
        coordinator = %deployment.coordinator.display_name,
        peers = deployment.peers.len(),
        sinks = deployment.sinks.len(),
        sensor = %sensor_kind,
        interval_ms,
        "Configuration loaded"
    );

    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&deployment, sensor_kind, interval_ms);
        return Ok(());
    }

    if deployment.peers.is_empty() {
        warn!("No peers configured - only the coordinator will contribute");
    }

    let simulation = Simulation::new(SimulationConfig {
        deployment,
        duration: (args.duration_secs > 0).then(|| Duration::from_secs(args.duration_secs)),
        sensor_kind,
        interval_ms,
        metrics_port: (args.metrics_port > 0).then_some(args.metrics_port),
    });

    info!("Starting deployment...");
    let stats = simulation
        .run(shutdown_signal())
        .await
        .context("Deployment run failed")?;

    info!(
        buckets = stats.buckets,
        duration_secs = stats.duration.as_secs_f64(),
        rate = format!("{:.2}", stats.bucket_rate()),
        "Run completed successfully"
    );
    stats.print_summary();

    info!("Peer Syncer finished");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM. If a handler cannot be installed that
/// branch never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(
    deployment: &DeploymentConfig,
    sensor_kind: contracts::SensorKind,
    interval_ms: u64,
) {
    println!("\n=== Configuration Summary ===\n");
    println!("Coordinator:");
    println!("  Name: {}", deployment.coordinator.display_name);
    println!(
        "  Self-contributing: {}",
        deployment.coordinator.self_contributing
    );
    println!("  Sensor: {} every {} ms", sensor_kind, interval_ms);
    println!("  Sync period: {} ms", deployment.clock.sync_period_ms);

    println!("\nPeers ({}):", deployment.peers.len());
    for peer in &deployment.peers {
        println!(
            "  - {} (skew {} ms, latency {} ms)",
            peer.name, peer.clock_skew_ms, peer.latency_ms
        );
    }

    if !deployment.sinks.is_empty() {
        println!("\nSinks ({}):", deployment.sinks.len());
        for sink in &deployment.sinks {
            println!("  - {} ({:?})", sink.name, sink.sink_type);
        }
    }

    println!();
}
