//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::DeploymentConfig;
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    sensor_kind: String,
    sample_interval_ms: u64,
    peer_count: usize,
    sink_count: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(deployment) => {
            let warnings = collect_warnings(&deployment);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    version: format!("{:?}", deployment.version),
                    sensor_kind: deployment.coordinator.sensor_kind.to_string(),
                    sample_interval_ms: deployment.coordinator.default_sample_interval_ms,
                    peer_count: deployment.peers.len(),
                    sink_count: deployment.sinks.len(),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(deployment: &DeploymentConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    let kind = deployment.coordinator.sensor_kind;

    if deployment.sinks.is_empty() {
        warnings.push("No sinks configured - buckets are only kept in history".to_string());
    }

    if deployment.peers.is_empty() && !deployment.coordinator.self_contributing {
        warnings.push("No peers and coordinator does not contribute - buckets will be empty".to_string());
    }

    for peer in &deployment.peers {
        if !peer.supports(kind) {
            warnings.push(format!(
                "Peer '{}' does not support the default sensor '{}'",
                peer.name, kind
            ));
        } else if peer.denied_sensors.contains(&kind) {
            warnings.push(format!(
                "Peer '{}' denies access to the default sensor '{}'",
                peer.name, kind
            ));
        }
    }

    if let Some(native) = kind.default_interval_ms() {
        if native != deployment.coordinator.default_sample_interval_ms {
            warnings.push(format!(
                "Sensor '{}' always samples every {} ms; configured interval is ignored",
                kind, native
            ));
        }
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!(
                "  Sensor: {} every {} ms",
                summary.sensor_kind, summary.sample_interval_ms
            );
            println!("  Peers: {}", summary.peer_count);
            println!("  Sinks: {}", summary.sink_count);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
