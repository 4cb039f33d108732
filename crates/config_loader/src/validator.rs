//! Config validation
//!
//! Rules:
//! - peer names unique, non-empty, and not the reserved coordinator id
//! - a peer cannot both lack and deny the same sensor
//! - intervals, periods and capacities > 0
//! - threshold_factor > 0, quantum_ms > 0
//! - sink names present and unique; file sinks carry a `path`

use std::collections::HashSet;

use contracts::{ContractError, DeploymentConfig, SinkType, COORDINATOR_ID};

/// Validate a DeploymentConfig
///
/// Returns the first error encountered, or Ok(()).
pub fn validate(config: &DeploymentConfig) -> Result<(), ContractError> {
    validate_coordinator(config)?;
    validate_timing(config)?;
    validate_capacities(config)?;
    validate_peers(config)?;
    validate_sinks(config)?;
    Ok(())
}

fn validate_coordinator(config: &DeploymentConfig) -> Result<(), ContractError> {
    if config.coordinator.display_name.trim().is_empty() {
        return Err(ContractError::config_validation(
            "coordinator.display_name",
            "display name cannot be empty",
        ));
    }
    if config.coordinator.default_sample_interval_ms == 0 {
        return Err(ContractError::config_validation(
            "coordinator.default_sample_interval_ms",
            "sample interval must be > 0",
        ));
    }
    Ok(())
}

fn validate_timing(config: &DeploymentConfig) -> Result<(), ContractError> {
    if config.clock.sync_period_ms == 0 {
        return Err(ContractError::config_validation(
            "clock.sync_period_ms",
            "sync period must be > 0",
        ));
    }

    let aggregator = &config.aggregator;
    if !(aggregator.threshold_factor.is_finite() && aggregator.threshold_factor > 0.0) {
        return Err(ContractError::config_validation(
            "aggregator.threshold_factor",
            format!(
                "threshold_factor must be a positive number, got {}",
                aggregator.threshold_factor
            ),
        ));
    }
    if aggregator.quantum_ms <= 0 {
        return Err(ContractError::config_validation(
            "aggregator.quantum_ms",
            format!("quantum_ms must be > 0, got {}", aggregator.quantum_ms),
        ));
    }
    Ok(())
}

fn validate_capacities(config: &DeploymentConfig) -> Result<(), ContractError> {
    if config.buffer.device_capacity == 0 {
        return Err(ContractError::config_validation(
            "buffer.device_capacity",
            "capacity must be > 0",
        ));
    }
    if config.buffer.history_capacity == 0 {
        return Err(ContractError::config_validation(
            "buffer.history_capacity",
            "capacity must be > 0",
        ));
    }
    Ok(())
}

fn validate_peers(config: &DeploymentConfig) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, peer) in config.peers.iter().enumerate() {
        if peer.name.trim().is_empty() {
            return Err(ContractError::config_validation(
                format!("peers[{idx}].name"),
                "peer name cannot be empty",
            ));
        }
        if peer.name == COORDINATOR_ID {
            return Err(ContractError::config_validation(
                format!("peers[name={}]", peer.name),
                "peer name is reserved for the coordinator",
            ));
        }
        if !seen.insert(&peer.name) {
            return Err(ContractError::config_validation(
                format!("peers[name={}]", peer.name),
                "duplicate peer name",
            ));
        }
        if let Some(kind) = peer
            .denied_sensors
            .iter()
            .find(|kind| !peer.supports(**kind))
        {
            return Err(ContractError::config_validation(
                format!("peers[{}].denied_sensors", peer.name),
                format!("sensor '{kind}' is denied but not supported"),
            ));
        }
    }
    Ok(())
}

fn validate_sinks(config: &DeploymentConfig) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, sink) in config.sinks.iter().enumerate() {
        if sink.name.is_empty() {
            return Err(ContractError::config_validation(
                format!("sinks[{idx}].name"),
                "sink name cannot be empty",
            ));
        }
        if !seen.insert(&sink.name) {
            return Err(ContractError::config_validation(
                format!("sinks[name={}]", sink.name),
                "duplicate sink name",
            ));
        }
        if sink.queue_capacity == 0 {
            return Err(ContractError::config_validation(
                format!("sinks[{}].queue_capacity", sink.name),
                "queue capacity must be > 0",
            ));
        }
        if sink.sink_type == SinkType::File && !sink.params.contains_key("path") {
            return Err(ContractError::config_validation(
                format!("sinks[{}].params.path", sink.name),
                "file sink requires a 'path' param",
            ));
        }
    }
    Ok(())
}
