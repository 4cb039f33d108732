//! Config parsing
//!
//! TOML is the primary format, JSON is accepted as well.

use contracts::{ContractError, DeploymentConfig};

/// Config file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML (recommended)
    Toml,
    /// JSON
    Json,
}

impl ConfigFormat {
    /// Infer format from a file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Parse TOML config
pub fn parse_toml(content: &str) -> Result<DeploymentConfig, ContractError> {
    toml::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("TOML parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// Parse JSON config
pub fn parse_json(content: &str) -> Result<DeploymentConfig, ContractError> {
    serde_json::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("JSON parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// Parse config according to `format`
pub fn parse(content: &str, format: ConfigFormat) -> Result<DeploymentConfig, ContractError> {
    match format {
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{SensorKind, SinkType};

    #[test]
    fn test_parse_toml_minimal() {
        let content = r#"
[coordinator]
display_name = "bench"
sensor_kind = "light"

[[peers]]
name = "phone-a"
clock_skew_ms = 250
latency_ms = 5

[[peers]]
name = "phone-b"
supported_sensors = ["accelerometer"]

[[sinks]]
name = "log_sink"
sink_type = "log"
"#;
        let result = parse_toml(content);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        let config = result.unwrap();
        assert_eq!(config.coordinator.display_name, "bench");
        assert_eq!(config.coordinator.sensor_kind, SensorKind::Light);
        assert!(config.coordinator.self_contributing);
        assert_eq!(config.peers.len(), 2);
        assert_eq!(config.peers[0].clock_skew_ms, 250);
        assert_eq!(config.peers[1].supported_sensors, vec![SensorKind::Accelerometer]);
        assert_eq!(config.sinks[0].sink_type, SinkType::Log);
        assert_eq!(config.sinks[0].queue_capacity, 100);
    }

    #[test]
    fn test_parse_empty_toml_uses_defaults() {
        let config = parse_toml("").unwrap();
        assert_eq!(config.clock.sync_period_ms, 1000);
        assert_eq!(config.buffer.device_capacity, 10);
        assert!(config.peers.is_empty());
    }

    #[test]
    fn test_parse_json_minimal() {
        let content = r#"{
            "coordinator": { "default_sample_interval_ms": 50 },
            "aggregator": { "threshold_factor": 3.0 },
            "peers": [{ "name": "p1", "denied_sensors": ["microphone"] }],
            "sinks": [{ "name": "log", "sink_type": "log" }]
        }"#;
        let result = parse_json(content);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        let config = result.unwrap();
        assert_eq!(config.coordinator.default_sample_interval_ms, 50);
        assert_eq!(config.aggregator.threshold_for(50), 150);
        assert_eq!(config.peers[0].denied_sensors, vec![SensorKind::Microphone]);
    }

    #[test]
    fn test_parse_toml_syntax_error() {
        let content = "invalid toml [[[";
        let result = parse_toml(content);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ContractError::ConfigParse { .. }));
    }

    #[test]
    fn test_unknown_sensor_kind_is_parse_error() {
        let content = r#"
[coordinator]
sensor_kind = "thermometer"
"#;
        assert!(matches!(
            parse_toml(content),
            Err(ContractError::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            ConfigFormat::from_extension("toml"),
            Some(ConfigFormat::Toml)
        );
        assert_eq!(
            ConfigFormat::from_extension("TOML"),
            Some(ConfigFormat::Toml)
        );
        assert_eq!(
            ConfigFormat::from_extension("json"),
            Some(ConfigFormat::Json)
        );
        assert_eq!(ConfigFormat::from_extension("yaml"), None);
    }
}
