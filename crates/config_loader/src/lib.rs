//! # Config Loader
//!
//! Configuration loading and parsing module.
//!
//! Responsibilities:
//! - Parse TOML/JSON configuration files
//! - Validate configuration legality
//! - Produce a `DeploymentConfig`
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let config = ConfigLoader::load_from_path(Path::new("deployment.toml")).unwrap();
//! println!("Peers: {}", config.peers.len());
//! ```

mod parser;
mod validator;

pub use contracts::DeploymentConfig;
pub use parser::ConfigFormat;

use contracts::ContractError;
use std::path::Path;

/// Configuration loader
///
/// Provides static methods to load configuration from files or strings.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file path
    ///
    /// Automatically detects format from file extension (.toml / .json).
    ///
    /// # Errors
    /// - File read failure
    /// - Unsupported format
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_path(path: &Path) -> Result<DeploymentConfig, ContractError> {
        let format = Self::detect_format(path)?;
        let content = Self::read_file(path)?;
        Self::load_from_str(&content, format)
    }

    /// Load configuration from string
    ///
    /// # Errors
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<DeploymentConfig, ContractError> {
        let config = parser::parse(content, format)?;
        validator::validate(&config)?;
        Ok(config)
    }

    /// Validate an already-built config (e.g. after CLI overrides)
    pub fn validate(config: &DeploymentConfig) -> Result<(), ContractError> {
        validator::validate(config)
    }

    /// Serialize DeploymentConfig to TOML string
    pub fn to_toml(config: &DeploymentConfig) -> Result<String, ContractError> {
        toml::to_string_pretty(config)
            .map_err(|e| ContractError::config_parse(format!("TOML serialize error: {e}")))
    }

    /// Serialize DeploymentConfig to JSON string
    pub fn to_json(config: &DeploymentConfig) -> Result<String, ContractError> {
        serde_json::to_string_pretty(config)
            .map_err(|e| ContractError::config_parse(format!("JSON serialize error: {e}")))
    }
}

impl ConfigLoader {
    /// Infer configuration format from file extension
    fn detect_format(path: &Path) -> Result<ConfigFormat, ContractError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            ContractError::config_parse("cannot determine file format from extension")
        })?;

        ConfigFormat::from_extension(ext).ok_or_else(|| {
            ContractError::config_parse(format!("unsupported config format: .{ext}"))
        })
    }

    fn read_file(path: &Path) -> Result<String, ContractError> {
        Ok(std::fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_TOML: &str = r#"
[coordinator]
display_name = "bench"
default_sample_interval_ms = 50

[clock]
sync_period_ms = 500

[[peers]]
name = "phone-a"
clock_skew_ms = -300

[[peers]]
name = "phone-b"
clock_skew_ms = 80
latency_ms = 4

[[sinks]]
name = "log_sink"
sink_type = "log"
"#;

    #[test]
    fn test_load_from_str_toml() {
        let result = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        let config = result.unwrap();
        assert_eq!(config.coordinator.display_name, "bench");
        assert_eq!(config.clock.sync_period_ms, 500);
    }

    #[test]
    fn test_round_trip_toml() {
        let config = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml).unwrap();
        let serialized = ConfigLoader::to_toml(&config).unwrap();
        let config2 = ConfigLoader::load_from_str(&serialized, ConfigFormat::Toml).unwrap();
        assert_eq!(config.peers.len(), config2.peers.len());
        assert_eq!(config.peers[0].clock_skew_ms, config2.peers[0].clock_skew_ms);
    }

    #[test]
    fn test_round_trip_json() {
        let config = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml).unwrap();
        let json = ConfigLoader::to_json(&config).unwrap();
        let config2 = ConfigLoader::load_from_str(&json, ConfigFormat::Json).unwrap();
        assert_eq!(
            config.coordinator.display_name,
            config2.coordinator.display_name
        );
    }

    #[test]
    fn test_validation_runs_after_parse() {
        let content = r#"
[[peers]]
name = "dup"

[[peers]]
name = "dup"
"#;
        let result = ConfigLoader::load_from_str(content, ConfigFormat::Toml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("duplicate"));
    }

    #[test]
    fn test_load_from_path_detects_format() {
        let dir = std::env::temp_dir().join(format!("config_loader_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let good = dir.join("deployment.toml");
        std::fs::write(&good, MINIMAL_TOML).unwrap();
        assert!(ConfigLoader::load_from_path(&good).is_ok());

        let bad = dir.join("deployment.yaml");
        std::fs::write(&bad, MINIMAL_TOML).unwrap();
        let err = ConfigLoader::load_from_path(&bad).unwrap_err().to_string();
        assert!(err.contains("unsupported config format"), "got: {err}");

        std::fs::remove_dir_all(&dir).ok();
    }
}
