//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use contracts::SensorKind;
use std::path::PathBuf;

/// Peer Syncer - clock-synchronized sensor sampling across peer devices
#[derive(Parser, Debug)]
#[command(
    name = "peer-syncer",
    author,
    version,
    about = "Peer-to-peer sensor synchronization",
    long_about = "Synchronizes sensor sampling across a coordinator and its peers.\n\n\
                  Aligns participant clocks to the coordinator, collects their \n\
                  readings and groups them into time buckets dispatched to sinks."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "PEER_SYNCER_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "PEER_SYNCER_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a deployment with simulated peers
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = "config.toml",
        env = "PEER_SYNCER_CONFIG"
    )]
    pub config: PathBuf,

    /// Measurement length in seconds (0 = until Ctrl+C)
    #[arg(long, default_value = "10", env = "PEER_SYNCER_DURATION")]
    pub duration_secs: u64,

    /// Override the sensor kind from configuration
    #[arg(long, env = "PEER_SYNCER_SENSOR")]
    pub sensor: Option<SensorKind>,

    /// Override the sample interval from configuration
    #[arg(long, env = "PEER_SYNCER_INTERVAL_MS")]
    pub interval_ms: Option<u64>,

    /// Validate configuration and exit without running
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "PEER_SYNCER_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show simulated peer profiles
    #[arg(long)]
    pub peers: bool,

    /// Show sink configuration
    #[arg(long)]
    pub sinks: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_overrides_parse() {
        let cli = Cli::try_parse_from([
            "peer-syncer",
            "-v",
            "run",
            "--config",
            "deploy.toml",
            "--sensor",
            "microphone",
            "--interval-ms",
            "50",
            "--duration-secs",
            "3",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 1);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.config, PathBuf::from("deploy.toml"));
                assert_eq!(args.sensor, Some(SensorKind::Microphone));
                assert_eq!(args.interval_ms, Some(50));
                assert_eq!(args.duration_secs, 3);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_unknown_sensor_rejected() {
        assert!(Cli::try_parse_from(["peer-syncer", "run", "--sensor", "sonar"]).is_err());
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["peer-syncer", "-q", "-v", "info"]).is_err());
    }
}
