//! CLI interface and argument parsing
//!
//! This module provides the command-line interface of the job queue using clap.

pub mod commands;

use clap::{Parser, Subcommand};

/// FHIR Job Queue - durable job queue for FHIR bulk operations
#[derive(Parser, Debug)]
#[command(name = "fhir-jobqueue")]
#[command(version, about, long_about = None)]
#[command(author = "FHIR Job Queue Contributors")]
pub struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "fhir-jobqueue.toml",
        env = "FHIR_JOBQUEUE_CONFIG"
    )]
    pub config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "FHIR_JOBQUEUE_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a worker process that leases and executes jobs
    Worker(commands::worker::WorkerArgs),

    /// Enqueue a new bulk operation
    Enqueue(commands::enqueue::EnqueueArgs),

    /// Show the status of a job group
    Status(commands::status::StatusArgs),

    /// Request cancellation of a job group
    Cancel(commands::cancel::CancelArgs),

    /// Validate configuration file
    ValidateConfig(commands::validate::ValidateArgs),

    /// Initialize a new configuration file
    Init(commands::init::InitArgs),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::QueueType;

    #[test]
    fn test_cli_parse_worker() {
        let cli = Cli::parse_from(["fhir-jobqueue", "worker"]);
        assert_eq!(cli.config, "fhir-jobqueue.toml");
        assert!(matches!(cli.command, Commands::Worker(_)));
    }

    #[test]
    fn test_cli_parse_with_config() {
        let cli = Cli::parse_from(["fhir-jobqueue", "--config", "custom.toml", "worker"]);
        assert_eq!(cli.config, "custom.toml");
    }

    #[test]
    fn test_cli_parse_with_log_level() {
        let cli = Cli::parse_from(["fhir-jobqueue", "--log-level", "debug", "worker"]);
        assert_eq!(cli.log_level, Some("debug".to_string()));
    }

    #[test]
    fn test_cli_parse_enqueue() {
        let cli = Cli::parse_from([
            "fhir-jobqueue",
            "enqueue",
            "--queue-type",
            "reindex",
            "--resource-types",
            "Patient,Observation",
            "--end-id",
            "5000",
        ]);
        match cli.command {
            Commands::Enqueue(args) => {
                assert_eq!(args.queue_type, QueueType::Reindex);
                assert_eq!(args.resource_types, vec!["Patient", "Observation"]);
                assert_eq!(args.end_id, Some(5000));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_parse_status() {
        let cli = Cli::parse_from([
            "fhir-jobqueue",
            "status",
            "--queue-type",
            "export",
            "--group-id",
            "42",
        ]);
        assert!(matches!(cli.command, Commands::Status(_)));
    }

    #[test]
    fn test_cli_rejects_unknown_queue_type() {
        let parsed = Cli::try_parse_from([
            "fhir-jobqueue",
            "cancel",
            "--queue-type",
            "everything",
            "--group-id",
            "1",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_cli_parse_validate_config() {
        let cli = Cli::parse_from(["fhir-jobqueue", "validate-config"]);
        assert!(matches!(cli.command, Commands::ValidateConfig(_)));
    }

    #[test]
    fn test_cli_parse_init() {
        let cli = Cli::parse_from(["fhir-jobqueue", "init"]);
        assert!(matches!(cli.command, Commands::Init(_)));
    }
}
