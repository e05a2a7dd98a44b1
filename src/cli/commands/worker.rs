//! Worker command implementation
//!
//! This module implements the `worker` command, which runs a job host
//! against the configured store until a shutdown signal arrives.

use crate::cli::commands::connect;
use crate::core::bulk::{register_bulk_operations, DryRunProcessor};
use crate::core::hosting::{HostSettings, JobHost};
use crate::core::jobs::JobRegistry;
use crate::core::queue::QueueClient;
use crate::domain::QueueType;
use clap::Args;
use tokio::sync::watch;

/// Arguments for the worker command
#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// Override the queue types to poll (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub queue_types: Vec<QueueType>,

    /// Override the number of concurrent runners
    #[arg(long)]
    pub max_running_jobs: Option<usize>,

    /// Override the worker name recorded on leased jobs
    #[arg(long)]
    pub worker_name: Option<String>,
}

impl WorkerArgs {
    /// Execute the worker command
    pub async fn execute(
        &self,
        config_path: &str,
        shutdown_signal: watch::Receiver<bool>,
    ) -> anyhow::Result<i32> {
        tracing::info!("Starting worker command");

        let (config, store) = match connect(config_path).await {
            Ok(connected) => connected,
            Err(code) => return Ok(code),
        };

        if let Err(e) = store.ensure_schema().await {
            tracing::error!(error = %e, backend = store.backend_name(), "Schema setup failed");
            eprintln!("❌ Failed to prepare the job store: {e}");
            return Ok(4);
        }

        let worker = self
            .worker_name
            .clone()
            .unwrap_or_else(|| config.worker_name());
        let client = match QueueClient::new(store, worker, &config.queue) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Configuration validation failed: {e}");
                return Ok(2);
            }
        };

        let mut settings = match HostSettings::from_config(&config.queue) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("Configuration validation failed: {e}");
                return Ok(2);
            }
        };
        if !self.queue_types.is_empty() {
            tracing::info!(queue_types = ?self.queue_types, "Overriding queue types from CLI");
            settings.queue_types = self.queue_types.clone();
        }
        if let Some(runners) = self.max_running_jobs {
            tracing::info!(runners, "Overriding runner count from CLI");
            settings.max_running_jobs = runners.max(1);
        }

        let mut registry = JobRegistry::new();
        register_bulk_operations(&mut registry, DryRunProcessor);

        println!(
            "🚀 Worker {} polling {:?} with {} runner(s)",
            client.worker(),
            settings.queue_types,
            settings.max_running_jobs
        );

        let host = JobHost::new(client, registry, settings);
        match host.run(shutdown_signal).await {
            Ok(report) => {
                println!();
                println!("Worker stopped:");
                println!("  Completed: {}", report.completed);
                println!("  Failed: {}", report.failed);
                println!("  Cancelled: {}", report.cancelled);
                println!("  Requeued: {}", report.requeued);
                println!("  Abandoned: {}", report.abandoned);
                println!("  Lease lost: {}", report.lease_lost);
                println!("  Errors: {}", report.errors);
                Ok(0)
            }
            Err(e) => {
                tracing::error!(error = %e, "Worker failed");
                eprintln!("❌ Worker failed: {e}");
                Ok(5)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_args_defaults() {
        let args = WorkerArgs {
            queue_types: Vec::new(),
            max_running_jobs: None,
            worker_name: None,
        };
        assert!(args.queue_types.is_empty());
        assert!(args.max_running_jobs.is_none());
    }

    #[tokio::test]
    async fn test_missing_config_is_configuration_error() {
        let args = WorkerArgs {
            queue_types: Vec::new(),
            max_running_jobs: None,
            worker_name: None,
        };
        let (_tx, rx) = watch::channel(false);
        let code = args.execute("/nonexistent/fhir-jobqueue.toml", rx).await.unwrap();
        assert_eq!(code, 2);
    }
}
