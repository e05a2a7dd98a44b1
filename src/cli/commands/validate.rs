//! Validate config command implementation
//!
//! This module implements the `validate-config` command for validating
//! the job queue configuration file.

use crate::config::load_config;
use crate::config::schema::DatabaseTarget;
use clap::Args;

/// Arguments for the validate-config command
#[derive(Args, Debug)]
pub struct ValidateArgs {}

impl ValidateArgs {
    /// Execute the validate-config command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!(config_path = %config_path, "Validating configuration");

        println!("🔍 Validating configuration file: {config_path}");
        println!();

        // Loading also validates every section
        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                println!("❌ Configuration is invalid");
                println!("   Error: {e}");
                return Ok(2);
            }
        };

        println!("✅ Configuration is valid");
        println!();
        println!("Configuration Summary:");
        println!("  Environment: {:?}", config.environment);
        println!("  Log Level: {}", config.application.log_level);
        println!("  Worker Name: {}", config.worker_name());

        match config.database_target {
            DatabaseTarget::CosmosDB => {
                if let Some(ref cosmos_config) = config.cosmosdb {
                    println!("  Database Target: CosmosDB");
                    println!("  Cosmos DB Endpoint: {}", cosmos_config.endpoint);
                    println!("  Cosmos DB Database: {}", cosmos_config.database_name);
                    println!("  Job Container: {}", cosmos_config.job_container);
                }
            }
            DatabaseTarget::PostgreSQL => {
                if let Some(ref pg_config) = config.postgresql {
                    use secrecy::ExposeSecret;
                    println!("  Database Target: PostgreSQL");
                    println!(
                        "  PostgreSQL Connection: {}",
                        pg_config
                            .connection_string
                            .expose_secret()
                            .as_str()
                            .split('@')
                            .next_back()
                            .unwrap_or("***")
                    );
                    println!("  Max Connections: {}", pg_config.max_connections);
                    println!("  SSL Mode: {}", pg_config.ssl_mode);
                }
            }
            DatabaseTarget::Memory => {
                println!("  Database Target: Memory (not durable)");
            }
        }

        println!("  Queue Types: {:?}", config.queue.queue_types);
        println!("  Lease: {}s", config.queue.lease_seconds);
        println!("  Heartbeat Interval: {}s", config.queue.heartbeat_interval_seconds);
        println!("  Max Failure Count: {}", config.queue.max_failure_count);
        println!("  Runners: {}", config.queue.max_running_jobs);
        if !config.queue.admission.max_running_roots.is_empty() {
            println!(
                "  Root Admission Caps: {:?}",
                config.queue.admission.max_running_roots
            );
        }
        println!();
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_valid_memory_config() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "database_target = \"memory\"").unwrap();

        let code = ValidateArgs {}
            .execute(file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn test_invalid_config_exit_code() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "database_target = \"postgresql\"").unwrap();

        let code = ValidateArgs {}
            .execute(file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(code, 2);
    }
}
