//! Configuration management for the job queue.
//!
//! # Overview
//!
//! Configuration comes from a TOML file with support for:
//! - Environment variable substitution (`${VAR_NAME}`)
//! - Layered overrides from `FHIR_JOBQUEUE_<SECTION>__<KEY>` variables
//! - Default values for optional settings
//! - Validation of every section on load
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use fhir_jobqueue::config::load_config;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("fhir-jobqueue.toml")?;
//!
//! println!("Lease: {}s", config.queue.lease_seconds);
//! if let Some(postgresql) = &config.postgresql {
//!     println!("Pool size: {}", postgresql.max_connections);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration Structure
//!
//! - [`ApplicationConfig`] - Log level and worker name
//! - [`PostgreSQLConfig`] - PostgreSQL job store
//! - [`CosmosDbConfig`] - Cosmos DB job store
//! - [`QueueConfig`] - Lease, heartbeat, retry, polling and admission settings
//! - [`LoggingConfig`] - Logging configuration
//!
//! # Example Configuration
//!
//! ```toml
//! environment = "production"
//! database_target = "postgresql"
//!
//! [application]
//! log_level = "info"
//!
//! [postgresql]
//! connection_string = "${FHIR_JOBQUEUE_PG_URL}"
//! ssl_mode = "require"
//!
//! [queue]
//! queue_types = ["export", "reindex"]
//! lease_seconds = 300
//! heartbeat_interval_seconds = 60
//!
//! [queue.admission]
//! max_running_roots = { export = 2 }
//! ```
//!
//! # Environment Overrides
//!
//! ```bash
//! export FHIR_JOBQUEUE_QUEUE__MAX_RUNNING_JOBS=8
//! export FHIR_JOBQUEUE_APPLICATION__LOG_LEVEL=debug
//! ```

pub mod loader;
pub mod schema;
pub mod secret;

pub use loader::{load_config, load_config_from_str};
pub use schema::{
    AdmissionConfig, ApplicationConfig, CosmosDbConfig, DatabaseTarget, Environment,
    JobQueueConfig, LoggingConfig, PollingConfig, PostgreSQLConfig, QueueConfig, RetryConfig,
};
pub use secret::{secret_string, secret_string_opt, SecretString, SecretValue};
