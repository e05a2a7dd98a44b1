//! Job store backends
//!
//! - [`database`] - the [`database::JobStore`] trait and the factory
//! - [`postgresql`] - one table, row locks with `SKIP LOCKED`
//! - [`cosmosdb`] - one document per job group, etag preconditions
//! - [`memory`] - process-local store for tests and development
//!
//! Every backend classifies its native errors into
//! [`crate::domain::StoreError`] before returning them.
//!
//! ```rust,no_run
//! use fhir_jobqueue::adapters::database::create_job_store;
//! use fhir_jobqueue::config::JobQueueConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = JobQueueConfig::from_file("fhir-jobqueue.toml")?;
//! let store = create_job_store(&config).await?;
//! store.ensure_schema().await?;
//! # Ok(())
//! # }
//! ```

pub mod cosmosdb;
pub mod database;
pub mod memory;
pub mod postgresql;
