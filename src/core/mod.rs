//! Queue protocol and job execution.
//!
//! # Modules
//!
//! - [`queue`] - [`queue::QueueClient`] with retry, backoff and admission
//! - [`jobs`] - coordinator and worker jobs, the job registry, status reports
//! - [`hosting`] - [`hosting::JobHost`], the runner loop of a worker process
//! - [`bulk`] - range-partitioned bulk operations
//!
//! # Lifecycle of a group
//!
//! 1. **Enqueue**: a root definition is stored as a new group
//! 2. **Plan**: a host leases the root and its planner splits the work
//! 3. **Fan out**: the partitions are added to the group exactly once
//! 4. **Execute**: hosts lease partitions and run them under a heartbeat
//! 5. **Monitor**: the root requeues itself until every partition is terminal
//! 6. **Aggregate**: the root finishes with the combined result or errors
//!
//! # Example
//!
//! ```rust,no_run
//! use fhir_jobqueue::adapters::memory::MemoryJobStore;
//! use fhir_jobqueue::config::QueueConfig;
//! use fhir_jobqueue::core::bulk::{register_bulk_operations, DryRunProcessor};
//! use fhir_jobqueue::core::hosting::{HostSettings, JobHost};
//! use fhir_jobqueue::core::jobs::JobRegistry;
//! use fhir_jobqueue::core::queue::QueueClient;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = QueueConfig::default();
//! let client = QueueClient::new(Arc::new(MemoryJobStore::new()), "worker-1", &config)?;
//!
//! let mut registry = JobRegistry::new();
//! register_bulk_operations(&mut registry, DryRunProcessor);
//!
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let host = JobHost::new(client, registry, HostSettings::from_config(&config)?);
//! let report = host.run(shutdown_rx).await?;
//!
//! println!("Processed {} jobs", report.processed());
//! # Ok(())
//! # }
//! ```

pub mod bulk;
pub mod hosting;
pub mod jobs;
pub mod queue;
