// FHIR Job Queue - Durable job queue for FHIR bulk operations
// Copyright (c) 2025 FHIR Job Queue Contributors
// Licensed under the MIT License

//! # FHIR Job Queue
//!
//! A durable, distributed job queue for the long-running bulk operations of
//! a FHIR server: bulk export, reindex, bulk import and bulk delete.
//!
//! ## Overview
//!
//! A bulk operation is submitted as the **root job** of a new **group**. A
//! worker leases the root and runs it as a **coordinator**: it plans the
//! work into partitions, adds them to the group as **children** exactly
//! once, then requeues itself until every child is terminal and finally
//! aggregates their results. Children are leased by any worker process and
//! executed under a heartbeat, with checkpoints so a retried partition
//! resumes where the last attempt stopped.
//!
//! Mutual exclusion comes from optimistic concurrency on a per-job
//! `version`; a worker that crashes simply stops heartbeating and its lease
//! expires.
//!
//! ## Architecture
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`core`] - Queue client, coordinator and worker jobs, job host, bulk operations
//! - [`adapters`] - Job stores (PostgreSQL, Cosmos DB, in-memory)
//! - [`domain`] - Core domain types and errors
//! - [`config`] - Configuration management
//! - [`logging`] - Structured logging
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fhir_jobqueue::adapters::database::create_job_store;
//! use fhir_jobqueue::config::load_config;
//! use fhir_jobqueue::core::bulk::{BulkOperationRequest, BULK_COORDINATOR_TYPE};
//! use fhir_jobqueue::core::queue::QueueClient;
//! use fhir_jobqueue::domain::{JobDefinition, QueueType};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = load_config("fhir-jobqueue.toml")?;
//!     let store = create_job_store(&config).await?;
//!     let client = QueueClient::new(store, config.worker_name(), &config.queue)?;
//!
//!     let request = BulkOperationRequest {
//!         resource_types: vec!["Patient".to_string(), "Observation".to_string()],
//!         start_id: 0,
//!         end_id: 1_000_000,
//!         partition_size: 10_000,
//!         batch_size: 1_000,
//!     };
//!     let root = JobDefinition::from_payload(BULK_COORDINATOR_TYPE, &request)?;
//!     let group_id = client.enqueue_group(QueueType::Reindex, &[root]).await?;
//!
//!     println!("Submitted group {group_id}");
//!     Ok(())
//! }
//! ```
//!
//! ## Custom Job Types
//!
//! Register a [`core::jobs::Planner`] for a root type and an
//! [`core::jobs::Executor`] for its partitions:
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use fhir_jobqueue::core::jobs::{ExecutionContext, ExecutionError, Executor, JobRegistry};
//! use fhir_jobqueue::domain::JobDefinition;
//! use serde_json::{json, Value};
//! use std::sync::Arc;
//!
//! struct Purge;
//!
//! #[async_trait]
//! impl Executor for Purge {
//!     async fn execute(
//!         &self,
//!         _definition: &JobDefinition,
//!         ctx: &ExecutionContext,
//!     ) -> Result<Value, ExecutionError> {
//!         if let Some(stop) = ctx.should_stop() {
//!             return Err(stop);
//!         }
//!         Ok(json!({"purged": 0}))
//!     }
//! }
//!
//! let mut registry = JobRegistry::new();
//! registry.register_worker("purge-partition", Arc::new(Purge));
//! ```
//!
//! ## Error Handling
//!
//! Fallible operations return [`domain::Result`], backed by
//! [`domain::JobQueueError`]. Store failures carry a [`domain::StoreErrorKind`]
//! classification; transient ones are retried by the queue client.
//!
//! ## Logging
//!
//! Structured logging through `tracing`. Job lifecycle events use the
//! macros in [`logging`] so every event carries the same fields:
//!
//! ```rust,no_run
//! use tracing::{info, warn};
//!
//! info!(queue_type = "export", group_id = 42, "Group enqueued");
//! warn!(job_id = 43, "Heartbeat failed");
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod logging;
