//! Azure Cosmos DB job store
//!
//! One container partitioned by `/queue_type`; each job group is a single
//! document updated with etag preconditions.

pub mod adapter;
pub mod client;
pub mod errors;
pub mod models;

pub use adapter::CosmosJobStore;
pub use client::CosmosDbClient;
pub use errors::classify_store_error;
pub use models::{CosmosJob, CosmosJobGroup};
