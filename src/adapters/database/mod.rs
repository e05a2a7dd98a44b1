//! Job store abstraction layer
//!
//! A trait-based abstraction over the job table, so the queue client, the
//! coordinator and the worker run unchanged on PostgreSQL, Cosmos DB or the
//! in-memory store.

pub mod factory;
pub mod traits;

pub use factory::create_job_store;
pub use traits::{DequeueRequest, FanOut, HeartbeatOutcome, JobStore};
