//! PostgreSQL job store
//!
//! Jobs live in the single `job_queue` table created by
//! `migrations/001_job_queue.sql`.

pub mod adapter;
pub mod client;
pub mod errors;
pub mod models;

pub use adapter::PostgreSQLJobStore;
pub use client::PostgreSQLClient;
pub use errors::classify_store_error;
pub use models::PostgreSQLJob;
