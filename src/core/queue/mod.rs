//! Queue client, empty-queue backoff and admission control

pub mod admission;
pub mod backoff;
pub mod client;

pub use admission::AdmissionController;
pub use backoff::BackoffPolicy;
pub use client::QueueClient;
