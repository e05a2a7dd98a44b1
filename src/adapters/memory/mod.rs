//! In-memory job store

pub mod store;

pub use store::MemoryJobStore;
