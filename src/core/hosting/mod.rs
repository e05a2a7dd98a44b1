//! Worker process hosting

pub mod host;

pub use host::{HostReport, HostSettings, JobHost};
