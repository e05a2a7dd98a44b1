//! Error context extension trait
//!
//! Works like `anyhow::Context` for `Result<T, JobQueueError>`. Store errors
//! keep their classification when context is attached, so a transient
//! failure stays retryable after being wrapped.
//!
//! # Examples
//!
//! ```rust
//! use fhir_jobqueue::domain::Result;
//! use fhir_jobqueue::domain::context::ResultExt;
//!
//! fn read_file(path: &str) -> Result<String> {
//!     std::fs::read_to_string(path).context(format!("Failed to read file: {}", path))
//! }
//! ```

use crate::domain::errors::{JobQueueError, StoreError};
use crate::domain::result::Result;

/// Extension trait for adding context to `Result` types
pub trait ResultExt<T> {
    /// Add context to an error
    fn context<C>(self, context: C) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static;

    /// Add context lazily; `f` only runs on the error path
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<JobQueueError>,
{
    fn context<C>(self, context: C) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static,
    {
        self.map_err(|e| wrap(e.into(), context))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|e| wrap(e.into(), f()))
    }
}

fn wrap(base: JobQueueError, context: impl std::fmt::Display) -> JobQueueError {
    match base {
        JobQueueError::Store(inner) => {
            JobQueueError::Store(StoreError::from_kind(inner.kind(), format!("{context}: {inner}")))
        }
        JobQueueError::LeaseLost { .. } => base,
        other => JobQueueError::Other(format!("{context}: {other}")),
    }
}
