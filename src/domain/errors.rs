//! Domain error types
//!
//! This module defines the error hierarchy for the job queue. Backend errors
//! are classified into [`StoreError`] before they leave an adapter, so no
//! caller ever branches on a vendor-specific error type.

use thiserror::Error;

/// Main job queue error type
///
/// This is the primary error type used throughout the crate.
#[derive(Debug, Error)]
pub enum JobQueueError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Job store errors, already classified by the backend
    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    /// The caller's lease was reclaimed by another worker
    #[error("Lease lost for job {job_id}")]
    LeaseLost { job_id: i64 },

    /// The planner failed before any child existed
    #[error("Planning failed: {0}")]
    Planning(String),

    /// A single partition failed permanently
    #[error("Partition failed: {0}")]
    Partition(String),

    /// A coordinator observed at least one failed child
    #[error("{failed} of {total} partitions failed")]
    Aggregate { failed: usize, total: usize },

    /// A definition referenced a job type nobody registered
    #[error("Unknown job type: {0}")]
    UnknownJobType(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic errors with context
    #[error("{0}")]
    Other(String),
}

impl JobQueueError {
    /// Whether retrying the same call later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, JobQueueError::Store(e) if e.kind() == StoreErrorKind::Transient)
    }
}

/// Classification of a backend failure
///
/// Every backend provides one `classify_store_error` function mapping its
/// native errors onto these kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// Store unavailable, throttled or timed out; retry with backoff
    Transient,
    /// Optimistic concurrency check failed
    VersionConflict,
    /// Record, table or container does not exist
    NotFound,
    /// Anything else; do not retry
    Fatal,
}

/// Job store errors
///
/// Errors that occur when talking to a job store backend.
/// These errors don't expose third-party driver types.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store unavailable or throttled
    #[error("Transient store failure: {0}")]
    Transient(String),

    /// A conditional write lost a race
    #[error("Version conflict: {0}")]
    VersionConflict(String),

    /// Record or container missing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unrecoverable store failure
    #[error("Fatal store failure: {0}")]
    Fatal(String),
}

impl StoreError {
    /// Build an error of the given classification
    pub fn from_kind(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            StoreErrorKind::Transient => StoreError::Transient(message),
            StoreErrorKind::VersionConflict => StoreError::VersionConflict(message),
            StoreErrorKind::NotFound => StoreError::NotFound(message),
            StoreErrorKind::Fatal => StoreError::Fatal(message),
        }
    }

    /// The classification of this error
    pub fn kind(&self) -> StoreErrorKind {
        match self {
            StoreError::Transient(_) => StoreErrorKind::Transient,
            StoreError::VersionConflict(_) => StoreErrorKind::VersionConflict,
            StoreError::NotFound(_) => StoreErrorKind::NotFound,
            StoreError::Fatal(_) => StoreErrorKind::Fatal,
        }
    }
}

/// Error detail recorded for one failed partition
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PartitionErrorDetail {
    /// Child job that failed
    pub job_id: i64,

    /// Error message reported by the executor
    pub message: String,
}

impl PartitionErrorDetail {
    /// Creates a new partition error detail
    pub fn new(job_id: i64, message: impl Into<String>) -> Self {
        Self {
            job_id,
            message: message.into(),
        }
    }
}

// Conversion from std::io::Error
impl From<std::io::Error> for JobQueueError {
    fn from(err: std::io::Error) -> Self {
        JobQueueError::Io(err.to_string())
    }
}

// Conversion from serde_json::Error
impl From<serde_json::Error> for JobQueueError {
    fn from(err: serde_json::Error) -> Self {
        JobQueueError::Serialization(err.to_string())
    }
}

// Conversion from toml parse errors
impl From<toml::de::Error> for JobQueueError {
    fn from(err: toml::de::Error) -> Self {
        JobQueueError::Configuration(format!("TOML parse error: {err}"))
    }
}

impl From<config::ConfigError> for JobQueueError {
    fn from(err: config::ConfigError) -> Self {
        JobQueueError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = JobQueueError::Configuration("Invalid config".to_string());
        assert_eq!(err.to_string(), "Configuration error: Invalid config");

        let err = JobQueueError::Aggregate {
            failed: 1,
            total: 2,
        };
        assert_eq!(err.to_string(), "1 of 2 partitions failed");
    }

    #[test]
    fn test_store_error_conversion() {
        let store_err = StoreError::Transient("connection reset".to_string());
        let err: JobQueueError = store_err.into();
        assert!(matches!(err, JobQueueError::Store(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_store_error_kind_round_trip() {
        for kind in [
            StoreErrorKind::Transient,
            StoreErrorKind::VersionConflict,
            StoreErrorKind::NotFound,
            StoreErrorKind::Fatal,
        ] {
            assert_eq!(StoreError::from_kind(kind, "x").kind(), kind);
        }
    }

    #[test]
    fn test_fatal_is_not_transient() {
        let err: JobQueueError = StoreError::Fatal("syntax error".to_string()).into();
        assert!(!err.is_transient());
        assert!(!JobQueueError::Other("x".to_string()).is_transient());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let err: JobQueueError = io_err.into();
        assert!(matches!(err, JobQueueError::Io(_)));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: JobQueueError = json_err.into();
        assert!(matches!(err, JobQueueError::Serialization(_)));
    }

    #[test]
    fn test_toml_error_conversion() {
        let toml_err = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let err: JobQueueError = toml_err.into();
        assert!(err.to_string().contains("TOML parse error"));
    }
}
