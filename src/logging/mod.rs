//! Logging and observability
//!
//! Structured logging through `tracing`:
//! - console output, human-readable or JSON
//! - JSON file logging with rotation
//! - `RUST_LOG` style filtering
//!
//! The macros below keep the field names of job lifecycle events identical
//! across the queue client, the coordinator and the worker, so log queries
//! can follow one job from lease to completion.
//!
//! # Example
//!
//! ```no_run
//! use fhir_jobqueue::logging::init_logging;
//! use fhir_jobqueue::config::LoggingConfig;
//!
//! let config = LoggingConfig::default();
//! let _guard = init_logging("info", &config).expect("Failed to initialize logging");
//!
//! tracing::info!("Worker started");
//! ```

pub mod structured;

pub use structured::{init_logging, parse_log_level, LoggingGuard};

/// Log a job lease acquired by this process
///
/// # Example
///
/// ```no_run
/// use fhir_jobqueue::log_job_leased;
/// use fhir_jobqueue::domain::JobInfo;
///
/// # fn example(job: &JobInfo) {
/// log_job_leased!(job);
/// # }
/// ```
#[macro_export]
macro_rules! log_job_leased {
    ($job:expr) => {
        tracing::info!(
            queue_type = %$job.queue_type,
            job_id = %$job.id,
            group_id = %$job.group_id,
            version = $job.version,
            failure_count = $job.failure_count,
            root = $job.is_root(),
            "Job leased"
        );
    };
}

/// Log a job reaching a terminal status
///
/// # Example
///
/// ```no_run
/// use fhir_jobqueue::log_job_finished;
/// use fhir_jobqueue::domain::{JobInfo, JobStatus};
/// use std::time::Duration;
///
/// # fn example(job: &JobInfo) {
/// log_job_finished!(job, JobStatus::Completed, Duration::from_secs(3));
/// # }
/// ```
#[macro_export]
macro_rules! log_job_finished {
    ($job:expr, $status:expr, $duration:expr) => {
        tracing::info!(
            queue_type = %$job.queue_type,
            job_id = %$job.id,
            group_id = %$job.group_id,
            status = %$status,
            duration_ms = $duration.as_millis() as u64,
            "Job finished"
        );
    };
}

/// Log a lease that was reclaimed by another worker
///
/// # Example
///
/// ```no_run
/// use fhir_jobqueue::log_lease_lost;
/// use fhir_jobqueue::domain::{JobId, LeaseToken, QueueType};
///
/// let lease = LeaseToken { queue_type: QueueType::Export, job_id: JobId::new(4), version: 2 };
/// log_lease_lost!(lease, "heartbeat");
/// ```
#[macro_export]
macro_rules! log_lease_lost {
    ($lease:expr, $during:expr) => {
        tracing::warn!(
            queue_type = %$lease.queue_type,
            job_id = %$lease.job_id,
            version = $lease.version,
            during = $during,
            "Lease lost"
        );
    };
}

/// Log an error with context
///
/// # Example
///
/// ```no_run
/// use fhir_jobqueue::log_error_with_context;
/// use fhir_jobqueue::domain::JobQueueError;
///
/// let error = JobQueueError::Configuration("Invalid config".to_string());
/// log_error_with_context!(&error, "Failed to load configuration");
/// ```
#[macro_export]
macro_rules! log_error_with_context {
    ($error:expr, $context:expr) => {
        tracing::error!(
            error = %$error,
            context = $context,
            "Error occurred"
        );
    };
}

/// Log a retry attempt
///
/// # Example
///
/// ```no_run
/// use fhir_jobqueue::log_retry_attempt;
///
/// log_retry_attempt!(2, 3, "Connection timeout");
/// ```
#[macro_export]
macro_rules! log_retry_attempt {
    ($attempt:expr, $max_attempts:expr, $reason:expr) => {
        tracing::warn!(
            attempt = $attempt,
            max_attempts = $max_attempts,
            reason = %$reason,
            "Retrying operation"
        );
    };
}
