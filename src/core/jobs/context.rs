//! What an executor sees while it runs one partition

use crate::domain::{JobInfo, JobQueueError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tokio::sync::watch;

/// State of the lease as last reported by the heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseSignal {
    Active,
    /// Someone asked the group to stop
    CancelRequested,
    /// Another worker owns the job now; nothing more may be written
    LeaseLost,
}

/// Why an executor stopped without a result
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    /// Worth another attempt; the job is abandoned and its lease expires
    #[error("transient failure: {0}")]
    Transient(String),

    /// Retrying cannot help; the partition fails
    #[error("{0}")]
    Permanent(String),

    /// Stopped cooperatively after a cancellation request
    #[error("cancelled")]
    Cancelled,

    /// Stopped because the lease was reclaimed
    #[error("lease lost")]
    LeaseLost,
}

impl From<JobQueueError> for ExecutionError {
    fn from(err: JobQueueError) -> Self {
        match err {
            JobQueueError::LeaseLost { .. } => ExecutionError::LeaseLost,
            e if e.is_transient() => ExecutionError::Transient(e.to_string()),
            e => ExecutionError::Permanent(e.to_string()),
        }
    }
}

/// How a single invocation of a job ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed,
    Cancelled,
    /// Coordinator released itself to check its children later
    Requeued,
    /// Left running for its lease to expire so it is retried
    Abandoned,
    /// A compare-and-swap found a newer version; someone else owns the job
    LeaseLost,
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobOutcome::Completed => "completed",
            JobOutcome::Failed => "failed",
            JobOutcome::Cancelled => "cancelled",
            JobOutcome::Requeued => "requeued",
            JobOutcome::Abandoned => "abandoned",
            JobOutcome::LeaseLost => "lease_lost",
        };
        write!(f, "{name}")
    }
}

/// Whether a job has failed often enough to stop retrying it
pub fn over_failure_limit(job: &JobInfo, max_failure_count: u32) -> bool {
    job.failure_count > max_failure_count
}

/// Handle given to an executor for one attempt
///
/// Checkpoints saved here are written by the next heartbeat. The previous
/// attempt's last checkpoint is available through [`Self::checkpoint`].
pub struct ExecutionContext {
    job: JobInfo,
    signals: watch::Receiver<LeaseSignal>,
    checkpoints: watch::Sender<Option<String>>,
}

impl ExecutionContext {
    pub fn new(
        job: JobInfo,
        signals: watch::Receiver<LeaseSignal>,
        checkpoints: watch::Sender<Option<String>>,
    ) -> Self {
        Self {
            job,
            signals,
            checkpoints,
        }
    }

    /// Context with no heartbeat behind it
    pub fn detached(job: JobInfo) -> Self {
        let (_, signals) = watch::channel(LeaseSignal::Active);
        let (checkpoints, _) = watch::channel(None);
        Self::new(job, signals, checkpoints)
    }

    pub fn job(&self) -> &JobInfo {
        &self.job
    }

    /// Checkpoint left in `result` by an earlier attempt
    pub fn checkpoint<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match self.job.result.as_deref() {
            None => Ok(None),
            Some(raw) => serde_json::from_str(raw).map(Some).map_err(|e| {
                JobQueueError::Serialization(format!(
                    "Invalid checkpoint for job {}: {e}",
                    self.job.id
                ))
            }),
        }
    }

    /// Stage a checkpoint for the next heartbeat
    pub fn save_checkpoint<T: Serialize>(&self, checkpoint: &T) -> Result<()> {
        let raw = serde_json::to_string(checkpoint)?;
        self.checkpoints.send_replace(Some(raw));
        Ok(())
    }

    pub fn signal(&self) -> LeaseSignal {
        *self.signals.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.job.cancel_requested || self.signal() == LeaseSignal::CancelRequested
    }

    pub fn lease_lost(&self) -> bool {
        self.signal() == LeaseSignal::LeaseLost
    }

    /// The reason to stop, if any
    pub fn should_stop(&self) -> Option<ExecutionError> {
        if self.lease_lost() {
            Some(ExecutionError::LeaseLost)
        } else if self.is_cancelled() {
            Some(ExecutionError::Cancelled)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GroupId, JobId, JobStatus, QueueType, StoreError};
    use chrono::Utc;

    fn job(result: Option<&str>) -> JobInfo {
        let now = Utc::now();
        JobInfo {
            id: JobId::new(2),
            queue_type: QueueType::Reindex,
            group_id: GroupId::new(1),
            status: JobStatus::Running,
            definition: "{}".to_string(),
            result: result.map(str::to_string),
            version: 3,
            heartbeat_at: now,
            cancel_requested: false,
            failure_count: 0,
            created_at: now,
            available_at: now,
            started_at: Some(now),
            ended_at: None,
            worker: Some("w".to_string()),
        }
    }

    #[test]
    fn test_checkpoint_roundtrip_through_channel() {
        let (_signal_tx, signals) = watch::channel(LeaseSignal::Active);
        let (checkpoints, mut staged) = watch::channel(None);
        let ctx = ExecutionContext::new(job(Some("{\"next_id\":40}")), signals, checkpoints);

        let previous: Option<serde_json::Value> = ctx.checkpoint().unwrap();
        assert_eq!(previous.unwrap()["next_id"], 40);

        ctx.save_checkpoint(&serde_json::json!({"next_id": 80})).unwrap();
        assert!(staged.has_changed().unwrap());
        assert_eq!(
            staged.borrow_and_update().as_deref(),
            Some("{\"next_id\":80}")
        );
    }

    #[test]
    fn test_invalid_checkpoint_is_serialization_error() {
        let ctx = ExecutionContext::detached(job(Some("not json")));
        let err = ctx.checkpoint::<serde_json::Value>().unwrap_err();
        assert!(matches!(err, JobQueueError::Serialization(_)));
    }

    #[test]
    fn test_signals_drive_should_stop() {
        let (signal_tx, signals) = watch::channel(LeaseSignal::Active);
        let (checkpoints, _) = watch::channel(None);
        let ctx = ExecutionContext::new(job(None), signals, checkpoints);
        assert_eq!(ctx.should_stop(), None);

        signal_tx.send(LeaseSignal::CancelRequested).unwrap();
        assert_eq!(ctx.should_stop(), Some(ExecutionError::Cancelled));

        signal_tx.send(LeaseSignal::LeaseLost).unwrap();
        assert_eq!(ctx.should_stop(), Some(ExecutionError::LeaseLost));
    }

    #[test]
    fn test_store_errors_map_to_execution_errors() {
        let transient: ExecutionError =
            JobQueueError::Store(StoreError::Transient("busy".to_string())).into();
        assert!(matches!(transient, ExecutionError::Transient(_)));

        let permanent: ExecutionError = JobQueueError::Validation("bad".to_string()).into();
        assert_eq!(permanent, ExecutionError::Permanent("Validation error: bad".to_string()));

        let lost: ExecutionError = JobQueueError::LeaseLost { job_id: 2 }.into();
        assert_eq!(lost, ExecutionError::LeaseLost);
    }

    #[test]
    fn test_failure_limit() {
        let mut job = job(None);
        job.failure_count = 3;
        assert!(!over_failure_limit(&job, 3));
        job.failure_count = 4;
        assert!(over_failure_limit(&job, 3));
    }
}
