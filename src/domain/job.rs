//! Job record model
//!
//! [`JobInfo`] is the only persisted entity of the queue. Every backend
//! stores exactly these fields, whatever its physical layout.

use crate::domain::ids::{GroupId, JobId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Operation family a job belongs to
///
/// Each queue type is an independent pool of work items; job ids are unique
/// within a queue type only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueType {
    /// Bulk `$export`
    Export,
    /// Search-index rebuild
    Reindex,
    /// Bulk `$import`
    Import,
    /// Bulk delete
    BulkDelete,
}

impl QueueType {
    /// All queue types, in display order
    pub const ALL: [QueueType; 4] = [
        QueueType::Export,
        QueueType::Reindex,
        QueueType::Import,
        QueueType::BulkDelete,
    ];

    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueType::Export => "export",
            QueueType::Reindex => "reindex",
            QueueType::Import => "import",
            QueueType::BulkDelete => "bulk_delete",
        }
    }
}

impl fmt::Display for QueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "export" => Ok(QueueType::Export),
            "reindex" => Ok(QueueType::Reindex),
            "import" => Ok(QueueType::Import),
            "bulk_delete" | "bulkdelete" | "bulk-delete" => Ok(QueueType::BulkDelete),
            other => Err(format!(
                "Invalid queue type '{other}'. Must be one of: export, reindex, import, bulk_delete"
            )),
        }
    }
}

/// Lifecycle status of a job
///
/// Status is monotonic: once terminal, a record is never mutated again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Inserted but not yet released to workers
    Created,
    /// Waiting for a worker
    Queued,
    /// Leased by a worker
    Running,
    /// Finished successfully
    Completed,
    /// Finished with a permanent failure
    Failed,
    /// Finished because cancellation was requested
    Cancelled,
}

impl JobStatus {
    /// Whether the status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(JobStatus::Created),
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("Invalid job status '{other}'")),
        }
    }
}

/// A persisted, schedulable unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    /// Identifier, unique within `queue_type`
    pub id: JobId,

    /// Operation family
    pub queue_type: QueueType,

    /// Group shared with the coordinator and siblings
    pub group_id: GroupId,

    /// Lifecycle status
    pub status: JobStatus,

    /// Opaque JSON definition
    pub definition: String,

    /// Opaque JSON result, progress summary or checkpoint
    pub result: Option<String>,

    /// Optimistic concurrency version
    pub version: i64,

    /// Last lease refresh
    pub heartbeat_at: DateTime<Utc>,

    /// Cooperative cancellation flag
    pub cancel_requested: bool,

    /// Failed or abandoned attempts so far
    pub failure_count: u32,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Earliest time a queued job may be dequeued
    pub available_at: DateTime<Utc>,

    /// First time the job was leased
    pub started_at: Option<DateTime<Utc>>,

    /// Time the job reached a terminal status
    pub ended_at: Option<DateTime<Utc>>,

    /// Name of the worker holding (or last holding) the lease
    pub worker: Option<String>,
}

impl JobInfo {
    /// Whether this job is the root (coordinator) of its group
    pub fn is_root(&self) -> bool {
        self.id.value() == self.group_id.value()
    }

    /// Whether the job reached a terminal status
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Lease token for compare-and-swap calls made by the current holder
    pub fn lease(&self) -> LeaseToken {
        LeaseToken {
            queue_type: self.queue_type,
            job_id: self.id,
            version: self.version,
        }
    }

    /// Whether a running job's lease is older than `lease`
    pub fn lease_expired(&self, now: DateTime<Utc>, lease: std::time::Duration) -> bool {
        let lease = chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::MAX);
        self.status == JobStatus::Running && now - self.heartbeat_at > lease
    }
}

/// What a lease holder presents to every compare-and-swap operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseToken {
    /// Queue the job lives in
    pub queue_type: QueueType,

    /// Leased job
    pub job_id: JobId,

    /// Version observed by the holder
    pub version: i64,
}

impl LeaseToken {
    /// Same lease after a successful mutation bumped the version
    pub fn with_version(self, version: i64) -> Self {
        Self { version, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample_job() -> JobInfo {
        let now = Utc::now();
        JobInfo {
            id: JobId::new(10),
            queue_type: QueueType::Export,
            group_id: GroupId::new(10),
            status: JobStatus::Running,
            definition: "{}".to_string(),
            result: None,
            version: 3,
            heartbeat_at: now,
            cancel_requested: false,
            failure_count: 0,
            created_at: now,
            available_at: now,
            started_at: Some(now),
            ended_at: None,
            worker: Some("worker-1".to_string()),
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Created.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            JobStatus::Created,
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(JobStatus::from_str("paused").is_err());
    }

    #[test]
    fn test_queue_type_parse() {
        assert_eq!(QueueType::from_str("Export").unwrap(), QueueType::Export);
        assert_eq!(
            QueueType::from_str("bulk-delete").unwrap(),
            QueueType::BulkDelete
        );
        assert!(QueueType::from_str("defrag").is_err());
    }

    #[test]
    fn test_root_detection() {
        let mut job = sample_job();
        assert!(job.is_root());
        job.id = JobId::new(11);
        assert!(!job.is_root());
    }

    #[test]
    fn test_lease_token() {
        let job = sample_job();
        let lease = job.lease();
        assert_eq!(lease.version, 3);
        assert_eq!(lease.with_version(4).version, 4);
        assert_eq!(lease.job_id, job.id);
    }

    #[test]
    fn test_lease_expiry() {
        let mut job = sample_job();
        let now = Utc::now();
        job.heartbeat_at = now - chrono::Duration::seconds(5);
        assert!(job.lease_expired(now, Duration::from_secs(1)));
        assert!(!job.lease_expired(now, Duration::from_secs(60)));

        job.status = JobStatus::Queued;
        assert!(!job.lease_expired(now, Duration::from_secs(1)));
    }
}
