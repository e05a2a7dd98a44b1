//! Group progress and results
//!
//! A coordinator writes a [`CoordinatorReport`] into its own `result` every
//! time it looks at its children. [`GroupSummary`] is the read side used by
//! the `status` command.

use crate::domain::{GroupId, JobInfo, JobStatus, PartitionErrorDetail, QueueType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Number of jobs in each status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: usize,
    pub created: usize,
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    pub fn tally<'a>(jobs: impl IntoIterator<Item = &'a JobInfo>) -> Self {
        let mut counts = Self::default();
        for job in jobs {
            counts.total += 1;
            match job.status {
                JobStatus::Created => counts.created += 1,
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
                JobStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    pub fn terminal(&self) -> usize {
        self.completed + self.failed + self.cancelled
    }

    pub fn all_terminal(&self) -> bool {
        self.terminal() == self.total
    }
}

impl fmt::Display for StatusCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} partitions complete ({} running, {} queued, {} failed, {} cancelled)",
            self.completed, self.total, self.running, self.queued, self.failed, self.cancelled
        )
    }
}

/// Coordinator lifecycle as recorded in its `result`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorPhase {
    Monitoring,
    Completed,
    Failed,
    Cancelled,
}

/// Result of one completed partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionResult {
    pub job_id: i64,
    pub result: Value,
}

/// What a coordinator stores in its `result`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorReport {
    pub phase: CoordinatorPhase,

    #[serde(default)]
    pub progress: StatusCounts,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<PartitionErrorDetail>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<PartitionResult>,
}

impl CoordinatorReport {
    pub fn new(phase: CoordinatorPhase, progress: StatusCounts) -> Self {
        Self {
            phase,
            progress,
            message: None,
            errors: Vec::new(),
            results: Vec::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Parse a coordinator's stored result; `None` for anything else
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    pub fn to_json(&self) -> crate::domain::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Result stored by a failed partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionFailure {
    pub error: String,
}

impl PartitionFailure {
    pub fn to_json(&self) -> String {
        serde_json::json!({ "error": self.error }).to_string()
    }
}

/// Error message of a failed partition, from whatever it left in `result`
pub fn partition_error(job: &JobInfo) -> PartitionErrorDetail {
    let message = match job.result.as_deref() {
        None => "partition failed without reporting an error".to_string(),
        Some(raw) => serde_json::from_str::<PartitionFailure>(raw)
            .map(|failure| failure.error)
            .unwrap_or_else(|_| raw.to_string()),
    };
    PartitionErrorDetail::new(job.id.value(), message)
}

/// Read model of one group for status reporting
#[derive(Debug, Clone)]
pub struct GroupSummary {
    pub queue_type: QueueType,
    pub group_id: GroupId,
    /// Status of the root job, which is the status of the whole operation
    pub status: JobStatus,
    pub cancel_requested: bool,
    pub partitions: StatusCounts,
    pub errors: Vec<PartitionErrorDetail>,
    pub report: Option<CoordinatorReport>,
}

impl GroupSummary {
    /// Summarize a group; `None` when it has no root
    pub fn from_jobs(jobs: &[JobInfo]) -> Option<Self> {
        let root = jobs.iter().find(|job| job.is_root())?;
        let partitions: Vec<&JobInfo> = jobs.iter().filter(|job| !job.is_root()).collect();

        let errors = partitions
            .iter()
            .filter(|job| job.status == JobStatus::Failed)
            .map(|job| partition_error(job))
            .collect();

        Some(Self {
            queue_type: root.queue_type,
            group_id: root.group_id,
            status: root.status,
            cancel_requested: root.cancel_requested,
            partitions: StatusCounts::tally(partitions.iter().copied()),
            errors,
            report: root.result.as_deref().and_then(CoordinatorReport::parse),
        })
    }

    /// Log the summary
    pub fn log_summary(&self) {
        tracing::info!(
            queue_type = %self.queue_type,
            group_id = %self.group_id,
            status = %self.status,
            partitions = self.partitions.total,
            completed = self.partitions.completed,
            failed = self.partitions.failed,
            "Job group status"
        );

        for error in &self.errors {
            tracing::warn!(job_id = error.job_id, error = %error.message, "Partition failed");
        }
    }
}

impl fmt::Display for GroupSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Group {} ({})", self.group_id, self.queue_type)?;
        writeln!(f, "  Status: {}", self.status)?;
        if self.cancel_requested && !self.status.is_terminal() {
            writeln!(f, "  Cancellation requested")?;
        }
        writeln!(f, "  Progress: {}", self.partitions)?;
        if let Some(message) = self.report.as_ref().and_then(|r| r.message.as_deref()) {
            writeln!(f, "  Message: {message}")?;
        }
        if !self.errors.is_empty() {
            writeln!(f, "  Errors:")?;
            for error in &self.errors {
                writeln!(f, "    - job {}: {}", error.job_id, error.message)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobId;
    use chrono::Utc;

    fn job(id: i64, status: JobStatus, result: Option<&str>) -> JobInfo {
        let now = Utc::now();
        JobInfo {
            id: JobId::new(id),
            queue_type: QueueType::Export,
            group_id: GroupId::new(1),
            status,
            definition: "{}".to_string(),
            result: result.map(str::to_string),
            version: 2,
            heartbeat_at: now,
            cancel_requested: false,
            failure_count: 0,
            created_at: now,
            available_at: now,
            started_at: None,
            ended_at: None,
            worker: None,
        }
    }

    #[test]
    fn test_counts_by_status() {
        let jobs = vec![
            job(2, JobStatus::Completed, None),
            job(3, JobStatus::Running, None),
            job(4, JobStatus::Failed, None),
        ];
        let counts = StatusCounts::tally(&jobs);
        assert_eq!(counts.total, 3);
        assert_eq!(counts.terminal(), 2);
        assert!(!counts.all_terminal());
        assert!(counts.to_string().starts_with("1 of 3 partitions complete"));
    }

    #[test]
    fn test_partition_error_prefers_structured_message() {
        let structured = job(5, JobStatus::Failed, Some("{\"error\":\"disk full\"}"));
        assert_eq!(partition_error(&structured).message, "disk full");

        let raw = job(6, JobStatus::Failed, Some("boom"));
        assert_eq!(partition_error(&raw).message, "boom");

        let silent = job(7, JobStatus::Failed, None);
        assert!(partition_error(&silent).message.contains("without"));
    }

    #[test]
    fn test_group_summary_reports_root_status_and_errors() {
        let report = CoordinatorReport::new(
            CoordinatorPhase::Failed,
            StatusCounts::tally(&[job(2, JobStatus::Failed, None)]),
        )
        .with_message("1 of 1 partitions failed");

        let jobs = vec![
            job(1, JobStatus::Failed, Some(&report.to_json().unwrap())),
            job(2, JobStatus::Failed, Some("{\"error\":\"bad range\"}")),
            job(3, JobStatus::Completed, Some("{}")),
        ];

        let summary = GroupSummary::from_jobs(&jobs).unwrap();
        assert_eq!(summary.status, JobStatus::Failed);
        assert_eq!(summary.partitions.total, 2);
        assert_eq!(summary.errors, vec![PartitionErrorDetail::new(2, "bad range")]);
        assert_eq!(summary.report.unwrap().phase, CoordinatorPhase::Failed);

        assert!(GroupSummary::from_jobs(&jobs[1..]).is_none());
    }

    #[test]
    fn test_display_lists_errors() {
        let jobs = vec![
            job(1, JobStatus::Running, None),
            job(2, JobStatus::Failed, Some("{\"error\":\"timeout talking to store\"}")),
        ];
        let text = GroupSummary::from_jobs(&jobs).unwrap().to_string();
        assert!(text.contains("Status: running"));
        assert!(text.contains("job 2: timeout talking to store"));
    }
}
