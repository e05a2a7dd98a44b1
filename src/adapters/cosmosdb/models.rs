//! Cosmos DB document models
//!
//! The job container is partitioned by `/queue_type`. Each job group is one
//! document so a coordinator's fan-out and every lease transition inside a
//! group is a single conditional replace. A per-queue sequence document
//! hands out record ids.

use crate::domain::{GroupId, JobId, JobInfo, JobQueueError, JobStatus, QueueType, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `doc_type` of group documents
pub const GROUP_DOC_TYPE: &str = "group";

/// `doc_type` of the id sequence document
pub const SEQUENCE_DOC_TYPE: &str = "sequence";

/// Document id of the per-queue sequence
pub const SEQUENCE_DOC_ID: &str = "job_id_sequence";

/// One job record embedded in its group document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CosmosJob {
    pub id: i64,
    pub status: JobStatus,
    pub definition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub version: i64,
    pub heartbeat_at: DateTime<Utc>,
    #[serde(default)]
    pub cancel_requested: bool,
    #[serde(default)]
    pub failure_count: u32,
    pub created_at: DateTime<Utc>,
    pub available_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
}

impl CosmosJob {
    /// A fresh `Queued` record
    pub fn queued(id: i64, definition: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            definition,
            result: None,
            version: 1,
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

    fn into_domain(self, queue_type: QueueType, group_id: i64) -> JobInfo {
        JobInfo {
            id: JobId::new(self.id),
            queue_type,
            group_id: GroupId::new(group_id),
            status: self.status,
            definition: self.definition,
            result: self.result,
            version: self.version,
            heartbeat_at: self.heartbeat_at,
            cancel_requested: self.cancel_requested,
            failure_count: self.failure_count,
            created_at: self.created_at,
            available_at: self.available_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
            worker: self.worker,
        }
    }
}

/// A job group document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CosmosJobGroup {
    /// Document id, the group id as a string
    pub id: String,

    /// Partition key
    pub queue_type: String,

    pub doc_type: String,

    pub group_id: i64,

    /// Whether any member is not yet terminal; dequeue only scans open groups
    #[serde(default)]
    pub open: bool,

    pub jobs: Vec<CosmosJob>,

    pub created_at: DateTime<Utc>,

    /// Concurrency token maintained by Cosmos DB
    #[serde(rename = "_etag", default, skip_serializing)]
    pub etag: Option<String>,
}

impl CosmosJobGroup {
    /// A new group holding `jobs`
    pub fn new(queue_type: QueueType, group_id: i64, jobs: Vec<CosmosJob>) -> Self {
        let now = Utc::now();
        let mut group = Self {
            id: group_id.to_string(),
            queue_type: queue_type.as_str().to_string(),
            doc_type: GROUP_DOC_TYPE.to_string(),
            group_id,
            open: true,
            jobs,
            created_at: now,
            etag: None,
        };
        group.refresh();
        group
    }

    /// Recompute derived fields after a mutation
    pub fn refresh(&mut self) {
        self.jobs.sort_by_key(|job| job.id);
        self.open = self.jobs.iter().any(|job| !job.status.is_terminal());
    }

    pub fn job(&self, id: i64) -> Option<&CosmosJob> {
        self.jobs.iter().find(|job| job.id == id)
    }

    pub fn job_mut(&mut self, id: i64) -> Option<&mut CosmosJob> {
        self.jobs.iter_mut().find(|job| job.id == id)
    }

    /// Whether the group has any member besides the root
    pub fn has_children(&self) -> bool {
        self.jobs.iter().any(|job| job.id != self.group_id)
    }

    fn parsed_queue_type(&self) -> Result<QueueType> {
        self.queue_type
            .parse()
            .map_err(|e: String| JobQueueError::Serialization(format!("Group {}: {e}", self.id)))
    }

    /// Convert every member to the domain record
    pub fn to_domain(&self) -> Result<Vec<JobInfo>> {
        let queue_type = self.parsed_queue_type()?;
        Ok(self
            .jobs
            .iter()
            .cloned()
            .map(|job| job.into_domain(queue_type, self.group_id))
            .collect())
    }

    /// Convert one member to the domain record
    pub fn member(&self, id: i64) -> Result<Option<JobInfo>> {
        let queue_type = self.parsed_queue_type()?;
        Ok(self
            .job(id)
            .cloned()
            .map(|job| job.into_domain(queue_type, self.group_id)))
    }
}

/// Per-queue id allocator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CosmosIdSequence {
    pub id: String,
    pub queue_type: String,
    pub doc_type: String,
    pub last_id: i64,
    #[serde(rename = "_etag", default, skip_serializing)]
    pub etag: Option<String>,
}

impl CosmosIdSequence {
    pub fn new(queue_type: QueueType) -> Self {
        Self {
            id: SEQUENCE_DOC_ID.to_string(),
            queue_type: queue_type.as_str().to_string(),
            doc_type: SEQUENCE_DOC_TYPE.to_string(),
            last_id: 0,
            etag: None,
        }
    }
}
