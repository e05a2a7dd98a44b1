//! Job store abstraction
//!
//! Every backend implements [`JobStore`] over one logical table of
//! [`JobInfo`] records. All lease-affecting mutations are compare-and-swap
//! on the record's `version`; a mismatch is an ordinary outcome
//! (`false`, [`HeartbeatOutcome::LeaseLost`], [`FanOut::LeaseLost`]) and
//! never an error. Errors are reserved for the store itself being
//! unreachable or broken, already classified into
//! [`crate::domain::StoreError`].

use crate::domain::{GroupId, JobId, JobInfo, JobStatus, LeaseToken, QueueType, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Parameters of one dequeue attempt
#[derive(Debug, Clone)]
pub struct DequeueRequest {
    /// Queue to lease from
    pub queue_type: QueueType,

    /// Name recorded on the leased record
    pub worker: String,

    /// Lease length; running records silent for longer are reclaimable
    pub lease: Duration,

    /// Whether root (coordinator) jobs are eligible
    pub include_root_jobs: bool,
}

impl DequeueRequest {
    /// Request eligible for every job of `queue_type`
    pub fn new(queue_type: QueueType, worker: impl Into<String>, lease: Duration) -> Self {
        Self {
            queue_type,
            worker: worker.into(),
            lease,
            include_root_jobs: true,
        }
    }

    /// Restrict the attempt to non-root jobs
    pub fn children_only(mut self) -> Self {
        self.include_root_jobs = false;
        self
    }
}

/// Outcome of a heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Lease extended; the holder must use `version` from now on
    Renewed {
        version: i64,
        cancel_requested: bool,
    },

    /// The version no longer matches or the job is no longer running
    LeaseLost,
}

/// Outcome of a coordinator's fan-out
#[derive(Debug, Clone, PartialEq)]
pub enum FanOut {
    /// Children were inserted; the coordinator's version was bumped
    Created {
        jobs: Vec<JobInfo>,
        coordinator_version: i64,
    },

    /// The group already had children; nothing was inserted
    AlreadyPlanned,

    /// The coordinator's lease is stale; nothing was inserted
    LeaseLost,
}

/// Persistence abstraction for the job queue
///
/// Implementations must be behaviourally indistinguishable; the
/// conformance suite in `tests/` runs against any of them.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Short backend name used in logs
    fn backend_name(&self) -> &'static str;

    /// Create the table / container if it does not exist
    async fn ensure_schema(&self) -> Result<()>;

    /// Atomically create `definitions` as `Queued` records
    ///
    /// Without `group_id` the first created record's id becomes the group
    /// id of all of them, making it the root.
    async fn create_jobs(
        &self,
        queue_type: QueueType,
        group_id: Option<GroupId>,
        definitions: Vec<String>,
    ) -> Result<Vec<JobInfo>>;

    /// Insert children under the coordinator's group
    ///
    /// Succeeds only while `coordinator`'s version still matches and the
    /// group has no other member yet. The coordinator's version is bumped in
    /// the same atomic step.
    async fn create_children(
        &self,
        coordinator: &LeaseToken,
        definitions: Vec<String>,
    ) -> Result<FanOut>;

    /// Lease one eligible record
    ///
    /// Eligible: `Queued` with `available_at <= now`, or `Running` with an
    /// expired lease. Reclaiming an expired lease counts as a failed attempt.
    async fn dequeue(&self, request: &DequeueRequest) -> Result<Option<JobInfo>>;

    /// Extend a lease, optionally storing a checkpoint in `result`
    async fn heartbeat(
        &self,
        lease: &LeaseToken,
        checkpoint: Option<String>,
    ) -> Result<HeartbeatOutcome>;

    /// Move a leased record to a terminal status
    ///
    /// Returns `false` without mutating anything when the lease is stale.
    async fn complete(
        &self,
        lease: &LeaseToken,
        status: JobStatus,
        result: Option<String>,
    ) -> Result<bool>;

    /// Release a leased record back to `Queued`, dequeueable after `delay`
    async fn requeue(
        &self,
        lease: &LeaseToken,
        result: Option<String>,
        delay: Duration,
    ) -> Result<bool>;

    /// Read one record
    async fn get_by_id(&self, queue_type: QueueType, id: JobId) -> Result<Option<JobInfo>>;

    /// Read every member of a group, ordered by id
    async fn get_by_group_id(
        &self,
        queue_type: QueueType,
        group_id: GroupId,
    ) -> Result<Vec<JobInfo>>;

    /// Flag every non-terminal member of a group for cancellation
    ///
    /// Returns the number of records flagged. Versions are left untouched so
    /// no lease is disturbed.
    async fn request_cancel(&self, queue_type: QueueType, group_id: GroupId) -> Result<usize>;

    /// Root jobs currently running with a live lease
    async fn count_running_roots(&self, queue_type: QueueType, lease: Duration) -> Result<usize>;
}
