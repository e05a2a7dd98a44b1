//! In-memory job store
//!
//! All records live behind one `RwLock`; every operation takes the write
//! lock for its whole duration, which makes each call trivially atomic.
//! Used by tests and for local development (`database_target = "memory"`).

use crate::adapters::database::traits::{DequeueRequest, FanOut, HeartbeatOutcome, JobStore};
use crate::domain::{
    GroupId, JobId, JobInfo, JobQueueError, JobStatus, LeaseToken, QueueType, Result,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::instrument;

#[derive(Default)]
struct State {
    jobs: BTreeMap<(QueueType, i64), JobInfo>,
    last_ids: HashMap<QueueType, i64>,
}

impl State {
    fn next_id(&mut self, queue_type: QueueType) -> i64 {
        let last = self.last_ids.entry(queue_type).or_insert(0);
        *last += 1;
        *last
    }

    fn queue(&self, queue_type: QueueType) -> impl Iterator<Item = &JobInfo> {
        self.jobs
            .range((queue_type, i64::MIN)..=(queue_type, i64::MAX))
            .map(|(_, job)| job)
    }

    /// The record behind `lease`, if the lease is still current
    fn leased_mut(&mut self, lease: &LeaseToken) -> Option<&mut JobInfo> {
        self.jobs
            .get_mut(&(lease.queue_type, lease.job_id.value()))
            .filter(|job| job.version == lease.version && job.status == JobStatus::Running)
    }
}

fn new_record(
    queue_type: QueueType,
    id: i64,
    group_id: i64,
    definition: String,
    now: DateTime<Utc>,
) -> JobInfo {
    JobInfo {
        id: JobId::new(id),
        queue_type,
        group_id: GroupId::new(group_id),
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

/// Process-local [`JobStore`]
#[derive(Clone, Default)]
pub struct MemoryJobStore {
    state: Arc<RwLock<State>>,
}

impl MemoryJobStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    #[instrument(skip_all, err, fields(queue_type = %queue_type, count = definitions.len()))]
    async fn create_jobs(
        &self,
        queue_type: QueueType,
        group_id: Option<GroupId>,
        definitions: Vec<String>,
    ) -> Result<Vec<JobInfo>> {
        let now = Utc::now();
        let mut state = self.state.write().await;

        let mut created = Vec::with_capacity(definitions.len());
        let mut group = group_id.map(|g| g.value());
        for definition in definitions {
            let id = state.next_id(queue_type);
            let group_value = *group.get_or_insert(id);
            let job = new_record(queue_type, id, group_value, definition, now);
            state.jobs.insert((queue_type, id), job.clone());
            created.push(job);
        }

        Ok(created)
    }

    #[instrument(
        skip_all,
        err,
        fields(queue_type = %coordinator.queue_type, job_id = %coordinator.job_id)
    )]
    async fn create_children(
        &self,
        coordinator: &LeaseToken,
        definitions: Vec<String>,
    ) -> Result<FanOut> {
        let now = Utc::now();
        let mut state = self.state.write().await;

        let group_id = match state.leased_mut(coordinator) {
            Some(job) => job.group_id.value(),
            None => return Ok(FanOut::LeaseLost),
        };

        let has_children = state
            .queue(coordinator.queue_type)
            .any(|job| job.group_id.value() == group_id && !job.is_root());
        if has_children {
            return Ok(FanOut::AlreadyPlanned);
        }

        let mut jobs = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let id = state.next_id(coordinator.queue_type);
            let job = new_record(coordinator.queue_type, id, group_id, definition, now);
            state
                .jobs
                .insert((coordinator.queue_type, id), job.clone());
            jobs.push(job);
        }

        let coordinator_version = match state.leased_mut(coordinator) {
            Some(job) => {
                job.version += 1;
                job.heartbeat_at = now;
                job.version
            }
            None => {
                return Err(JobQueueError::Other(
                    "coordinator vanished during fan-out".to_string(),
                ))
            }
        };

        Ok(FanOut::Created {
            jobs,
            coordinator_version,
        })
    }

    #[instrument(skip_all, err, fields(queue_type = %request.queue_type, worker = %request.worker))]
    async fn dequeue(&self, request: &DequeueRequest) -> Result<Option<JobInfo>> {
        let now = Utc::now();
        let mut state = self.state.write().await;

        let key = state
            .queue(request.queue_type)
            .find(|job| {
                let available = (job.status == JobStatus::Queued && job.available_at <= now)
                    || job.lease_expired(now, request.lease);
                available && (request.include_root_jobs || !job.is_root())
            })
            .map(|job| (job.queue_type, job.id.value()));

        let Some(key) = key else {
            return Ok(None);
        };

        let Some(job) = state.jobs.get_mut(&key) else {
            return Ok(None);
        };

        if job.status == JobStatus::Running {
            job.failure_count += 1;
        }
        job.status = JobStatus::Running;
        job.heartbeat_at = now;
        job.version += 1;
        job.worker = Some(request.worker.clone());
        job.started_at.get_or_insert(now);

        Ok(Some(job.clone()))
    }

    async fn heartbeat(
        &self,
        lease: &LeaseToken,
        checkpoint: Option<String>,
    ) -> Result<HeartbeatOutcome> {
        let now = Utc::now();
        let mut state = self.state.write().await;

        let Some(job) = state.leased_mut(lease) else {
            return Ok(HeartbeatOutcome::LeaseLost);
        };

        job.version += 1;
        job.heartbeat_at = now;
        if checkpoint.is_some() {
            job.result = checkpoint;
        }

        Ok(HeartbeatOutcome::Renewed {
            version: job.version,
            cancel_requested: job.cancel_requested,
        })
    }

    #[instrument(skip_all, err, fields(job_id = %lease.job_id, status = %status))]
    async fn complete(
        &self,
        lease: &LeaseToken,
        status: JobStatus,
        result: Option<String>,
    ) -> Result<bool> {
        if !status.is_terminal() {
            return Err(JobQueueError::Validation(format!(
                "complete requires a terminal status, got '{status}'"
            )));
        }

        let now = Utc::now();
        let mut state = self.state.write().await;

        let Some(job) = state.leased_mut(lease) else {
            return Ok(false);
        };

        job.status = status;
        job.result = result;
        job.version += 1;
        job.ended_at = Some(now);

        Ok(true)
    }

    async fn requeue(
        &self,
        lease: &LeaseToken,
        result: Option<String>,
        delay: Duration,
    ) -> Result<bool> {
        let now = Utc::now();
        let delay = chrono::Duration::from_std(delay)
            .map_err(|e| JobQueueError::Validation(format!("Invalid requeue delay: {e}")))?;
        let mut state = self.state.write().await;

        let Some(job) = state.leased_mut(lease) else {
            return Ok(false);
        };

        job.status = JobStatus::Queued;
        job.available_at = now + delay;
        if result.is_some() {
            job.result = result;
        }
        job.version += 1;

        Ok(true)
    }

    async fn get_by_id(&self, queue_type: QueueType, id: JobId) -> Result<Option<JobInfo>> {
        let state = self.state.read().await;
        Ok(state.jobs.get(&(queue_type, id.value())).cloned())
    }

    async fn get_by_group_id(
        &self,
        queue_type: QueueType,
        group_id: GroupId,
    ) -> Result<Vec<JobInfo>> {
        let state = self.state.read().await;
        Ok(state
            .queue(queue_type)
            .filter(|job| job.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn request_cancel(&self, queue_type: QueueType, group_id: GroupId) -> Result<usize> {
        let mut state = self.state.write().await;

        let mut flagged = 0;
        for job in state
            .jobs
            .range_mut((queue_type, i64::MIN)..=(queue_type, i64::MAX))
            .map(|(_, job)| job)
            .filter(|job| job.group_id == group_id && !job.is_terminal())
        {
            job.cancel_requested = true;
            flagged += 1;
        }

        Ok(flagged)
    }

    async fn count_running_roots(&self, queue_type: QueueType, lease: Duration) -> Result<usize> {
        let now = Utc::now();
        let state = self.state.read().await;
        Ok(state
            .queue(queue_type)
            .filter(|job| {
                job.is_root() && job.status == JobStatus::Running && !job.lease_expired(now, lease)
            })
            .count())
    }
}
