//! Queue client
//!
//! The API the coordinator, the worker and the CLI use. It wraps a
//! [`JobStore`] with admission control, empty-queue backoff and retries of
//! transient store errors. Version mismatches pass through as `false` /
//! `LeaseLost` outcomes and are never retried.

use crate::adapters::database::{DequeueRequest, FanOut, HeartbeatOutcome, JobStore};
use crate::config::QueueConfig;
use crate::core::queue::admission::AdmissionController;
use crate::core::queue::backoff::BackoffPolicy;
use crate::domain::{
    GroupId, JobDefinition, JobId, JobInfo, JobQueueError, JobStatus, LeaseToken, QueueType,
    Result,
};
use crate::log_retry_attempt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Handle to the job queue shared by every runner of a process
#[derive(Clone)]
pub struct QueueClient {
    store: Arc<dyn JobStore>,
    worker: String,
    lease: Duration,
    max_retries: usize,
    retry_backoff: BackoffPolicy,
    backoff: BackoffPolicy,
    admission: AdmissionController,
}

impl QueueClient {
    /// Create a client from the `[queue]` configuration section
    pub fn new(
        store: Arc<dyn JobStore>,
        worker: impl Into<String>,
        config: &QueueConfig,
    ) -> Result<Self> {
        let caps = config.admission.caps().map_err(JobQueueError::Configuration)?;
        Ok(Self {
            store,
            worker: worker.into(),
            lease: config.lease(),
            max_retries: config.retry.max_retries,
            retry_backoff: BackoffPolicy::from(&config.retry),
            backoff: BackoffPolicy::from(&config.polling),
            admission: AdmissionController::new(caps),
        })
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_admission(mut self, admission: AdmissionController) -> Self {
        self.admission = admission;
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn worker(&self) -> &str {
        &self.worker
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    /// Run `operation`, retrying transient store errors
    async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    log_retry_attempt!(attempt + 1, self.max_retries, e);
                    tracing::debug!(operation, "Transient store error");
                    tokio::time::sleep(self.retry_backoff.delay(attempt as u32)).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Create a new group; the first definition becomes the root job
    pub async fn enqueue_group(
        &self,
        queue_type: QueueType,
        definitions: &[JobDefinition],
    ) -> Result<GroupId> {
        if definitions.is_empty() {
            return Err(JobQueueError::Validation(
                "A job group needs at least one definition".to_string(),
            ));
        }

        let raw = definitions
            .iter()
            .map(JobDefinition::to_json)
            .collect::<Result<Vec<_>>>()?;

        let created = self
            .with_retry("create_jobs", || {
                self.store.create_jobs(queue_type, None, raw.clone())
            })
            .await?;

        let root = created.first().ok_or_else(|| {
            JobQueueError::Other("Job store created no records for a non-empty group".to_string())
        })?;

        tracing::info!(
            queue_type = %queue_type,
            group_id = %root.group_id,
            jobs = created.len(),
            "Job group enqueued"
        );
        Ok(root.group_id)
    }

    /// Single admitted dequeue attempt
    pub async fn try_dequeue(&self, queue_type: QueueType) -> Result<Option<JobInfo>> {
        self.with_retry("dequeue", || async move {
            let request = DequeueRequest::new(queue_type, self.worker.clone(), self.lease);
            let request = self
                .admission
                .admit(self.store.as_ref(), request, self.lease)
                .await?;
            self.store.dequeue(&request).await
        })
        .await
    }

    /// Dequeue from `queue_type`, backing off while it is empty
    ///
    /// Returns `None` only once `shutdown` is signalled or its sender is
    /// dropped.
    pub async fn poll_dequeue(
        &self,
        queue_type: QueueType,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<JobInfo>> {
        self.poll_dequeue_any(&[queue_type], shutdown).await
    }

    /// Dequeue from the first of `queue_types` with work, backing off while
    /// all of them are empty
    pub async fn poll_dequeue_any(
        &self,
        queue_types: &[QueueType],
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<JobInfo>> {
        let mut attempt = 0;
        loop {
            if *shutdown.borrow() {
                return Ok(None);
            }

            for queue_type in queue_types {
                if let Some(job) = self.try_dequeue(*queue_type).await? {
                    return Ok(Some(job));
                }
            }

            let delay = self.backoff.delay(attempt);
            attempt = attempt.saturating_add(1);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown
                    if changed.is_err() {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Renew a lease, optionally storing a checkpoint
    pub async fn heartbeat(
        &self,
        lease: &LeaseToken,
        checkpoint: Option<String>,
    ) -> Result<HeartbeatOutcome> {
        self.with_retry("heartbeat", || {
            self.store.heartbeat(lease, checkpoint.clone())
        })
        .await
    }

    async fn finish(
        &self,
        lease: &LeaseToken,
        status: JobStatus,
        result: Option<String>,
    ) -> Result<bool> {
        let finished = self
            .with_retry("complete", || {
                self.store.complete(lease, status, result.clone())
            })
            .await?;

        if !finished {
            crate::log_lease_lost!(lease, status.as_str());
        }
        Ok(finished)
    }

    /// Mark a leased job `Completed`; `false` when the lease is stale
    pub async fn complete_job(&self, lease: &LeaseToken, result: Option<String>) -> Result<bool> {
        self.finish(lease, JobStatus::Completed, result).await
    }

    /// Mark a leased job `Failed`; `false` when the lease is stale
    pub async fn fail_job(&self, lease: &LeaseToken, result: Option<String>) -> Result<bool> {
        self.finish(lease, JobStatus::Failed, result).await
    }

    /// Mark a leased job `Cancelled`; `false` when the lease is stale
    pub async fn cancel_job(&self, lease: &LeaseToken, result: Option<String>) -> Result<bool> {
        self.finish(lease, JobStatus::Cancelled, result).await
    }

    /// Release a leased job, dequeueable again after `delay`
    pub async fn requeue(
        &self,
        lease: &LeaseToken,
        result: Option<String>,
        delay: Duration,
    ) -> Result<bool> {
        let requeued = self
            .with_retry("requeue", || {
                self.store.requeue(lease, result.clone(), delay)
            })
            .await?;

        if !requeued {
            crate::log_lease_lost!(lease, "requeue");
        }
        Ok(requeued)
    }

    /// Fan out children under a leased coordinator
    pub async fn create_children(
        &self,
        coordinator: &LeaseToken,
        definitions: &[JobDefinition],
    ) -> Result<FanOut> {
        let raw = definitions
            .iter()
            .map(JobDefinition::to_json)
            .collect::<Result<Vec<_>>>()?;

        self.with_retry("create_children", || {
            self.store.create_children(coordinator, raw.clone())
        })
        .await
    }

    /// Ask every unfinished member of a group to stop
    ///
    /// Advisory: running jobs observe the flag on their next heartbeat.
    pub async fn cancel_group(&self, queue_type: QueueType, group_id: GroupId) -> Result<usize> {
        let flagged = self
            .with_retry("request_cancel", || {
                self.store.request_cancel(queue_type, group_id)
            })
            .await?;

        tracing::info!(
            queue_type = %queue_type,
            group_id = %group_id,
            flagged,
            "Cancellation requested"
        );
        Ok(flagged)
    }

    pub async fn get_job(&self, queue_type: QueueType, id: JobId) -> Result<Option<JobInfo>> {
        self.with_retry("get_by_id", || self.store.get_by_id(queue_type, id))
            .await
    }

    pub async fn get_group(
        &self,
        queue_type: QueueType,
        group_id: GroupId,
    ) -> Result<Vec<JobInfo>> {
        self.with_retry("get_by_group_id", || {
            self.store.get_by_group_id(queue_type, group_id)
        })
        .await
    }
}
