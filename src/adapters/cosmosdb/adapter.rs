//! Cosmos DB job store
//!
//! Every mutation reads the group document, changes it in memory and writes
//! it back with `If-Match` on the document's etag. A 412 means another
//! worker won the race; the operation re-reads and tries again.

use crate::adapters::cosmosdb::client::CosmosDbClient;
use crate::adapters::cosmosdb::errors::{is_precondition_failure, store_error};
use crate::adapters::cosmosdb::models::{
    CosmosIdSequence, CosmosJob, CosmosJobGroup, SEQUENCE_DOC_ID,
};
use crate::adapters::database::traits::{DequeueRequest, FanOut, HeartbeatOutcome, JobStore};
use crate::config::CosmosDbConfig;
use crate::domain::{
    GroupId, JobId, JobInfo, JobQueueError, JobStatus, LeaseToken, QueueType, Result, StoreError,
    StoreErrorKind,
};
use async_trait::async_trait;
use azure_core::http::Etag;
use azure_data_cosmos::clients::ContainerClient;
use azure_data_cosmos::{ItemOptions, PartitionKey};
use chrono::{DateTime, Utc};
use futures::stream::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tracing::instrument;

/// Conditional writes attempted before giving up on a contended document
const MAX_CAS_ATTEMPTS: usize = 16;

fn partition_key(queue_type: QueueType) -> PartitionKey {
    PartitionKey::from(queue_type.as_str().to_string())
}

fn if_match(etag: &Option<String>) -> Option<ItemOptions<'_>> {
    etag.as_ref().map(|etag| ItemOptions {
        if_match_etag: Some(Etag::from(etag.clone())),
        ..Default::default()
    })
}

fn contention(what: &str) -> JobQueueError {
    StoreError::Transient(format!(
        "{what}: document still contended after {MAX_CAS_ATTEMPTS} attempts"
    ))
    .into()
}

fn reclaimable(job: &CosmosJob, now: DateTime<Utc>, lease: Duration) -> bool {
    let lease = chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::MAX);
    match job.status {
        JobStatus::Queued => job.available_at <= now,
        JobStatus::Running => now - job.heartbeat_at > lease,
        _ => false,
    }
}

/// Caps in-flight requests and bounds how long each may take
struct RequestLimits {
    permits: Semaphore,
    timeout: Duration,
}

impl RequestLimits {
    fn from_config(config: &CosmosDbConfig) -> Self {
        Self {
            permits: Semaphore::new(config.max_concurrency.max(1)),
            timeout: Duration::from_secs(config.request_timeout_seconds.max(1)),
        }
    }

    /// Run one request under a permit; a timeout is a transient store error
    async fn run<T, F>(&self, what: &str, request: F) -> Result<T>
    where
        F: Future<Output = T> + Send,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| StoreError::Fatal(format!("{what}: {e}")))?;

        tokio::time::timeout(self.timeout, request).await.map_err(|_| {
            StoreError::Transient(format!(
                "{what}: no response within {}s",
                self.timeout.as_secs()
            ))
            .into()
        })
    }
}

/// Cosmos DB implementation of [`JobStore`]
pub struct CosmosJobStore {
    client: Arc<CosmosDbClient>,
    container: ContainerClient,
    limits: RequestLimits,
    /// Job id to group id; membership never changes once written
    groups: RwLock<HashMap<(QueueType, i64), i64>>,
}

impl CosmosJobStore {
    /// Create a job store on top of `client`
    pub fn new(client: CosmosDbClient) -> Self {
        Self::new_with_arc(Arc::new(client))
    }

    /// Create a job store sharing an existing client
    pub fn new_with_arc(client: Arc<CosmosDbClient>) -> Self {
        let container = client.job_container();
        let limits = RequestLimits::from_config(client.config());
        Self {
            client,
            container,
            limits,
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// Get a reference to the underlying client
    pub fn client(&self) -> &Arc<CosmosDbClient> {
        &self.client
    }

    async fn read_group(
        &self,
        queue_type: QueueType,
        group_id: i64,
    ) -> Result<Option<CosmosJobGroup>> {
        let document_id = group_id.to_string();
        let read = self.container.read_item::<CosmosJobGroup>(
            partition_key(queue_type),
            &document_id,
            None,
        );
        match self.limits.run("read job group", read).await? {
            Ok(response) => {
                let group = response.into_body().map_err(|e| {
                    JobQueueError::Serialization(format!(
                        "Failed to deserialize group {group_id}: {e}"
                    ))
                })?;
                Ok(Some(group))
            }
            Err(e) => {
                let err = store_error(e, "Failed to read job group");
                if err.kind() == StoreErrorKind::NotFound {
                    Ok(None)
                } else {
                    Err(err.into())
                }
            }
        }
    }

    /// Conditional replace; `false` when the etag no longer matches
    async fn replace_group(&self, queue_type: QueueType, group: &CosmosJobGroup) -> Result<bool> {
        let replace = self.container.replace_item(
            partition_key(queue_type),
            &group.id,
            group,
            if_match(&group.etag),
        );
        match self.limits.run("replace job group", replace).await? {
            Ok(_) => Ok(true),
            Err(e) if is_precondition_failure(&e) => {
                tracing::debug!(group_id = group.group_id, "Group changed concurrently, retrying");
                Ok(false)
            }
            Err(e) => Err(store_error(e, "Failed to replace job group").into()),
        }
    }

    /// Insert a new group; `false` when the id is already taken
    async fn create_group(&self, queue_type: QueueType, group: &CosmosJobGroup) -> Result<bool> {
        let create = self
            .container
            .create_item(partition_key(queue_type), group, None);
        match self.limits.run("create job group", create).await? {
            Ok(_) => Ok(true),
            Err(e) if is_precondition_failure(&e) => Ok(false),
            Err(e) => Err(store_error(e, "Failed to create job group").into()),
        }
    }

    async fn query_groups(
        &self,
        queue_type: QueueType,
        query: String,
    ) -> Result<Vec<CosmosJobGroup>> {
        let mut pager = self
            .container
            .query_items::<CosmosJobGroup>(query, partition_key(queue_type), None)
            .map_err(|e| store_error(e, "Failed to create job group query"))?;

        let collect = async move {
            let mut groups = Vec::new();
            while let Some(item) = pager.next().await {
                groups.push(item.map_err(|e| store_error(e, "Failed to query job groups"))?);
            }
            Ok::<_, JobQueueError>(groups)
        };
        self.limits.run("query job groups", collect).await?
    }

    async fn open_groups(&self, queue_type: QueueType) -> Result<Vec<CosmosJobGroup>> {
        self.query_groups(
            queue_type,
            "SELECT * FROM c WHERE c.doc_type = 'group' AND c.open = true".to_string(),
        )
        .await
    }

    /// Reserve `count` consecutive ids, returning the first
    async fn allocate_ids(&self, queue_type: QueueType, count: usize) -> Result<i64> {
        let count = count as i64;

        for _ in 0..MAX_CAS_ATTEMPTS {
            let read = self.container.read_item::<CosmosIdSequence>(
                partition_key(queue_type),
                SEQUENCE_DOC_ID,
                None,
            );
            let current = match self.limits.run("read id sequence", read).await? {
                Ok(response) => Some(response.into_body().map_err(|e| {
                    JobQueueError::Serialization(format!("Failed to deserialize id sequence: {e}"))
                })?),
                Err(e) => {
                    let err = store_error(e, "Failed to read id sequence");
                    if err.kind() != StoreErrorKind::NotFound {
                        return Err(err.into());
                    }
                    None
                }
            };

            match current {
                None => {
                    let mut sequence = CosmosIdSequence::new(queue_type);
                    sequence.last_id = count;
                    let create = self
                        .container
                        .create_item(partition_key(queue_type), &sequence, None);
                    match self.limits.run("create id sequence", create).await? {
                        Ok(_) => return Ok(1),
                        Err(e) if is_precondition_failure(&e) => continue,
                        Err(e) => return Err(store_error(e, "Failed to create id sequence").into()),
                    }
                }
                Some(mut sequence) => {
                    let first = sequence.last_id + 1;
                    sequence.last_id += count;
                    let replace = self.container.replace_item(
                        partition_key(queue_type),
                        SEQUENCE_DOC_ID,
                        &sequence,
                        if_match(&sequence.etag),
                    );
                    match self.limits.run("advance id sequence", replace).await? {
                        Ok(_) => return Ok(first),
                        Err(e) if is_precondition_failure(&e) => continue,
                        Err(e) => {
                            return Err(store_error(e, "Failed to advance id sequence").into())
                        }
                    }
                }
            }
        }

        Err(contention("allocate ids"))
    }

    async fn remember(&self, queue_type: QueueType, group: &CosmosJobGroup) {
        let mut groups = self.groups.write().await;
        for job in &group.jobs {
            groups.insert((queue_type, job.id), group.group_id);
        }
    }

    /// Find the group holding `job_id`
    async fn locate(&self, queue_type: QueueType, job_id: i64) -> Result<Option<i64>> {
        if let Some(group_id) = self.groups.read().await.get(&(queue_type, job_id)) {
            return Ok(Some(*group_id));
        }

        let query = format!(
            "SELECT * FROM c WHERE c.doc_type = 'group' \
             AND ARRAY_CONTAINS(c.jobs, {{\"id\": {job_id}}}, true)"
        );
        let found = self.query_groups(queue_type, query).await?.into_iter().next();

        match found {
            Some(group) => {
                self.remember(queue_type, &group).await;
                Ok(Some(group.group_id))
            }
            None => Ok(None),
        }
    }

    /// Apply `mutate` to the leased record behind `lease`
    ///
    /// Returns `None` when the lease is stale. Retries on etag conflicts.
    async fn mutate_leased<F, R>(&self, lease: &LeaseToken, mut mutate: F) -> Result<Option<R>>
    where
        F: FnMut(&mut CosmosJob, DateTime<Utc>) -> R + Send,
        R: Send,
    {
        let job_id = lease.job_id.value();
        let Some(group_id) = self.locate(lease.queue_type, job_id).await? else {
            return Ok(None);
        };

        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some(mut group) = self.read_group(lease.queue_type, group_id).await? else {
                return Ok(None);
            };

            let now = Utc::now();
            let outcome = match group.job_mut(job_id) {
                Some(job) if job.version == lease.version && job.status == JobStatus::Running => {
                    mutate(job, now)
                }
                _ => return Ok(None),
            };
            group.refresh();

            if self.replace_group(lease.queue_type, &group).await? {
                return Ok(Some(outcome));
            }
        }

        Err(contention("leased update"))
    }
}

#[async_trait]
impl JobStore for CosmosJobStore {
    fn backend_name(&self) -> &'static str {
        "cosmosdb"
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.client.ensure_schema().await
    }

    #[instrument(skip_all, err, fields(queue_type = %queue_type, count = definitions.len()))]
    async fn create_jobs(
        &self,
        queue_type: QueueType,
        group_id: Option<GroupId>,
        definitions: Vec<String>,
    ) -> Result<Vec<JobInfo>> {
        if definitions.is_empty() {
            return Ok(Vec::new());
        }

        let first = self.allocate_ids(queue_type, definitions.len()).await?;
        let now = Utc::now();
        let jobs: Vec<CosmosJob> = definitions
            .into_iter()
            .zip(first..)
            .map(|(definition, id)| CosmosJob::queued(id, definition, now))
            .collect();
        let ids: Vec<i64> = jobs.iter().map(|job| job.id).collect();

        let group_id = group_id.map(|g| g.value()).unwrap_or(first);

        for _ in 0..MAX_CAS_ATTEMPTS {
            let written = match self.read_group(queue_type, group_id).await? {
                Some(mut group) => {
                    group.jobs.extend(jobs.iter().cloned());
                    group.refresh();
                    self.replace_group(queue_type, &group).await?.then_some(group)
                }
                None => {
                    let group = CosmosJobGroup::new(queue_type, group_id, jobs.clone());
                    self.create_group(queue_type, &group).await?.then_some(group)
                }
            };

            if let Some(group) = written {
                self.remember(queue_type, &group).await;
                let members = group.to_domain()?;
                return Ok(members
                    .into_iter()
                    .filter(|job| ids.contains(&job.id.value()))
                    .collect());
            }
        }

        Err(contention("create jobs"))
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
        let queue_type = coordinator.queue_type;
        let coordinator_id = coordinator.job_id.value();
        let Some(group_id) = self.locate(queue_type, coordinator_id).await? else {
            return Ok(FanOut::LeaseLost);
        };

        let mut first_id = None;
        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some(mut group) = self.read_group(queue_type, group_id).await? else {
                return Ok(FanOut::LeaseLost);
            };

            match group.job(coordinator_id) {
                Some(job)
                    if job.version == coordinator.version && job.status == JobStatus::Running => {}
                _ => return Ok(FanOut::LeaseLost),
            }
            if group.has_children() {
                return Ok(FanOut::AlreadyPlanned);
            }

            let first = match first_id {
                Some(first) => first,
                None => {
                    let first = self.allocate_ids(queue_type, definitions.len()).await?;
                    first_id = Some(first);
                    first
                }
            };

            let now = Utc::now();
            let children: Vec<CosmosJob> = definitions
                .iter()
                .cloned()
                .zip(first..)
                .map(|(definition, id)| CosmosJob::queued(id, definition, now))
                .collect();
            let child_ids: Vec<i64> = children.iter().map(|job| job.id).collect();
            group.jobs.extend(children);

            let coordinator_version = match group.job_mut(coordinator_id) {
                Some(job) => {
                    job.version += 1;
                    job.heartbeat_at = now;
                    job.version
                }
                None => return Ok(FanOut::LeaseLost),
            };
            group.refresh();

            if self.replace_group(queue_type, &group).await? {
                self.remember(queue_type, &group).await;
                let jobs = group
                    .to_domain()?
                    .into_iter()
                    .filter(|job| child_ids.contains(&job.id.value()))
                    .collect();
                return Ok(FanOut::Created {
                    jobs,
                    coordinator_version,
                });
            }
        }

        Err(contention("create children"))
    }

    #[instrument(skip_all, err, fields(queue_type = %request.queue_type, worker = %request.worker))]
    async fn dequeue(&self, request: &DequeueRequest) -> Result<Option<JobInfo>> {
        let queue_type = request.queue_type;

        for _ in 0..MAX_CAS_ATTEMPTS {
            let now = Utc::now();
            let mut candidates: Vec<(i64, CosmosJobGroup)> = self
                .open_groups(queue_type)
                .await?
                .into_iter()
                .filter_map(|group| {
                    group
                        .jobs
                        .iter()
                        .filter(|job| request.include_root_jobs || job.id != group.group_id)
                        .filter(|job| reclaimable(job, now, request.lease))
                        .map(|job| job.id)
                        .min()
                        .map(|id| (id, group))
                })
                .collect();
            candidates.sort_by_key(|(id, _)| *id);

            let Some((job_id, mut group)) = candidates.into_iter().next() else {
                return Ok(None);
            };

            if let Some(job) = group.job_mut(job_id) {
                if job.status == JobStatus::Running {
                    job.failure_count += 1;
                }
                job.status = JobStatus::Running;
                job.heartbeat_at = now;
                job.version += 1;
                job.worker = Some(request.worker.clone());
                job.started_at.get_or_insert(now);
            }
            group.refresh();

            if self.replace_group(queue_type, &group).await? {
                self.remember(queue_type, &group).await;
                return group.member(job_id);
            }
        }

        tracing::debug!(queue_type = %queue_type, "Dequeue lost every race this round");
        Ok(None)
    }

    async fn heartbeat(
        &self,
        lease: &LeaseToken,
        checkpoint: Option<String>,
    ) -> Result<HeartbeatOutcome> {
        let outcome = self
            .mutate_leased(lease, |job, now| {
                job.version += 1;
                job.heartbeat_at = now;
                if checkpoint.is_some() {
                    job.result = checkpoint.clone();
                }
                HeartbeatOutcome::Renewed {
                    version: job.version,
                    cancel_requested: job.cancel_requested,
                }
            })
            .await?;

        Ok(outcome.unwrap_or(HeartbeatOutcome::LeaseLost))
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

        let outcome = self
            .mutate_leased(lease, |job, now| {
                job.status = status;
                job.result = result.clone();
                job.version += 1;
                job.ended_at = Some(now);
            })
            .await?;

        Ok(outcome.is_some())
    }

    async fn requeue(
        &self,
        lease: &LeaseToken,
        result: Option<String>,
        delay: Duration,
    ) -> Result<bool> {
        let delay = chrono::Duration::from_std(delay)
            .map_err(|e| JobQueueError::Validation(format!("Invalid requeue delay: {e}")))?;

        let outcome = self
            .mutate_leased(lease, |job, now| {
                job.status = JobStatus::Queued;
                job.available_at = now + delay;
                if result.is_some() {
                    job.result = result.clone();
                }
                job.version += 1;
            })
            .await?;

        Ok(outcome.is_some())
    }

    async fn get_by_id(&self, queue_type: QueueType, id: JobId) -> Result<Option<JobInfo>> {
        let Some(group_id) = self.locate(queue_type, id.value()).await? else {
            return Ok(None);
        };
        match self.read_group(queue_type, group_id).await? {
            Some(group) => group.member(id.value()),
            None => Ok(None),
        }
    }

    async fn get_by_group_id(
        &self,
        queue_type: QueueType,
        group_id: GroupId,
    ) -> Result<Vec<JobInfo>> {
        match self.read_group(queue_type, group_id.value()).await? {
            Some(group) => group.to_domain(),
            None => Ok(Vec::new()),
        }
    }

    async fn request_cancel(&self, queue_type: QueueType, group_id: GroupId) -> Result<usize> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some(mut group) = self.read_group(queue_type, group_id.value()).await? else {
                return Ok(0);
            };

            let mut flagged = 0;
            for job in group.jobs.iter_mut().filter(|job| !job.status.is_terminal()) {
                job.cancel_requested = true;
                flagged += 1;
            }
            if flagged == 0 {
                return Ok(0);
            }

            if self.replace_group(queue_type, &group).await? {
                return Ok(flagged);
            }
        }

        Err(contention("request cancel"))
    }

    async fn count_running_roots(&self, queue_type: QueueType, lease: Duration) -> Result<usize> {
        let now = Utc::now();
        let mut running = 0;
        for group in self.open_groups(queue_type).await? {
            if let Some(root) = group.member(group.group_id)? {
                if root.status == JobStatus::Running && !root.lease_expired(now, lease) {
                    running += 1;
                }
            }
        }
        Ok(running)
    }
}
