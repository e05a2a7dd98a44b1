//! Integration tests for coordinator and worker jobs
//!
//! Each test drives the jobs one invocation at a time against the
//! in-memory store, so every intermediate state of a group can be checked.

use async_trait::async_trait;
use fhir_jobqueue::adapters::database::{DequeueRequest, JobStore};
use fhir_jobqueue::adapters::memory::MemoryJobStore;
use fhir_jobqueue::config::QueueConfig;
use fhir_jobqueue::core::bulk::{BatchProcessor, RangeExecutor, RangePartition};
use fhir_jobqueue::core::jobs::summary::PartitionFailure;
use fhir_jobqueue::core::jobs::{
    CoordinatorJob, CoordinatorPhase, CoordinatorReport, ExecutionContext, ExecutionError,
    Executor, GroupSummary, JobOutcome, Planner, WorkerJob,
};
use fhir_jobqueue::core::queue::{AdmissionController, QueueClient};
use fhir_jobqueue::domain::{GroupId, JobDefinition, JobInfo, JobStatus, QueueType, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const QUEUE: QueueType = QueueType::Export;
const LEASE: Duration = Duration::from_secs(60);

/// Plans a fixed number of partitions
struct FixedPlanner {
    partitions: usize,
}

#[async_trait]
impl Planner for FixedPlanner {
    async fn plan(&self, _definition: &JobDefinition) -> Result<Vec<JobDefinition>> {
        Ok((0..self.partitions)
            .map(|i| JobDefinition::new("partition", json!({ "index": i })))
            .collect())
    }
}

/// Executor that fails transiently every time
struct AlwaysTransient;

#[async_trait]
impl Executor for AlwaysTransient {
    async fn execute(
        &self,
        _definition: &JobDefinition,
        _ctx: &ExecutionContext,
    ) -> std::result::Result<Value, ExecutionError> {
        Err(ExecutionError::Transient("resource store unavailable".to_string()))
    }
}

/// Executor that runs until it observes cancellation
struct UntilCancelled;

#[async_trait]
impl Executor for UntilCancelled {
    async fn execute(
        &self,
        _definition: &JobDefinition,
        ctx: &ExecutionContext,
    ) -> std::result::Result<Value, ExecutionError> {
        for _ in 0..200 {
            if let Some(stop) = ctx.should_stop() {
                return Err(stop);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(json!({"finished": true}))
    }
}

#[derive(Default)]
struct CountingProcessor {
    processed: AtomicU64,
}

#[async_trait]
impl BatchProcessor for CountingProcessor {
    async fn process_batch(&self, _: &str, start_id: i64, end_id: i64) -> Result<u64> {
        let count = (end_id - start_id) as u64;
        self.processed.fetch_add(count, Ordering::Relaxed);
        Ok(count)
    }
}

fn setup() -> (Arc<MemoryJobStore>, QueueClient) {
    let store = Arc::new(MemoryJobStore::new());
    let client = QueueClient::new(store.clone(), "test-worker", &QueueConfig::default()).unwrap();
    (store, client)
}

fn coordinator(client: &QueueClient, partitions: usize) -> CoordinatorJob {
    CoordinatorJob::new(
        client.clone(),
        Arc::new(FixedPlanner { partitions }),
        Duration::ZERO,
    )
    .with_max_failure_count(3)
}

async fn enqueue_root(client: &QueueClient) -> GroupId {
    client
        .enqueue_group(QUEUE, &[JobDefinition::new("root", json!({}))])
        .await
        .unwrap()
}

async fn lease_root(client: &QueueClient) -> (JobInfo, JobDefinition) {
    let job = client.try_dequeue(QUEUE).await.unwrap().unwrap();
    assert!(job.is_root());
    let definition = JobDefinition::parse(&job.definition).unwrap();
    (job, definition)
}

async fn lease_child(store: &MemoryJobStore) -> JobInfo {
    store
        .dequeue(&DequeueRequest::new(QUEUE, "child-worker", LEASE).children_only())
        .await
        .unwrap()
        .unwrap()
}

async fn root_of(client: &QueueClient, group_id: GroupId) -> JobInfo {
    client
        .get_group(QUEUE, group_id)
        .await
        .unwrap()
        .into_iter()
        .find(JobInfo::is_root)
        .unwrap()
}

#[tokio::test]
async fn test_first_invocation_fans_out_and_requeues() {
    let (_store, client) = setup();
    let group_id = enqueue_root(&client).await;
    let (root, definition) = lease_root(&client).await;

    let outcome = coordinator(&client, 3).run(root, &definition).await.unwrap();
    assert_eq!(outcome, JobOutcome::Requeued);

    let group = client.get_group(QUEUE, group_id).await.unwrap();
    assert_eq!(group.len(), 4);

    let root = root_of(&client, group_id).await;
    assert_eq!(root.status, JobStatus::Queued);
    let report = CoordinatorReport::parse(root.result.as_deref().unwrap()).unwrap();
    assert_eq!(report.phase, CoordinatorPhase::Monitoring);
    assert_eq!(report.progress.total, 3);
}

#[tokio::test]
async fn test_repeated_invocations_fan_out_once() {
    let (_store, client) = setup();
    let group_id = enqueue_root(&client).await;
    let (first, definition) = lease_root(&client).await;

    let outcome = coordinator(&client, 3)
        .run(first.clone(), &definition)
        .await
        .unwrap();
    assert_eq!(outcome, JobOutcome::Requeued);

    // Second pass before any child finished only monitors
    let (second, definition) = lease_root(&client).await;
    let outcome = coordinator(&client, 3).run(second, &definition).await.unwrap();
    assert_eq!(outcome, JobOutcome::Requeued);

    // A holder of an old lease neither plans again nor finishes
    let outcome = coordinator(&client, 3).run(first, &definition).await.unwrap();
    assert_eq!(outcome, JobOutcome::LeaseLost);

    let group = client.get_group(QUEUE, group_id).await.unwrap();
    assert_eq!(group.len(), 4);
    assert_eq!(group.iter().filter(|job| job.is_root()).count(), 1);
}

#[tokio::test]
async fn test_reclaimed_coordinator_keeps_monitoring_past_failure_limit() {
    let (store, client) = setup();
    let group_id = enqueue_root(&client).await;
    let limited = |client: &QueueClient| {
        CoordinatorJob::new(
            client.clone(),
            Arc::new(FixedPlanner { partitions: 3 }),
            Duration::ZERO,
        )
        .with_max_failure_count(0)
    };

    let (root, definition) = lease_root(&client).await;
    limited(&client).run(root, &definition).await.unwrap();

    // Lease the root again and let that lease expire
    lease_root(&client).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    let reclaimed = store
        .dequeue(&DequeueRequest::new(QUEUE, "rescuer", Duration::from_millis(50)))
        .await
        .unwrap()
        .unwrap();
    assert!(reclaimed.is_root());
    assert_eq!(reclaimed.failure_count, 1);

    let outcome = limited(&client).run(reclaimed, &definition).await.unwrap();
    assert_eq!(outcome, JobOutcome::Requeued);

    let group = client.get_group(QUEUE, group_id).await.unwrap();
    assert_eq!(group.len(), 4);
    assert!(group.iter().all(|job| job.status == JobStatus::Queued));
    let root = root_of(&client, group_id).await;
    let report = CoordinatorReport::parse(root.result.as_deref().unwrap()).unwrap();
    assert_eq!(report.phase, CoordinatorPhase::Monitoring);
}

#[tokio::test]
async fn test_coordinator_over_failure_limit_fails_before_planning() {
    let (_store, client) = setup();
    let group_id = enqueue_root(&client).await;
    let (mut root, definition) = lease_root(&client).await;
    root.failure_count = 4;

    let outcome = coordinator(&client, 3).run(root, &definition).await.unwrap();
    assert_eq!(outcome, JobOutcome::Failed);

    let group = client.get_group(QUEUE, group_id).await.unwrap();
    assert_eq!(group.len(), 1);
    assert_eq!(group[0].status, JobStatus::Failed);
}

#[tokio::test]
async fn test_group_completes_only_after_every_child_is_terminal() {
    let (store, client) = setup();
    let group_id = enqueue_root(&client).await;
    let (root, definition) = lease_root(&client).await;
    coordinator(&client, 2).run(root, &definition).await.unwrap();

    let first = lease_child(&store).await;
    client
        .complete_job(&first.lease(), Some(json!({"processed": 5}).to_string()))
        .await
        .unwrap();

    let (root, definition) = lease_root(&client).await;
    let outcome = coordinator(&client, 2).run(root, &definition).await.unwrap();
    assert_eq!(outcome, JobOutcome::Requeued);
    assert_eq!(root_of(&client, group_id).await.status, JobStatus::Queued);

    let second = lease_child(&store).await;
    client
        .complete_job(&second.lease(), Some(json!({"processed": 7}).to_string()))
        .await
        .unwrap();

    let (root, definition) = lease_root(&client).await;
    let outcome = coordinator(&client, 2).run(root, &definition).await.unwrap();
    assert_eq!(outcome, JobOutcome::Completed);

    let group = client.get_group(QUEUE, group_id).await.unwrap();
    assert!(group.iter().all(|job| job.status == JobStatus::Completed));

    let root = root_of(&client, group_id).await;
    let report = CoordinatorReport::parse(root.result.as_deref().unwrap()).unwrap();
    assert_eq!(report.phase, CoordinatorPhase::Completed);
    let processed: i64 = report
        .results
        .iter()
        .map(|r| r.result["processed"].as_i64().unwrap())
        .sum();
    assert_eq!(processed, 12);
}

#[tokio::test]
async fn test_one_failed_partition_fails_the_group_with_its_error() {
    let (store, client) = setup();
    let group_id = enqueue_root(&client).await;
    let (root, definition) = lease_root(&client).await;
    coordinator(&client, 2).run(root, &definition).await.unwrap();

    let a = lease_child(&store).await;
    let b = lease_child(&store).await;
    client.complete_job(&a.lease(), Some("{}".to_string())).await.unwrap();
    let failure = PartitionFailure {
        error: "Observation range 500-1000 unreadable".to_string(),
    };
    client.fail_job(&b.lease(), Some(failure.to_json())).await.unwrap();

    let (root, definition) = lease_root(&client).await;
    let outcome = coordinator(&client, 2).run(root, &definition).await.unwrap();
    assert_eq!(outcome, JobOutcome::Failed);

    let jobs = client.get_group(QUEUE, group_id).await.unwrap();
    let summary = GroupSummary::from_jobs(&jobs).unwrap();
    assert_eq!(summary.status, JobStatus::Failed);
    assert_eq!(summary.partitions.completed, 1);
    assert_eq!(summary.partitions.failed, 1);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].job_id, b.id.value());

    let report = summary.report.unwrap();
    assert_eq!(report.errors[0].message, "Observation range 500-1000 unreadable");
    assert_eq!(report.message.as_deref(), Some("1 of 2 partitions failed"));
}

#[tokio::test]
async fn test_cancel_before_planning_prevents_fan_out() {
    let (_store, client) = setup();
    let group_id = enqueue_root(&client).await;
    assert_eq!(client.cancel_group(QUEUE, group_id).await.unwrap(), 1);

    let (root, definition) = lease_root(&client).await;
    let outcome = coordinator(&client, 3).run(root, &definition).await.unwrap();
    assert_eq!(outcome, JobOutcome::Cancelled);

    let group = client.get_group(QUEUE, group_id).await.unwrap();
    assert_eq!(group.len(), 1);
    assert_eq!(group[0].status, JobStatus::Cancelled);
}

#[tokio::test]
async fn test_cancel_reaches_running_worker_and_group() {
    let (store, client) = setup();
    let group_id = enqueue_root(&client).await;
    let (root, definition) = lease_root(&client).await;
    coordinator(&client, 1).run(root, &definition).await.unwrap();

    let child = lease_child(&store).await;
    let child_definition = JobDefinition::parse(&child.definition).unwrap();
    let worker = WorkerJob::new(
        client.clone(),
        Arc::new(UntilCancelled),
        Duration::from_millis(20),
        3,
    );

    let canceller = {
        let client = client.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            client.cancel_group(QUEUE, group_id).await.unwrap()
        })
    };

    let outcome = worker.run(child, &child_definition).await.unwrap();
    assert_eq!(outcome, JobOutcome::Cancelled);
    assert_eq!(canceller.await.unwrap(), 2);

    let (root, definition) = lease_root(&client).await;
    let outcome = coordinator(&client, 1).run(root, &definition).await.unwrap();
    assert_eq!(outcome, JobOutcome::Cancelled);
    assert_eq!(root_of(&client, group_id).await.status, JobStatus::Cancelled);
}

#[tokio::test]
async fn test_admission_cap_of_one_holds_back_second_root() {
    let (store, client) = setup();
    let client = client.with_admission(AdmissionController::new(HashMap::from([(QUEUE, 1)])));

    let first_group = enqueue_root(&client).await;
    let second_group = enqueue_root(&client).await;

    let (root, definition) = lease_root(&client).await;
    assert_eq!(root.group_id, first_group);

    // At the cap with nothing else to run, the second root stays queued
    assert!(client.try_dequeue(QUEUE).await.unwrap().is_none());

    coordinator(&client, 1).run(root, &definition).await.unwrap();

    // The requeued first root no longer counts; leasing it again fills the cap
    let (root, _) = lease_root(&client).await;
    assert_eq!(root.group_id, first_group);

    let next = client.try_dequeue(QUEUE).await.unwrap().unwrap();
    assert!(!next.is_root());
    assert_eq!(next.group_id, first_group);

    let second_root = store
        .get_by_group_id(QUEUE, second_group)
        .await
        .unwrap()
        .remove(0);
    assert_eq!(second_root.status, JobStatus::Queued);
}

#[tokio::test]
async fn test_worker_runs_range_partition_to_completion() {
    let (store, client) = setup();
    let partition = JobDefinition::from_payload(
        "range",
        &RangePartition {
            resource_type: "Patient".to_string(),
            start_id: 0,
            end_id: 95,
            batch_size: 10,
        },
    )
    .unwrap();
    client
        .enqueue_group(QUEUE, &[JobDefinition::new("root", json!({})), partition.clone()])
        .await
        .unwrap();

    let child = lease_child(&store).await;
    let executor = Arc::new(RangeExecutor::new(CountingProcessor::default()));
    let worker = WorkerJob::new(client.clone(), executor.clone(), Duration::from_millis(20), 3);

    let outcome = worker.run(child.clone(), &partition).await.unwrap();
    assert_eq!(outcome, JobOutcome::Completed);
    assert_eq!(executor.processor().processed.load(Ordering::Relaxed), 95);

    let stored = client.get_job(QUEUE, child.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    let result: Value = serde_json::from_str(stored.result.as_deref().unwrap()).unwrap();
    assert_eq!(result["processed"], 95);
}

#[tokio::test]
async fn test_transient_failure_is_abandoned_then_fails_at_limit() {
    let (store, client) = setup();
    client
        .enqueue_group(
            QUEUE,
            &[
                JobDefinition::new("root", json!({})),
                JobDefinition::new("partition", json!({})),
            ],
        )
        .await
        .unwrap();
    let worker = WorkerJob::new(
        client.clone(),
        Arc::new(AlwaysTransient),
        Duration::from_millis(20),
        1,
    );

    let child = lease_child(&store).await;
    let definition = JobDefinition::parse(&child.definition).unwrap();
    let outcome = worker.run(child.clone(), &definition).await.unwrap();
    assert_eq!(outcome, JobOutcome::Abandoned);
    assert_eq!(
        client.get_job(QUEUE, child.id).await.unwrap().unwrap().status,
        JobStatus::Running
    );

    // A retried attempt that reached the limit fails for good
    let mut retried = client.get_job(QUEUE, child.id).await.unwrap().unwrap();
    retried.failure_count = 1;
    let outcome = worker.run(retried, &definition).await.unwrap();
    assert_eq!(outcome, JobOutcome::Failed);

    let stored = client.get_job(QUEUE, child.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored.result.unwrap().contains("resource store unavailable"));
}

#[tokio::test]
async fn test_stale_worker_cannot_finish() {
    let (store, client) = setup();
    client
        .enqueue_group(
            QUEUE,
            &[
                JobDefinition::new("root", json!({})),
                JobDefinition::new("partition", json!({})),
            ],
        )
        .await
        .unwrap();
    let child = lease_child(&store).await;

    // Someone else renewed the lease in the meantime
    client.heartbeat(&child.lease(), None).await.unwrap();

    assert!(!client.complete_job(&child.lease(), None).await.unwrap());
    let stored = client.get_job(QUEUE, child.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Running);
}
