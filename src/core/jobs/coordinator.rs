//! Coordinator jobs
//!
//! A coordinator is the root of its group. It runs many short invocations
//! instead of one long one: the first plans and fans out, later ones look at
//! the children and either requeue themselves or finalize. Nothing is kept
//! in memory between invocations; the group in the store is the state.

use crate::adapters::database::FanOut;
use crate::core::jobs::context::{over_failure_limit, JobOutcome};
use crate::core::jobs::registry::Planner;
use crate::core::jobs::summary::{
    partition_error, CoordinatorPhase, CoordinatorReport, PartitionResult, StatusCounts,
};
use crate::core::queue::QueueClient;
use crate::domain::{JobDefinition, JobInfo, JobQueueError, JobStatus, LeaseToken, Result};
use crate::{log_job_finished, log_lease_lost};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct CoordinatorJob {
    client: QueueClient,
    planner: Arc<dyn Planner>,
    poll_interval: Duration,
    max_failure_count: u32,
}

impl CoordinatorJob {
    pub fn new(client: QueueClient, planner: Arc<dyn Planner>, poll_interval: Duration) -> Self {
        Self {
            client,
            planner,
            poll_interval,
            max_failure_count: u32::MAX,
        }
    }

    pub fn with_max_failure_count(mut self, max_failure_count: u32) -> Self {
        self.max_failure_count = max_failure_count;
        self
    }

    /// Run one invocation for the leased root `job`
    pub async fn run(&self, job: JobInfo, definition: &JobDefinition) -> Result<JobOutcome> {
        let started = Instant::now();
        let mut lease = job.lease();

        let mut children = self.children(&job).await?;

        if children.is_empty() {
            // Once children exist the group must drain, so the limit only
            // applies before fan-out
            if over_failure_limit(&job, self.max_failure_count) {
                let report =
                    CoordinatorReport::new(CoordinatorPhase::Failed, StatusCounts::default())
                        .with_message(format!(
                            "coordinator abandoned {} times, giving up",
                            job.failure_count
                        ));
                return self.finish(&job, &lease, JobStatus::Failed, report, started).await;
            }

            if job.cancel_requested {
                let report =
                    CoordinatorReport::new(CoordinatorPhase::Cancelled, StatusCounts::default())
                        .with_message("cancelled before planning");
                return self.finish(&job, &lease, JobStatus::Cancelled, report, started).await;
            }

            let partitions = match self.planner.plan(definition).await {
                Ok(partitions) => partitions,
                Err(e) => {
                    let err = JobQueueError::Planning(e.to_string());
                    tracing::error!(job_id = %job.id, error = %err, "Planning failed");
                    let report =
                        CoordinatorReport::new(CoordinatorPhase::Failed, StatusCounts::default())
                            .with_message(err.to_string());
                    return self.finish(&job, &lease, JobStatus::Failed, report, started).await;
                }
            };

            if partitions.is_empty() {
                let report =
                    CoordinatorReport::new(CoordinatorPhase::Completed, StatusCounts::default())
                        .with_message("nothing to do");
                return self.finish(&job, &lease, JobStatus::Completed, report, started).await;
            }

            match self.client.create_children(&lease, &partitions).await? {
                FanOut::Created {
                    jobs,
                    coordinator_version,
                } => {
                    tracing::info!(
                        queue_type = %job.queue_type,
                        group_id = %job.group_id,
                        partitions = jobs.len(),
                        "Coordinator fanned out"
                    );
                    lease = lease.with_version(coordinator_version);
                    children = jobs;
                }
                FanOut::AlreadyPlanned => {
                    tracing::info!(group_id = %job.group_id, "Group already planned");
                    children = self.children(&job).await?;
                }
                FanOut::LeaseLost => {
                    log_lease_lost!(lease, "fan-out");
                    return Ok(JobOutcome::LeaseLost);
                }
            }
        }

        let counts = StatusCounts::tally(&children);
        if !counts.all_terminal() {
            tracing::debug!(group_id = %job.group_id, progress = %counts, "Children still running");
            let report = CoordinatorReport::new(CoordinatorPhase::Monitoring, counts).to_json()?;
            let requeued = self
                .client
                .requeue(&lease, Some(report), self.poll_interval)
                .await?;
            return Ok(if requeued {
                JobOutcome::Requeued
            } else {
                JobOutcome::LeaseLost
            });
        }

        let (status, report) = aggregate(&children, counts);
        self.finish(&job, &lease, status, report, started).await
    }

    async fn children(&self, job: &JobInfo) -> Result<Vec<JobInfo>> {
        Ok(self
            .client
            .get_group(job.queue_type, job.group_id)
            .await?
            .into_iter()
            .filter(|member| !member.is_root())
            .collect())
    }

    async fn finish(
        &self,
        job: &JobInfo,
        lease: &LeaseToken,
        status: JobStatus,
        report: CoordinatorReport,
        started: Instant,
    ) -> Result<JobOutcome> {
        let result = Some(report.to_json()?);
        let finished = match status {
            JobStatus::Completed => self.client.complete_job(lease, result).await?,
            JobStatus::Cancelled => self.client.cancel_job(lease, result).await?,
            _ => self.client.fail_job(lease, result).await?,
        };

        if !finished {
            return Ok(JobOutcome::LeaseLost);
        }

        log_job_finished!(job, status, started.elapsed());
        Ok(match status {
            JobStatus::Completed => JobOutcome::Completed,
            JobStatus::Cancelled => JobOutcome::Cancelled,
            _ => JobOutcome::Failed,
        })
    }
}

/// Final status of a group whose children are all terminal
///
/// Cancellation wins over failure, failure over success.
fn aggregate(children: &[JobInfo], counts: StatusCounts) -> (JobStatus, CoordinatorReport) {
    if counts.cancelled > 0 {
        let report = CoordinatorReport::new(CoordinatorPhase::Cancelled, counts).with_message(
            format!("{} of {} partitions cancelled", counts.cancelled, counts.total),
        );
        return (JobStatus::Cancelled, report);
    }

    if counts.failed > 0 {
        let mut report = CoordinatorReport::new(CoordinatorPhase::Failed, counts).with_message(
            JobQueueError::Aggregate {
                failed: counts.failed,
                total: counts.total,
            }
            .to_string(),
        );
        report.errors = children
            .iter()
            .filter(|child| child.status == JobStatus::Failed)
            .map(partition_error)
            .collect();
        return (JobStatus::Failed, report);
    }

    let mut report = CoordinatorReport::new(CoordinatorPhase::Completed, counts);
    report.results = children
        .iter()
        .map(|child| PartitionResult {
            job_id: child.id.value(),
            result: child
                .result
                .as_deref()
                .map(|raw| {
                    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
                })
                .unwrap_or(Value::Null),
        })
        .collect();
    (JobStatus::Completed, report)
}
