//! Worker jobs
//!
//! Runs one partition through its executor while a background task keeps
//! the lease alive. The heartbeat also carries staged checkpoints to the
//! store and reports cancellation or lease loss back to the executor.

use crate::adapters::database::HeartbeatOutcome;
use crate::core::jobs::context::{
    over_failure_limit, ExecutionContext, ExecutionError, JobOutcome, LeaseSignal,
};
use crate::core::jobs::registry::Executor;
use crate::core::jobs::summary::PartitionFailure;
use crate::core::queue::QueueClient;
use crate::domain::{JobDefinition, JobInfo, JobQueueError, JobStatus, LeaseToken, Result};
use crate::{log_job_finished, log_lease_lost};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(10);

pub struct WorkerJob {
    client: QueueClient,
    executor: Arc<dyn Executor>,
    heartbeat_interval: Duration,
    max_failure_count: u32,
}

impl WorkerJob {
    pub fn new(
        client: QueueClient,
        executor: Arc<dyn Executor>,
        heartbeat_interval: Duration,
        max_failure_count: u32,
    ) -> Self {
        Self {
            client,
            executor,
            heartbeat_interval: heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL),
            max_failure_count,
        }
    }

    /// Execute the leased partition `job`
    pub async fn run(&self, job: JobInfo, definition: &JobDefinition) -> Result<JobOutcome> {
        let started = Instant::now();
        let lease = job.lease();

        if job.cancel_requested {
            return self
                .finish(&job, &lease, JobStatus::Cancelled, None, started)
                .await;
        }

        if over_failure_limit(&job, self.max_failure_count) {
            let failure = PartitionFailure {
                error: format!(
                    "exceeded the failure limit of {} attempts",
                    self.max_failure_count
                ),
            };
            return self
                .finish(&job, &lease, JobStatus::Failed, Some(failure.to_json()), started)
                .await;
        }

        let (signal_tx, signal_rx) = watch::channel(LeaseSignal::Active);
        let (checkpoint_tx, checkpoint_rx) = watch::channel(None);
        let (stop_tx, stop_rx) = watch::channel(false);

        let keeper = tokio::spawn(keep_alive(
            self.client.clone(),
            lease,
            self.heartbeat_interval,
            checkpoint_rx,
            signal_tx,
            stop_rx,
        ));

        let ctx = ExecutionContext::new(job.clone(), signal_rx, checkpoint_tx);
        let executed = self.executor.execute(definition, &ctx).await;

        let _ = stop_tx.send(true);
        let lease = match keeper.await {
            Ok(Some(lease)) => lease,
            Ok(None) => return Ok(JobOutcome::LeaseLost),
            Err(e) => {
                return Err(JobQueueError::Other(format!(
                    "Heartbeat task for job {} failed: {e}",
                    job.id
                )))
            }
        };

        match executed {
            Ok(value) => {
                self.finish(&job, &lease, JobStatus::Completed, Some(value.to_string()), started)
                    .await
            }
            Err(ExecutionError::Cancelled) => {
                self.finish(&job, &lease, JobStatus::Cancelled, None, started)
                    .await
            }
            Err(ExecutionError::Permanent(error)) => {
                tracing::warn!(job_id = %job.id, error = %error, "Partition failed");
                let failure = PartitionFailure { error };
                self.finish(&job, &lease, JobStatus::Failed, Some(failure.to_json()), started)
                    .await
            }
            Err(ExecutionError::Transient(error))
                if job.failure_count >= self.max_failure_count =>
            {
                let failure = PartitionFailure {
                    error: format!("{error} (giving up after {} attempts)", job.failure_count + 1),
                };
                self.finish(&job, &lease, JobStatus::Failed, Some(failure.to_json()), started)
                    .await
            }
            Err(ExecutionError::Transient(error)) => {
                tracing::warn!(
                    job_id = %job.id,
                    failure_count = job.failure_count,
                    error = %error,
                    "Partition failed transiently, leaving the lease to expire"
                );
                Ok(JobOutcome::Abandoned)
            }
            Err(ExecutionError::LeaseLost) => {
                log_lease_lost!(lease, "execute");
                Ok(JobOutcome::LeaseLost)
            }
        }
    }

    async fn finish(
        &self,
        job: &JobInfo,
        lease: &LeaseToken,
        status: JobStatus,
        result: Option<String>,
        started: Instant,
    ) -> Result<JobOutcome> {
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

/// Renew `lease` every `interval` until `stop` fires
///
/// Returns the final lease, or `None` once the lease was lost.
async fn keep_alive(
    client: QueueClient,
    mut lease: LeaseToken,
    interval: Duration,
    mut checkpoints: watch::Receiver<Option<String>>,
    signals: watch::Sender<LeaseSignal>,
    mut stop: watch::Receiver<bool>,
) -> Option<LeaseToken> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    let mut pending: Option<String> = None;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.changed() => break,
        }

        if checkpoints.has_changed().unwrap_or(false) {
            pending = checkpoints.borrow_and_update().clone();
        }

        if !renew(&client, &mut lease, &mut pending, &signals).await {
            return None;
        }
    }

    // Persist a checkpoint staged since the last tick
    if checkpoints.has_changed().unwrap_or(false) {
        pending = checkpoints.borrow_and_update().clone();
    }
    if pending.is_some() && !renew(&client, &mut lease, &mut pending, &signals).await {
        return None;
    }

    Some(lease)
}

/// One heartbeat; `false` once the lease is gone
async fn renew(
    client: &QueueClient,
    lease: &mut LeaseToken,
    pending: &mut Option<String>,
    signals: &watch::Sender<LeaseSignal>,
) -> bool {
    match client.heartbeat(lease, pending.clone()).await {
        Ok(HeartbeatOutcome::Renewed {
            version,
            cancel_requested,
        }) => {
            *lease = lease.with_version(version);
            *pending = None;
            if cancel_requested {
                signals.send_if_modified(|signal| {
                    let changed = *signal == LeaseSignal::Active;
                    if changed {
                        *signal = LeaseSignal::CancelRequested;
                    }
                    changed
                });
            }
            true
        }
        Ok(HeartbeatOutcome::LeaseLost) => {
            log_lease_lost!(lease, "heartbeat");
            signals.send_replace(LeaseSignal::LeaseLost);
            false
        }
        Err(e) => {
            // The lease may still be ours; the next tick tries again
            tracing::warn!(job_id = %lease.job_id, error = %e, "Heartbeat failed");
            true
        }
    }
}
