//! Worker process host
//!
//! Runs `max_running_jobs` runners on tokio tasks. Each runner polls the
//! configured queue types, dispatches the leased job through the registry
//! and goes back to polling. On shutdown a runner finishes its current job
//! before exiting; runners still busy after the shutdown timeout are
//! aborted and their jobs come back once the lease expires.

use crate::config::QueueConfig;
use crate::core::jobs::context::JobOutcome;
use crate::core::jobs::summary::PartitionFailure;
use crate::core::jobs::{CoordinatorJob, JobHandler, JobRegistry, WorkerJob};
use crate::core::queue::QueueClient;
use crate::domain::{JobDefinition, JobInfo, JobQueueError, QueueType, Result};
use crate::{log_error_with_context, log_job_leased};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Pause after a failed dequeue before polling again
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Tunables of a [`JobHost`]
#[derive(Debug, Clone)]
pub struct HostSettings {
    pub queue_types: Vec<QueueType>,
    pub max_running_jobs: usize,
    pub heartbeat_interval: Duration,
    pub coordinator_poll_interval: Duration,
    pub max_failure_count: u32,
    pub shutdown_timeout: Duration,
}

impl HostSettings {
    pub fn from_config(config: &QueueConfig) -> Result<Self> {
        let queue_types = config
            .parsed_queue_types()
            .map_err(JobQueueError::Configuration)?;

        Ok(Self {
            queue_types,
            max_running_jobs: config.max_running_jobs.max(1),
            heartbeat_interval: config.heartbeat_interval(),
            coordinator_poll_interval: config.coordinator_poll_interval(),
            max_failure_count: config.max_failure_count,
            shutdown_timeout: Duration::from_secs(config.shutdown_timeout_secs),
        })
    }
}

/// Outcome counts of a host run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostReport {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub requeued: usize,
    pub abandoned: usize,
    pub lease_lost: usize,
    pub errors: usize,
}

impl HostReport {
    pub fn processed(&self) -> usize {
        self.completed
            + self.failed
            + self.cancelled
            + self.requeued
            + self.abandoned
            + self.lease_lost
    }
}

#[derive(Default)]
struct HostStats {
    completed: AtomicUsize,
    failed: AtomicUsize,
    cancelled: AtomicUsize,
    requeued: AtomicUsize,
    abandoned: AtomicUsize,
    lease_lost: AtomicUsize,
    errors: AtomicUsize,
}

impl HostStats {
    fn record(&self, outcome: JobOutcome) {
        let counter = match outcome {
            JobOutcome::Completed => &self.completed,
            JobOutcome::Failed => &self.failed,
            JobOutcome::Cancelled => &self.cancelled,
            JobOutcome::Requeued => &self.requeued,
            JobOutcome::Abandoned => &self.abandoned,
            JobOutcome::LeaseLost => &self.lease_lost,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> HostReport {
        HostReport {
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            lease_lost: self.lease_lost.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// The job-processing loop of one worker process
#[derive(Clone)]
pub struct JobHost {
    client: QueueClient,
    registry: Arc<JobRegistry>,
    settings: HostSettings,
    stats: Arc<HostStats>,
}

impl JobHost {
    pub fn new(client: QueueClient, registry: JobRegistry, settings: HostSettings) -> Self {
        Self {
            client,
            registry: Arc::new(registry),
            settings,
            stats: Arc::new(HostStats::default()),
        }
    }

    pub fn client(&self) -> &QueueClient {
        &self.client
    }

    pub fn settings(&self) -> &HostSettings {
        &self.settings
    }

    pub fn report(&self) -> HostReport {
        self.stats.snapshot()
    }

    /// Run until `shutdown` fires, then wait for in-flight jobs
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<HostReport> {
        if self.settings.queue_types.is_empty() {
            return Err(JobQueueError::Configuration(
                "No queue types to poll".to_string(),
            ));
        }

        tracing::info!(
            worker = %self.client.worker(),
            runners = self.settings.max_running_jobs,
            queue_types = ?self.settings.queue_types,
            job_types = ?self.registry.type_ids(),
            "Job host started"
        );

        let mut runners = JoinSet::new();
        for runner in 0..self.settings.max_running_jobs {
            let host = self.clone();
            let shutdown = shutdown.clone();
            runners.spawn(async move { host.runner(runner, shutdown).await });
        }

        let mut signal = shutdown;
        while !*signal.borrow() {
            if signal.changed().await.is_err() {
                break;
            }
        }

        tracing::info!(
            timeout_secs = self.settings.shutdown_timeout.as_secs(),
            "Shutdown requested, waiting for running jobs"
        );

        let drained = tokio::time::timeout(self.settings.shutdown_timeout, async {
            while let Some(joined) = runners.join_next().await {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Runner task panicked");
                }
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                still_running = runners.len(),
                "Shutdown timeout elapsed, abandoning running jobs to lease expiry"
            );
            runners.abort_all();
        }

        let report = self.report();
        tracing::info!(
            processed = report.processed(),
            completed = report.completed,
            failed = report.failed,
            errors = report.errors,
            "Job host stopped"
        );
        Ok(report)
    }

    async fn runner(&self, runner: usize, mut shutdown: watch::Receiver<bool>) {
        tracing::debug!(runner, "Runner started");

        loop {
            let job = match self
                .client
                .poll_dequeue_any(&self.settings.queue_types, &mut shutdown)
                .await
            {
                Ok(Some(job)) => job,
                Ok(None) => break,
                Err(e) => {
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    log_error_with_context!(e, "Dequeue failed");
                    tokio::select! {
                        _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                        _ = shutdown.changed() => {}
                    }
                    continue;
                }
            };

            log_job_leased!(job);
            let job_id = job.id;
            match self.process(job).await {
                Ok(outcome) => {
                    tracing::debug!(
                        runner,
                        job_id = %job_id,
                        outcome = %outcome,
                        "Job invocation done"
                    );
                    self.stats.record(outcome);
                }
                Err(e) => {
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    let context = format!("Processing job {job_id} failed");
                    log_error_with_context!(e, context.as_str());
                }
            }
        }

        tracing::debug!(runner, "Runner stopped");
    }

    /// Dispatch one leased job to its handler
    pub async fn process(&self, job: JobInfo) -> Result<JobOutcome> {
        let definition = match JobDefinition::parse(&job.definition) {
            Ok(definition) => definition,
            Err(e) => return self.reject(&job, e).await,
        };

        let handler = match self.registry.resolve(&definition) {
            Ok(handler) => handler.clone(),
            Err(e) => return self.reject(&job, e).await,
        };

        match handler {
            JobHandler::Coordinator(_) if !job.is_root() => {
                let err = JobQueueError::Validation(format!(
                    "coordinator type '{}' cannot run as a child job",
                    definition.type_id
                ));
                self.reject(&job, err).await
            }
            JobHandler::Coordinator(planner) => {
                CoordinatorJob::new(
                    self.client.clone(),
                    planner,
                    self.settings.coordinator_poll_interval,
                )
                .with_max_failure_count(self.settings.max_failure_count)
                .run(job, &definition)
                .await
            }
            JobHandler::Worker(executor) => {
                WorkerJob::new(
                    self.client.clone(),
                    executor,
                    self.settings.heartbeat_interval,
                    self.settings.max_failure_count,
                )
                .run(job, &definition)
                .await
            }
        }
    }

    /// Fail a job that cannot be dispatched at all
    async fn reject(&self, job: &JobInfo, error: JobQueueError) -> Result<JobOutcome> {
        tracing::error!(job_id = %job.id, error = %error, "Job cannot be dispatched");
        let failure = PartitionFailure {
            error: error.to_string(),
        };
        let failed = self
            .client
            .fail_job(&job.lease(), Some(failure.to_json()))
            .await?;
        Ok(if failed {
            JobOutcome::Failed
        } else {
            JobOutcome::LeaseLost
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_config() {
        let mut config = QueueConfig::default();
        config.queue_types = vec!["export".to_string(), "bulk_delete".to_string()];
        config.max_running_jobs = 0;

        let settings = HostSettings::from_config(&config).unwrap();
        assert_eq!(
            settings.queue_types,
            vec![QueueType::Export, QueueType::BulkDelete]
        );
        assert_eq!(settings.max_running_jobs, 1);
        assert_eq!(settings.shutdown_timeout, Duration::from_secs(config.shutdown_timeout_secs));
    }

    #[test]
    fn test_report_counts_every_outcome() {
        let stats = HostStats::default();
        stats.record(JobOutcome::Completed);
        stats.record(JobOutcome::Requeued);
        stats.record(JobOutcome::Requeued);
        stats.record(JobOutcome::LeaseLost);

        let report = stats.snapshot();
        assert_eq!(report.requeued, 2);
        assert_eq!(report.processed(), 4);
    }
}
