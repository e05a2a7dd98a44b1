//! PostgreSQL implementation of [`JobStore`]
//!
//! Every lease-affecting operation is a single conditional `UPDATE` on
//! `(queue_type, id, version)`. Dequeue claims a row with
//! `FOR UPDATE SKIP LOCKED` so concurrent workers never block on, or both
//! win, the same record. Fan-out runs in one transaction whose first
//! statement is the coordinator's version check.

use crate::adapters::database::traits::{DequeueRequest, FanOut, HeartbeatOutcome, JobStore};
use crate::adapters::postgresql::client::PostgreSQLClient;
use crate::adapters::postgresql::errors::store_error;
use crate::adapters::postgresql::models::{jobs_from_rows, JOB_COLUMNS};
use crate::domain::{
    GroupId, JobId, JobInfo, JobQueueError, JobStatus, LeaseToken, QueueType, Result,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// PostgreSQL-backed job store
pub struct PostgreSQLJobStore {
    client: Arc<PostgreSQLClient>,
}

impl PostgreSQLJobStore {
    /// Create a new PostgreSQL job store
    pub fn new(client: PostgreSQLClient) -> Self {
        Self {
            client: Arc::new(client),
        }
    }

    /// Create a store sharing an existing client
    pub fn new_with_arc(client: Arc<PostgreSQLClient>) -> Self {
        Self { client }
    }

    /// Get a reference to the underlying client
    pub fn client(&self) -> &Arc<PostgreSQLClient> {
        &self.client
    }
}

fn seconds(duration: Duration) -> f64 {
    duration.as_secs_f64()
}

fn dequeue_sql() -> String {
    format!(
        r#"
        UPDATE job_queue AS j
        SET status = 'running',
            failure_count = j.failure_count + CASE WHEN j.status = 'running' THEN 1 ELSE 0 END,
            heartbeat_at = now(),
            version = j.version + 1,
            worker = $3,
            started_at = COALESCE(j.started_at, now())
        FROM (
            SELECT queue_type, id
            FROM job_queue
            WHERE queue_type = $1
              AND (
                    (status = 'queued' AND available_at <= now())
                 OR (status = 'running' AND heartbeat_at < now() - make_interval(secs => $2))
              )
              AND ($4 OR id <> group_id)
            ORDER BY id
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        ) AS candidate
        WHERE j.queue_type = candidate.queue_type AND j.id = candidate.id
        RETURNING {}
        "#,
        JOB_COLUMNS
            .split(", ")
            .map(|column| format!("j.{}", column.trim()))
            .collect::<Vec<_>>()
            .join(", ")
    )
}

async fn insert_jobs<C>(
    conn: &C,
    queue_type: QueueType,
    group_id: Option<i64>,
    definitions: Vec<String>,
) -> Result<Vec<JobInfo>>
where
    C: tokio_postgres::GenericClient + Sync,
{
    let count = definitions.len() as i64;
    let id_rows = conn
        .query(
            "SELECT nextval('job_queue_id_seq') AS id FROM generate_series(1, $1::BIGINT)",
            &[&count],
        )
        .await
        .map_err(|e| store_error(e, "Failed to allocate job ids"))?;

    let mut ids = id_rows
        .iter()
        .map(|row| row.try_get::<_, i64>("id"))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| store_error(e, "Failed to read job ids"))?;
    ids.sort_unstable();

    let group_id = match group_id.or_else(|| ids.first().copied()) {
        Some(group_id) => group_id,
        None => return Ok(Vec::new()),
    };

    let insert = format!(
        r#"
        INSERT INTO job_queue (queue_type, id, group_id, status, definition)
        SELECT $1::TEXT, t.id, $2::BIGINT, 'queued', t.definition
        FROM UNNEST($3::BIGINT[], $4::TEXT[]) AS t(id, definition)
        RETURNING {}
        "#,
        JOB_COLUMNS
    );
    let rows = conn
        .query(
            insert.as_str(),
            &[&queue_type.as_str(), &group_id, &ids, &definitions],
        )
        .await
        .map_err(|e| store_error(e, "Failed to insert jobs"))?;

    jobs_from_rows(&rows)
}

#[async_trait]
impl JobStore for PostgreSQLJobStore {
    fn backend_name(&self) -> &'static str {
        "postgresql"
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.client.test_connection().await?;
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

        let conn = self.client.get_connection().await?;
        insert_jobs(&**conn, queue_type, group_id.map(|g| g.value()), definitions).await
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
        let mut conn = self.client.get_connection().await?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| store_error(e, "Failed to begin fan-out transaction"))?;

        let claimed = tx
            .query_opt(
                r#"
                UPDATE job_queue
                SET version = version + 1, heartbeat_at = now()
                WHERE queue_type = $1 AND id = $2 AND version = $3 AND status = 'running'
                RETURNING group_id, version
                "#,
                &[
                    &coordinator.queue_type.as_str(),
                    &coordinator.job_id.value(),
                    &coordinator.version,
                ],
            )
            .await
            .map_err(|e| store_error(e, "Failed to claim coordinator for fan-out"))?;

        let Some(claimed) = claimed else {
            return Ok(FanOut::LeaseLost);
        };
        let group_id: i64 = claimed
            .try_get("group_id")
            .map_err(|e| store_error(e, "Failed to read coordinator group"))?;
        let coordinator_version: i64 = claimed
            .try_get("version")
            .map_err(|e| store_error(e, "Failed to read coordinator version"))?;

        let planned: bool = tx
            .query_one(
                r#"
                SELECT EXISTS (
                    SELECT 1 FROM job_queue
                    WHERE queue_type = $1 AND group_id = $2 AND id <> group_id
                ) AS planned
                "#,
                &[&coordinator.queue_type.as_str(), &group_id],
            )
            .await
            .and_then(|row| row.try_get("planned"))
            .map_err(|e| store_error(e, "Failed to check existing children"))?;

        if planned {
            // Dropping the transaction rolls back the version bump
            return Ok(FanOut::AlreadyPlanned);
        }

        let jobs = if definitions.is_empty() {
            Vec::new()
        } else {
            insert_jobs(&*tx, coordinator.queue_type, Some(group_id), definitions).await?
        };

        tx.commit()
            .await
            .map_err(|e| store_error(e, "Failed to commit fan-out"))?;

        Ok(FanOut::Created {
            jobs,
            coordinator_version,
        })
    }

    #[instrument(skip_all, err, fields(queue_type = %request.queue_type, worker = %request.worker))]
    async fn dequeue(&self, request: &DequeueRequest) -> Result<Option<JobInfo>> {
        let rows = self
            .client
            .query(
                &dequeue_sql(),
                &[
                    &request.queue_type.as_str(),
                    &seconds(request.lease),
                    &request.worker,
                    &request.include_root_jobs,
                ],
            )
            .await?;

        Ok(jobs_from_rows(&rows)?.into_iter().next())
    }

    async fn heartbeat(
        &self,
        lease: &LeaseToken,
        checkpoint: Option<String>,
    ) -> Result<HeartbeatOutcome> {
        let rows = self
            .client
            .query(
                r#"
                UPDATE job_queue
                SET version = version + 1,
                    heartbeat_at = now(),
                    result = COALESCE($4, result)
                WHERE queue_type = $1 AND id = $2 AND version = $3 AND status = 'running'
                RETURNING version, cancel_requested
                "#,
                &[
                    &lease.queue_type.as_str(),
                    &lease.job_id.value(),
                    &lease.version,
                    &checkpoint,
                ],
            )
            .await?;

        let Some(row) = rows.first() else {
            return Ok(HeartbeatOutcome::LeaseLost);
        };

        Ok(HeartbeatOutcome::Renewed {
            version: row
                .try_get("version")
                .map_err(|e| store_error(e, "Failed to read heartbeat version"))?,
            cancel_requested: row
                .try_get("cancel_requested")
                .map_err(|e| store_error(e, "Failed to read cancel flag"))?,
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

        let updated = self
            .client
            .execute(
                r#"
                UPDATE job_queue
                SET status = $4, result = $5, version = version + 1, ended_at = now()
                WHERE queue_type = $1 AND id = $2 AND version = $3 AND status = 'running'
                "#,
                &[
                    &lease.queue_type.as_str(),
                    &lease.job_id.value(),
                    &lease.version,
                    &status.as_str(),
                    &result,
                ],
            )
            .await?;

        Ok(updated == 1)
    }

    async fn requeue(
        &self,
        lease: &LeaseToken,
        result: Option<String>,
        delay: Duration,
    ) -> Result<bool> {
        let updated = self
            .client
            .execute(
                r#"
                UPDATE job_queue
                SET status = 'queued',
                    available_at = now() + make_interval(secs => $5),
                    result = COALESCE($4, result),
                    version = version + 1
                WHERE queue_type = $1 AND id = $2 AND version = $3 AND status = 'running'
                "#,
                &[
                    &lease.queue_type.as_str(),
                    &lease.job_id.value(),
                    &lease.version,
                    &result,
                    &seconds(delay),
                ],
            )
            .await?;

        Ok(updated == 1)
    }

    async fn get_by_id(&self, queue_type: QueueType, id: JobId) -> Result<Option<JobInfo>> {
        let query = format!(
            "SELECT {} FROM job_queue WHERE queue_type = $1 AND id = $2",
            JOB_COLUMNS
        );
        let rows = self
            .client
            .query(&query, &[&queue_type.as_str(), &id.value()])
            .await?;

        Ok(jobs_from_rows(&rows)?.into_iter().next())
    }

    async fn get_by_group_id(
        &self,
        queue_type: QueueType,
        group_id: GroupId,
    ) -> Result<Vec<JobInfo>> {
        let query = format!(
            "SELECT {} FROM job_queue WHERE queue_type = $1 AND group_id = $2 ORDER BY id",
            JOB_COLUMNS
        );
        let rows = self
            .client
            .query(&query, &[&queue_type.as_str(), &group_id.value()])
            .await?;

        jobs_from_rows(&rows)
    }

    #[instrument(skip(self), err)]
    async fn request_cancel(&self, queue_type: QueueType, group_id: GroupId) -> Result<usize> {
        let updated = self
            .client
            .execute(
                r#"
                UPDATE job_queue
                SET cancel_requested = TRUE
                WHERE queue_type = $1 AND group_id = $2
                  AND status NOT IN ('completed', 'failed', 'cancelled')
                "#,
                &[&queue_type.as_str(), &group_id.value()],
            )
            .await?;

        Ok(updated as usize)
    }

    async fn count_running_roots(&self, queue_type: QueueType, lease: Duration) -> Result<usize> {
        let rows = self
            .client
            .query(
                r#"
                SELECT COUNT(*) AS running
                FROM job_queue
                WHERE queue_type = $1
                  AND id = group_id
                  AND status = 'running'
                  AND heartbeat_at >= now() - make_interval(secs => $2)
                "#,
                &[&queue_type.as_str(), &seconds(lease)],
            )
            .await?;

        let running: i64 = match rows.first() {
            Some(row) => row
                .try_get("running")
                .map_err(|e| store_error(e, "Failed to read running count"))?,
            None => 0,
        };
        Ok(running.max(0) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dequeue_sql_qualifies_returning_columns() {
        let sql = dequeue_sql();
        assert!(sql.contains("RETURNING j.queue_type, j.id, j.group_id"));
        assert!(sql.contains("FOR UPDATE SKIP LOCKED"));
        assert!(sql.contains("j.failure_count + CASE WHEN j.status = 'running'"));
    }

    #[test]
    fn test_seconds_keeps_fractions() {
        assert_eq!(seconds(Duration::from_millis(1500)), 1.5);
    }
}
