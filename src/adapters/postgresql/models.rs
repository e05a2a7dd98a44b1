//! PostgreSQL row models
//!
//! Maps rows of the `job_queue` table to [`JobInfo`].

use crate::domain::{GroupId, JobId, JobInfo, JobStatus, QueueType, Result, StoreError};
use chrono::{DateTime, Utc};
use std::str::FromStr;
use tokio_postgres::Row;

/// Column list shared by every statement returning whole records
pub const JOB_COLUMNS: &str = "queue_type, id, group_id, status, definition, result, version, \
     heartbeat_at, cancel_requested, failure_count, created_at, available_at, started_at, \
     ended_at, worker";

/// One `job_queue` row as stored
#[derive(Debug, Clone)]
pub struct PostgreSQLJob {
    pub queue_type: String,
    pub id: i64,
    pub group_id: i64,
    pub status: String,
    pub definition: String,
    pub result: Option<String>,
    pub version: i64,
    pub heartbeat_at: DateTime<Utc>,
    pub cancel_requested: bool,
    pub failure_count: i32,
    pub created_at: DateTime<Utc>,
    pub available_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub worker: Option<String>,
}

impl PostgreSQLJob {
    /// Read a row produced by a `SELECT`/`RETURNING` of [`JOB_COLUMNS`]
    pub fn from_row(row: &Row) -> Result<Self> {
        let column_error =
            |e: tokio_postgres::Error| StoreError::Fatal(format!("Malformed job_queue row: {e}"));

        Ok(Self {
            queue_type: row.try_get("queue_type").map_err(column_error)?,
            id: row.try_get("id").map_err(column_error)?,
            group_id: row.try_get("group_id").map_err(column_error)?,
            status: row.try_get("status").map_err(column_error)?,
            definition: row.try_get("definition").map_err(column_error)?,
            result: row.try_get("result").map_err(column_error)?,
            version: row.try_get("version").map_err(column_error)?,
            heartbeat_at: row.try_get("heartbeat_at").map_err(column_error)?,
            cancel_requested: row.try_get("cancel_requested").map_err(column_error)?,
            failure_count: row.try_get("failure_count").map_err(column_error)?,
            created_at: row.try_get("created_at").map_err(column_error)?,
            available_at: row.try_get("available_at").map_err(column_error)?,
            started_at: row.try_get("started_at").map_err(column_error)?,
            ended_at: row.try_get("ended_at").map_err(column_error)?,
            worker: row.try_get("worker").map_err(column_error)?,
        })
    }

    /// Convert to the domain record
    pub fn into_domain(self) -> Result<JobInfo> {
        let queue_type = QueueType::from_str(&self.queue_type).map_err(StoreError::Fatal)?;
        let status = JobStatus::from_str(&self.status).map_err(StoreError::Fatal)?;
        let failure_count = u32::try_from(self.failure_count).map_err(|_| {
            StoreError::Fatal(format!(
                "Invalid failure_count {} for job {}",
                self.failure_count, self.id
            ))
        })?;

        Ok(JobInfo {
            id: JobId::new(self.id),
            queue_type,
            group_id: GroupId::new(self.group_id),
            status,
            definition: self.definition,
            result: self.result,
            version: self.version,
            heartbeat_at: self.heartbeat_at,
            cancel_requested: self.cancel_requested,
            failure_count,
            created_at: self.created_at,
            available_at: self.available_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
            worker: self.worker,
        })
    }
}

/// Map a set of rows to domain records, ordered by id
pub fn jobs_from_rows(rows: &[Row]) -> Result<Vec<JobInfo>> {
    let mut jobs = rows
        .iter()
        .map(|row| PostgreSQLJob::from_row(row).and_then(PostgreSQLJob::into_domain))
        .collect::<Result<Vec<_>>>()?;
    jobs.sort_by_key(|job| job.id);
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(status: &str) -> PostgreSQLJob {
        let now = Utc::now();
        PostgreSQLJob {
            queue_type: "bulk_delete".to_string(),
            id: 5,
            group_id: 5,
            status: status.to_string(),
            definition: "{}".to_string(),
            result: None,
            version: 2,
            heartbeat_at: now,
            cancel_requested: true,
            failure_count: 1,
            created_at: now,
            available_at: now,
            started_at: Some(now),
            ended_at: None,
            worker: Some("w".to_string()),
        }
    }

    #[test]
    fn test_into_domain() {
        let job = stored("running").into_domain().unwrap();
        assert_eq!(job.queue_type, QueueType::BulkDelete);
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.is_root());
        assert!(job.cancel_requested);
        assert_eq!(job.failure_count, 1);
    }

    #[test]
    fn test_unknown_status_is_fatal() {
        let err = stored("paused").into_domain().unwrap_err();
        assert!(err.to_string().contains("Invalid job status"));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_negative_failure_count_is_fatal() {
        let mut row = stored("queued");
        row.failure_count = -1;
        let err = row.into_domain().unwrap_err();
        assert!(err.to_string().contains("Invalid failure_count -1"));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_job_columns_cover_every_field() {
        for column in [
            "queue_type",
            "group_id",
            "heartbeat_at",
            "failure_count",
            "available_at",
            "worker",
        ] {
            assert!(JOB_COLUMNS.contains(column));
        }
    }
}
