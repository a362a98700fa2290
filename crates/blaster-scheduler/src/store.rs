use std::sync::{Mutex, MutexGuard};

use blaster_core::{BroadcastJob, DeliveryResult, JobId, JobStatus};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
};

const SELECT_COLUMNS: &str = "SELECT id, job_type, recipients, message_body, attachments,
        scheduled_at, ends_at, status, delivery_result, failure_reason,
        created_at, updated_at
 FROM broadcast_jobs";

/// Durable table of broadcast jobs.
///
/// Writes to `status` / `delivery_result` are compare-and-set from
/// `scheduled`, so a job reaches a terminal state at most once.
pub trait JobStore: Send + Sync {
    fn insert(&self, job: &BroadcastJob) -> Result<()>;

    fn get(&self, id: &JobId) -> Result<Option<BroadcastJob>>;

    fn list_by_status(&self, status: JobStatus) -> Result<Vec<BroadcastJob>>;

    fn list_all(&self) -> Result<Vec<BroadcastJob>>;

    /// Overwrite the editable fields of a job that is still `scheduled`.
    fn update_scheduled(&self, job: &BroadcastJob) -> Result<()>;

    /// Move a `scheduled` job to `cancelled`. Returns `false` (and changes
    /// nothing) when the job is already terminal or does not exist.
    fn cancel(&self, id: &JobId) -> Result<bool>;

    /// Terminal transition written by the result reporter.
    /// Returns `false` when the job was no longer `scheduled`.
    fn update_status(
        &self,
        id: &JobId,
        status: JobStatus,
        result: Option<&DeliveryResult>,
        failure_reason: Option<&str>,
    ) -> Result<bool>;
}

/// SQLite-backed [`JobStore`]. One connection, serialized behind a mutex.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| SchedulerError::Poisoned)
    }

    fn query_jobs(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<BroadcastJob>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(sql)?;
        let rows: Vec<JobRow> = stmt
            .query_map(params, JobRow::read)?
            .collect::<rusqlite::Result<_>>()?;
        rows.into_iter().map(JobRow::into_job).collect()
    }
}

impl JobStore for SqliteJobStore {
    fn insert(&self, job: &BroadcastJob) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO broadcast_jobs
             (id, job_type, recipients, message_body, attachments, scheduled_at,
              ends_at, status, delivery_result, failure_reason, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
            rusqlite::params![
                job.id.as_str(),
                job.job_type.to_string(),
                serde_json::to_string(&job.recipients)?,
                job.message_body,
                serde_json::to_string(&job.attachments)?,
                job.scheduled_at.to_rfc3339(),
                job.ends_at.map(|t| t.to_rfc3339()),
                job.status.to_string(),
                job.delivery_result
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                job.failure_reason,
                job.created_at.to_rfc3339(),
                job.updated_at.to_rfc3339(),
            ],
        )?;
        info!(job_id = %job.id, recipients = job.recipients.len(), "job inserted");
        Ok(())
    }

    fn get(&self, id: &JobId) -> Result<Option<BroadcastJob>> {
        let row = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare_cached(&format!("{SELECT_COLUMNS} WHERE id = ?1"))?;
            stmt.query_row([id.as_str()], JobRow::read).optional()?
        };
        row.map(JobRow::into_job).transpose()
    }

    fn list_by_status(&self, status: JobStatus) -> Result<Vec<BroadcastJob>> {
        let status = status.to_string();
        self.query_jobs(
            &format!("{SELECT_COLUMNS} WHERE status = ?1 ORDER BY scheduled_at, created_at"),
            &[&status],
        )
    }

    fn list_all(&self) -> Result<Vec<BroadcastJob>> {
        self.query_jobs(&format!("{SELECT_COLUMNS} ORDER BY created_at"), &[])
    }

    fn update_scheduled(&self, job: &BroadcastJob) -> Result<()> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE broadcast_jobs
             SET job_type=?1, recipients=?2, message_body=?3, attachments=?4,
                 scheduled_at=?5, ends_at=?6, updated_at=?7
             WHERE id=?8 AND status='scheduled'",
            rusqlite::params![
                job.job_type.to_string(),
                serde_json::to_string(&job.recipients)?,
                job.message_body,
                serde_json::to_string(&job.attachments)?,
                job.scheduled_at.to_rfc3339(),
                job.ends_at.map(|t| t.to_rfc3339()),
                job.updated_at.to_rfc3339(),
                job.id.as_str(),
            ],
        )?;
        if n == 1 {
            info!(job_id = %job.id, scheduled_at = %job.scheduled_at, "job edited");
            return Ok(());
        }

        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM broadcast_jobs WHERE id = ?1",
                [job.id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        match status {
            Some(status) => Err(SchedulerError::NotEditable {
                id: job.id.to_string(),
                status,
            }),
            None => Err(SchedulerError::JobNotFound {
                id: job.id.to_string(),
            }),
        }
    }

    fn cancel(&self, id: &JobId) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE broadcast_jobs SET status='cancelled', updated_at=?1
             WHERE id=?2 AND status='scheduled'",
            rusqlite::params![Utc::now().to_rfc3339(), id.as_str()],
        )?;
        if n == 0 {
            debug!(job_id = %id, "cancel ignored: job not scheduled");
        } else {
            info!(job_id = %id, "job cancelled");
        }
        Ok(n > 0)
    }

    fn update_status(
        &self,
        id: &JobId,
        status: JobStatus,
        result: Option<&DeliveryResult>,
        failure_reason: Option<&str>,
    ) -> Result<bool> {
        let result_json = result.map(serde_json::to_string).transpose()?;
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE broadcast_jobs
             SET status=?1, delivery_result=?2, failure_reason=?3, updated_at=?4
             WHERE id=?5 AND status='scheduled'",
            rusqlite::params![
                status.to_string(),
                result_json,
                failure_reason,
                Utc::now().to_rfc3339(),
                id.as_str(),
            ],
        )?;
        Ok(n > 0)
    }
}

/// Raw column values, decoded into a [`BroadcastJob`] after the statement is dropped.
struct JobRow {
    id: String,
    job_type: String,
    recipients: String,
    message_body: Option<String>,
    attachments: String,
    scheduled_at: String,
    ends_at: Option<String>,
    status: String,
    delivery_result: Option<String>,
    failure_reason: Option<String>,
    created_at: String,
    updated_at: String,
}

impl JobRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            job_type: row.get(1)?,
            recipients: row.get(2)?,
            message_body: row.get(3)?,
            attachments: row.get(4)?,
            scheduled_at: row.get(5)?,
            ends_at: row.get(6)?,
            status: row.get(7)?,
            delivery_result: row.get(8)?,
            failure_reason: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn into_job(self) -> Result<BroadcastJob> {
        let corrupt = |reason: String| SchedulerError::CorruptRow {
            id: self.id.clone(),
            reason,
        };
        let job_type = self.job_type.parse().map_err(corrupt)?;
        let status = self.status.parse().map_err(corrupt)?;
        let scheduled_at = parse_ts(&self.scheduled_at).map_err(corrupt)?;
        let ends_at = self
            .ends_at
            .as_deref()
            .map(parse_ts)
            .transpose()
            .map_err(corrupt)?;
        let created_at = parse_ts(&self.created_at).map_err(corrupt)?;
        let updated_at = parse_ts(&self.updated_at).map_err(corrupt)?;
        let delivery_result = self
            .delivery_result
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(BroadcastJob {
            id: JobId(self.id),
            job_type,
            recipients: serde_json::from_str(&self.recipients)?,
            message_body: self.message_body,
            attachments: serde_json::from_str(&self.attachments)?,
            scheduled_at,
            ends_at,
            status,
            delivery_result,
            failure_reason: self.failure_reason,
            created_at,
            updated_at,
        })
    }
}

fn parse_ts(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp {s:?}: {e}"))
}
