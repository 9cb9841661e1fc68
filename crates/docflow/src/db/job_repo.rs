//! Job repository: the tracker for the `jobs` table.
//!
//! Every mutation after creation goes through [`update`], which applies
//! only the supplied fields, stamps `updated_at`, and never moves a job
//! backwards: status regressions are ignored, progress only grows, and
//! terminal jobs are left untouched.

use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;

use super::{now, object_or_empty, DatabaseError};
use crate::model::{Job, JobStatus, JobType, Payload};

impl Job {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let task: Option<Value> = row.get("task")?;
        Ok(Self {
            id: row.get("id")?,
            uuid: row.get("uuid")?,
            job_type: row.get("type")?,
            status: row.get("status")?,
            file: row.get("file")?,
            task: task.map(|v| object_or_empty(Some(v))),
            progress: row.get("progress")?,
            message: row.get("message")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Fields of a job at creation time.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub uuid: String,
    pub job_type: JobType,
    pub file: Option<String>,
    pub message: Option<String>,
}

/// Partial update. `None` fields are left as they are.
#[derive(Debug, Default, Clone)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub message: Option<String>,
    pub progress: Option<u8>,
    pub task: Option<Payload>,
}

impl JobUpdate {
    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn task(mut self, task: Payload) -> Self {
        self.task = Some(task);
        self
    }
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub job_type: Option<JobType>,
    pub status: Option<JobStatus>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new PENDING job at progress 0.
pub fn insert(conn: &Connection, job: &NewJob) -> Result<Job, DatabaseError> {
    let created_at = now();
    conn.execute(
        "INSERT INTO jobs (uuid, type, status, file, task, progress, message, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, NULL, 0, ?5, ?6, ?6)",
        params![
            job.uuid,
            job.job_type,
            JobStatus::Pending,
            job.file,
            job.message,
            created_at,
        ],
    )?;

    Ok(Job {
        id: conn.last_insert_rowid(),
        uuid: job.uuid.clone(),
        job_type: job.job_type,
        status: JobStatus::Pending,
        file: job.file.clone(),
        task: None,
        progress: 0,
        message: job.message.clone(),
        created_at,
        updated_at: created_at,
    })
}

/// Applies a partial update. Returns `None` when no job has this uuid.
pub fn update(
    conn: &Connection,
    uuid: &str,
    changes: &JobUpdate,
) -> Result<Option<Job>, DatabaseError> {
    let Some(current) = find_by_uuid(conn, uuid)? else {
        return Ok(None);
    };

    if current.status.is_terminal() {
        log::warn!(
            "Ignoring update to job {} in terminal status {}",
            uuid,
            current.status
        );
        return Ok(Some(current));
    }

    let mut sets = vec!["updated_at = ?1".to_string()];
    let mut values: Vec<Box<dyn ToSql>> = vec![Box::new(now())];

    if let Some(status) = changes.status {
        if current.status.can_transition_to(status) {
            values.push(Box::new(status));
            sets.push(format!("status = ?{}", values.len()));
        } else {
            log::warn!(
                "Ignoring status regression for job {}: {} -> {}",
                uuid,
                current.status,
                status
            );
        }
    }
    if let Some(ref message) = changes.message {
        values.push(Box::new(message.clone()));
        sets.push(format!("message = ?{}", values.len()));
    }
    if let Some(progress) = changes.progress {
        values.push(Box::new(progress.min(100)));
        sets.push(format!("progress = MAX(progress, ?{})", values.len()));
    }
    if let Some(ref task) = changes.task {
        values.push(Box::new(Value::Object(task.clone())));
        sets.push(format!("task = ?{}", values.len()));
    }

    values.push(Box::new(uuid.to_string()));
    let sql = format!(
        "UPDATE jobs SET {} WHERE uuid = ?{}",
        sets.join(", "),
        values.len()
    );
    let params_ref: Vec<&dyn ToSql> = values.iter().map(|p| p.as_ref()).collect();
    conn.execute(&sql, params_ref.as_slice())?;

    find_by_uuid(conn, uuid)
}

pub fn find_by_uuid(conn: &Connection, uuid: &str) -> Result<Option<Job>, DatabaseError> {
    let job = conn
        .query_row("SELECT * FROM jobs WHERE uuid = ?1", [uuid], Job::from_row)
        .optional()?;
    Ok(job)
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Job>, DatabaseError> {
    let job = conn
        .query_row("SELECT * FROM jobs WHERE id = ?1", [id], Job::from_row)
        .optional()?;
    Ok(job)
}

/// Queries jobs with filters, returning (rows, total_count), newest first.
pub fn query(conn: &Connection, filter: &JobFilter) -> Result<(Vec<Job>, u64), DatabaseError> {
    let mut conditions = Vec::new();
    let mut param_values: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(job_type) = filter.job_type {
        param_values.push(Box::new(job_type));
        conditions.push(format!("type = ?{}", param_values.len()));
    }
    if let Some(status) = filter.status {
        param_values.push(Box::new(status));
        conditions.push(format!("status = ?{}", param_values.len()));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
    let params_ref: Vec<&dyn ToSql> = param_values.iter().map(|p| p.as_ref()).collect();
    let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

    let limit = filter.limit.unwrap_or(100) as i64;
    let offset = filter.offset.unwrap_or(0) as i64;
    param_values.push(Box::new(limit));
    param_values.push(Box::new(offset));
    let query_sql = format!(
        "SELECT * FROM jobs {} ORDER BY created_at DESC, id DESC LIMIT ?{} OFFSET ?{}",
        where_clause,
        param_values.len() - 1,
        param_values.len()
    );

    let params_ref: Vec<&dyn ToSql> = param_values.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&query_sql)?;
    let rows = stmt
        .query_map(params_ref.as_slice(), Job::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok((rows, total))
}

/// The job most recently linked to `document_uuid` whose type matches and
/// whose status is one of `statuses`.
pub fn latest_for_document(
    conn: &Connection,
    document_uuid: &str,
    job_type: JobType,
    statuses: &[JobStatus],
) -> Result<Option<Job>, DatabaseError> {
    if statuses.is_empty() {
        return Ok(None);
    }

    let mut param_values: Vec<Box<dyn ToSql>> =
        vec![Box::new(document_uuid.to_string()), Box::new(job_type)];
    let mut placeholders = Vec::with_capacity(statuses.len());
    for status in statuses {
        param_values.push(Box::new(*status));
        placeholders.push(format!("?{}", param_values.len()));
    }

    let sql = format!(
        "SELECT jobs.* FROM jobs
         JOIN document_jobs ON document_jobs.job_uuid = jobs.uuid
         WHERE document_jobs.document_uuid = ?1 AND jobs.type = ?2 AND jobs.status IN ({})
         ORDER BY jobs.created_at DESC, jobs.id DESC
         LIMIT 1",
        placeholders.join(", ")
    );
    let params_ref: Vec<&dyn ToSql> = param_values.iter().map(|p| p.as_ref()).collect();
    let job = conn
        .query_row(&sql, params_ref.as_slice(), Job::from_row)
        .optional()?;
    Ok(job)
}

/// All jobs that ever acted on a document, oldest first.
pub fn list_for_document(conn: &Connection, document_uuid: &str) -> Result<Vec<Job>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT jobs.* FROM jobs
         JOIN document_jobs ON document_jobs.job_uuid = jobs.uuid
         WHERE document_jobs.document_uuid = ?1
         ORDER BY jobs.created_at, jobs.id",
    )?;
    let rows = stmt
        .query_map([document_uuid], Job::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Jobs that have not reached a terminal status.
pub fn list_unfinished(conn: &Connection) -> Result<Vec<Job>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM jobs WHERE status IN ('pending', 'processing') ORDER BY id",
    )?;
    let rows = stmt
        .query_map([], Job::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
