//! Executors for the `document.upload` and `document.parse` tasks.
//!
//! An executor finds its job and document through the link table using the
//! task id, reports progress in short scopes of their own, and writes the
//! final job, document and chunk state in one scope. Every executor can run
//! on a connection it opens itself or on one owned by the caller; in the
//! latter case its scopes are savepoints and the caller decides when the
//! work is committed.

pub mod parse;
pub mod recovery;
pub mod upload;

use rusqlite::Connection;
use serde_json::Value;
use tracing::{error, warn};

use crate::db::{document_repo, job_repo, Database, JobUpdate, Scope};
use crate::error::ExecutionError;
use crate::model::{Document, DocumentStatus, DocumentStep, Job, JobStatus, JobType, Payload};
use crate::queue::{TaskContext, TaskResponse, TaskStatus};

pub use parse::ParseExecutor;
pub use recovery::fail_interrupted;
pub use upload::UploadExecutor;

pub const UPLOAD_TASK: &str = "document.upload";
pub const PARSE_TASK: &str = "document.parse";

/// Task name that runs jobs of `job_type`.
pub fn task_name_for(job_type: JobType) -> &'static str {
    match job_type {
        JobType::Upload => UPLOAD_TASK,
        JobType::Parse => PARSE_TASK,
        JobType::Delete => "document.delete",
        JobType::Other => "other",
    }
}

/// The job and document a task acts on.
pub(crate) struct Resolved {
    pub job: Job,
    pub document: Document,
}

pub(crate) fn resolve(conn: &Connection, ctx: &TaskContext) -> Result<Resolved, ExecutionError> {
    let job = job_repo::find_by_uuid(conn, &ctx.task_id)?
        .ok_or_else(|| ExecutionError::Unresolved(ctx.task_id.clone()))?;
    let document = document_repo::find_by_job(conn, &ctx.task_id)?
        .ok_or_else(|| ExecutionError::Unresolved(ctx.task_id.clone()))?;
    Ok(Resolved { job, document })
}

/// The envelope of a job that already finished, so a redelivered task can
/// answer without repeating its side effects.
pub(crate) fn finished_response(ctx: &TaskContext, job: &Job) -> Option<TaskResponse> {
    if !job.status.is_terminal() {
        return None;
    }

    warn!(job_uuid = %job.uuid, status = %job.status, "Task redelivered for a finished job");
    let stored = job.task.as_ref().and_then(TaskResponse::from_payload);
    Some(stored.unwrap_or_else(|| TaskResponse {
        status: if job.status == JobStatus::Completed {
            TaskStatus::Success
        } else {
            TaskStatus::Error
        },
        task_id: job.uuid.clone(),
        task_name: ctx.task_name.clone(),
        task_retry: ctx.attempt,
        task_info: Payload::new(),
        message: job.message.clone().unwrap_or_default(),
    }))
}

pub(crate) fn expect_state(
    document: &Document,
    step: DocumentStep,
    status: DocumentStatus,
) -> Result<(), ExecutionError> {
    if document.state() != (step, status) {
        return Err(ExecutionError::StateMismatch {
            document_uuid: document.uuid.clone(),
            step: document.step,
            status: document.status,
            expected_step: step,
            expected_status: status,
        });
    }
    Ok(())
}

/// Reports progress in its own scope so pollers see it before the attempt
/// finishes.
pub(crate) fn checkpoint(
    conn: &Connection,
    ctx: &TaskContext,
    progress: u8,
    message: &str,
) -> Result<(), ExecutionError> {
    ctx.checkpoint()?;
    let scope = Scope::begin_immediate(conn)?;
    job_repo::update(
        &scope,
        &ctx.task_id,
        &JobUpdate::default()
            .status(JobStatus::Processing)
            .progress(progress)
            .message(message),
    )?;
    scope.commit()?;
    Ok(())
}

/// Opens the scope that writes an attempt's outcome. The write lock is
/// held from the start, and the job and document are read again under it:
/// an attempt that was abandoned, whose job was finished elsewhere, or
/// whose document moved on fails here instead of committing.
pub(crate) fn begin_final<'c>(
    conn: &'c Connection,
    ctx: &TaskContext,
    document_uuid: &str,
    step: DocumentStep,
    status: DocumentStatus,
) -> Result<Scope<'c>, ExecutionError> {
    ctx.ensure_live()?;
    let scope = Scope::begin_immediate(conn)?;

    let job = job_repo::find_by_uuid(&scope, &ctx.task_id)?
        .ok_or_else(|| ExecutionError::Unresolved(ctx.task_id.clone()))?;
    if job.status.is_terminal() {
        warn!(job_uuid = %job.uuid, status = %job.status, "Job finished while the attempt ran");
        return Err(ExecutionError::Cancelled);
    }
    let document = document_repo::find_by_uuid(&scope, document_uuid)?
        .ok_or_else(|| ExecutionError::Unresolved(ctx.task_id.clone()))?;
    expect_state(&document, step, status)?;

    ctx.ensure_live()?;
    Ok(scope)
}

pub(crate) fn str_arg<'a>(
    args: &'a [Value],
    index: usize,
    name: &str,
) -> Result<&'a str, ExecutionError> {
    args.get(index).and_then(Value::as_str).ok_or_else(|| {
        ExecutionError::InvalidArguments(format!("missing string argument '{}'", name))
    })
}

/// Marks the job FAILED with an error envelope and, unless the task could
/// not be tied to its document, moves the document to FAILED in its
/// current step. Returns the envelope even if it could not be stored.
pub(crate) fn record_failure(
    db: &Database,
    ctx: &TaskContext,
    error: &ExecutionError,
    message: String,
) -> TaskResponse {
    let mut info = Payload::new();
    info.insert("error".into(), Value::from(error.to_string()));
    info.insert("attempts".into(), Value::from(ctx.attempt + 1));
    let response = TaskResponse::error(ctx, info, message);

    let written = db
        .connect()
        .map_err(ExecutionError::from)
        .and_then(|conn| write_failure(&conn, ctx, error, &response));
    if let Err(e) = written {
        error!(job_uuid = %ctx.task_id, error = %e, "Failed to record task failure");
    }

    response
}

pub(crate) fn write_failure(
    conn: &Connection,
    ctx: &TaskContext,
    error: &ExecutionError,
    response: &TaskResponse,
) -> Result<(), ExecutionError> {
    let scope = Scope::begin_immediate(conn)?;

    let Some(job) = job_repo::find_by_uuid(&scope, &ctx.task_id)? else {
        warn!(job_uuid = %ctx.task_id, "No job to mark as failed");
        return Ok(());
    };
    if job.status.is_terminal() {
        // An abandoned attempt may have finished on its own.
        return Ok(());
    }

    job_repo::update(
        &scope,
        &ctx.task_id,
        &JobUpdate::default()
            .status(JobStatus::Failed)
            .message(response.message.clone())
            .task(response.to_payload()),
    )?;

    let owns_document = !matches!(
        error,
        ExecutionError::Unresolved(_) | ExecutionError::StateMismatch { .. }
    );
    if owns_document {
        if let Some(document) = document_repo::find_by_job(&scope, &ctx.task_id)? {
            document_repo::set_state(&scope, &document.uuid, document.step, DocumentStatus::Failed)?;
        }
    }

    scope.commit()?;
    Ok(())
}
