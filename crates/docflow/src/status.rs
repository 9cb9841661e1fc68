//! Read-only lookups for callers polling background work.

use rusqlite::Connection;

use crate::db::{chunk_repo, document_repo, job_repo, JobFilter};
use crate::error::StatusError;
use crate::model::{Document, DocumentChunk, Job, JobType};

pub fn job(conn: &Connection, uuid: &str) -> Result<Job, StatusError> {
    job_repo::find_by_uuid(conn, uuid)?.ok_or_else(|| StatusError::JobNotFound(uuid.to_string()))
}

pub fn job_by_id(conn: &Connection, id: i64) -> Result<Job, StatusError> {
    job_repo::find_by_id(conn, id)?.ok_or_else(|| StatusError::JobNotFound(id.to_string()))
}

/// Soft-deleted documents are reported as missing.
pub fn document(conn: &Connection, uuid: &str) -> Result<Document, StatusError> {
    document_repo::find_by_uuid(conn, uuid)?
        .filter(|d| !d.is_deleted)
        .ok_or_else(|| StatusError::DocumentNotFound(uuid.to_string()))
}

/// Jobs of one type, newest first, with the total number of matches.
pub fn jobs_by_type(
    conn: &Connection,
    job_type: JobType,
    limit: Option<u64>,
    offset: Option<u64>,
) -> Result<(Vec<Job>, u64), StatusError> {
    let filter = JobFilter {
        job_type: Some(job_type),
        limit,
        offset,
        ..Default::default()
    };
    Ok(job_repo::query(conn, &filter)?)
}

pub fn chunks(conn: &Connection, document_uuid: &str) -> Result<Vec<DocumentChunk>, StatusError> {
    document(conn, document_uuid)?;
    Ok(chunk_repo::list_for_document(conn, document_uuid)?)
}

/// Every job that acted on the document, oldest first.
pub fn document_jobs(conn: &Connection, document_uuid: &str) -> Result<Vec<Job>, StatusError> {
    document(conn, document_uuid)?;
    Ok(job_repo::list_for_document(conn, document_uuid)?)
}
