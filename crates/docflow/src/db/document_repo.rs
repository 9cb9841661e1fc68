//! Document repository: `documents` and the `document_jobs` link table.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;

use super::{now, object_or_empty, DatabaseError};
use crate::model::{is_reachable_state, Document, DocumentStatus, DocumentStep, Payload};

impl Document {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let extra_info: Option<Value> = row.get("extra_info")?;
        Ok(Self {
            id: row.get("id")?,
            uuid: row.get("uuid")?,
            name: row.get("name")?,
            source: row.get("source")?,
            extension: row.get("extension")?,
            text: row.get("text")?,
            step: row.get("step")?,
            status: row.get("status")?,
            extra_info: object_or_empty(extra_info),
            is_deleted: row.get("is_deleted")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Fields of a document at creation time. New documents always start
/// in `(upload, uploading)` with an empty source.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub uuid: String,
    pub name: String,
    pub extension: String,
    pub text: String,
    pub extra_info: Payload,
}

pub fn insert(conn: &Connection, doc: &NewDocument) -> Result<Document, DatabaseError> {
    let created_at = now();
    conn.execute(
        "INSERT INTO documents (uuid, name, source, extension, text, step, status, extra_info,
         is_deleted, created_at, updated_at)
         VALUES (?1, ?2, '', ?3, ?4, ?5, ?6, ?7, 0, ?8, ?8)",
        params![
            doc.uuid,
            doc.name,
            doc.extension,
            doc.text,
            DocumentStep::Upload,
            DocumentStatus::Uploading,
            Value::Object(doc.extra_info.clone()),
            created_at,
        ],
    )?;

    Ok(Document {
        id: conn.last_insert_rowid(),
        uuid: doc.uuid.clone(),
        name: doc.name.clone(),
        source: String::new(),
        extension: doc.extension.clone(),
        text: doc.text.clone(),
        step: DocumentStep::Upload,
        status: DocumentStatus::Uploading,
        extra_info: doc.extra_info.clone(),
        is_deleted: false,
        created_at,
        updated_at: created_at,
    })
}

pub fn find_by_uuid(conn: &Connection, uuid: &str) -> Result<Option<Document>, DatabaseError> {
    let doc = conn
        .query_row(
            "SELECT * FROM documents WHERE uuid = ?1",
            [uuid],
            Document::from_row,
        )
        .optional()?;
    Ok(doc)
}

/// Resolves the document a job acts on through the link table.
pub fn find_by_job(conn: &Connection, job_uuid: &str) -> Result<Option<Document>, DatabaseError> {
    let doc = conn
        .query_row(
            "SELECT documents.* FROM documents
             JOIN document_jobs ON document_jobs.document_uuid = documents.uuid
             WHERE document_jobs.job_uuid = ?1
             ORDER BY document_jobs.id DESC
             LIMIT 1",
            [job_uuid],
            Document::from_row,
        )
        .optional()?;
    Ok(doc)
}

/// Moves a document to `(step, status)`. Returns false if no row matched.
pub fn set_state(
    conn: &Connection,
    uuid: &str,
    step: DocumentStep,
    status: DocumentStatus,
) -> Result<bool, DatabaseError> {
    debug_assert!(is_reachable_state(step, status));
    let changed = conn.execute(
        "UPDATE documents SET step = ?2, status = ?3, updated_at = ?4 WHERE uuid = ?1",
        params![uuid, step, status, now()],
    )?;
    Ok(changed > 0)
}

/// Records the stored location and marks the upload complete.
pub fn mark_uploaded(conn: &Connection, uuid: &str, source: &str) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE documents SET source = ?2, step = ?3, status = ?4, updated_at = ?5 WHERE uuid = ?1",
        params![
            uuid,
            source,
            DocumentStep::Upload,
            DocumentStatus::Uploaded,
            now()
        ],
    )?;
    Ok(changed > 0)
}

/// Appends a (document, job) pairing.
pub fn link(conn: &Connection, document_uuid: &str, job_uuid: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO document_jobs (job_uuid, document_uuid) VALUES (?1, ?2)",
        params![job_uuid, document_uuid],
    )?;
    Ok(())
}

/// Number of link rows for a job. Used to check the one-link invariant.
pub fn count_links_for_job(conn: &Connection, job_uuid: &str) -> Result<u64, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM document_jobs WHERE job_uuid = ?1",
        [job_uuid],
        |r| r.get(0),
    )?;
    Ok(count)
}
