//! Gatekeeper for upload and parse requests.
//!
//! Each request creates its job, document and link rows in one
//! `BEGIN IMMEDIATE` scope, commits, and only then submits the task, so an
//! executor always finds the rows its task id points to. The connection
//! must therefore be in autocommit mode when a request starts.

use std::path::Path;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::UploadConfig;
use crate::db::{document_repo, job_repo, DatabaseError, JobUpdate, NewDocument, NewJob, Scope};
use crate::error::{OrchestratorError, QueueError};
use crate::model::{Document, DocumentStatus, DocumentStep, Job, JobStatus, JobType, Payload};
use crate::queue::{TaskMessage, TaskQueue};
use crate::tasks::{PARSE_TASK, UPLOAD_TASK};

#[derive(Debug, Clone, Serialize)]
pub struct UploadReceipt {
    pub document: Document,
    pub job: Job,
}

/// How a parse request was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseDisposition {
    /// A new job was created and its task submitted.
    Created,
    /// The document was already parsed; `job` is the completed parse job.
    Reused,
    /// A parse job for the document is still pending or running.
    InFlight,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParseReceipt {
    pub document: Document,
    pub job: Job,
    pub disposition: ParseDisposition,
}

pub struct Orchestrator {
    queue: Arc<dyn TaskQueue>,
    bucket: String,
}

impl Orchestrator {
    pub fn new(queue: Arc<dyn TaskQueue>, bucket: impl Into<String>) -> Self {
        Self {
            queue,
            bucket: bucket.into(),
        }
    }

    /// Creates a document and an upload job for `bytes` and submits the
    /// upload task. Policy checks belong to the caller, see
    /// [`validate_upload`].
    pub fn request_upload(
        &self,
        conn: &Connection,
        bytes: &[u8],
        filename: &str,
    ) -> Result<UploadReceipt, OrchestratorError> {
        ensure_autocommit(conn)?;

        let name = filename.to_lowercase();
        let encoded = BASE64.encode(bytes);
        let mut extra_info = Payload::new();
        extra_info.insert(
            "mime_type".into(),
            Value::from(mime_guess::from_path(&name).first_or_octet_stream().to_string()),
        );
        extra_info.insert("size".into(), Value::from(bytes.len()));

        let scope = Scope::begin_immediate(conn)?;
        let job = job_repo::insert(
            &scope,
            &NewJob {
                uuid: Uuid::new_v4().to_string(),
                job_type: JobType::Upload,
                file: Some(name.clone()),
                message: Some(format!("Upload task submitted to queue, document: {}", name)),
            },
        )?;
        let document = document_repo::insert(
            &scope,
            &NewDocument {
                uuid: Uuid::new_v4().to_string(),
                extension: extension_of(&name).unwrap_or_default(),
                name,
                text: encoded.clone(),
                extra_info,
            },
        )?;
        document_repo::link(&scope, &document.uuid, &job.uuid)?;
        scope.commit()?;

        info!(
            job_uuid = %job.uuid,
            document_uuid = %document.uuid,
            size = bytes.len(),
            "Upload requested"
        );

        let message = TaskMessage::new(
            job.uuid.clone(),
            UPLOAD_TASK,
            vec![
                Value::from(self.bucket.clone()),
                Value::from(encoded),
                Value::from(document.name.clone()),
            ],
        );
        self.enqueue(conn, message, &document)?;

        Ok(UploadReceipt { document, job })
    }

    /// Starts, reuses or joins a parse of an existing document according to
    /// its current `(step, status)`.
    pub fn request_parse(
        &self,
        conn: &Connection,
        document_uuid: &str,
    ) -> Result<ParseReceipt, OrchestratorError> {
        ensure_autocommit(conn)?;

        let scope = Scope::begin_immediate(conn)?;
        let mut document = document_repo::find_by_uuid(&scope, document_uuid)?
            .filter(|d| !d.is_deleted)
            .ok_or_else(|| OrchestratorError::NotFound(document_uuid.to_string()))?;

        match document.state() {
            (DocumentStep::Parse, DocumentStatus::Parsed) | (DocumentStep::Generate, _) => {
                let job = job_repo::latest_for_document(
                    &scope,
                    document_uuid,
                    JobType::Parse,
                    &[JobStatus::Completed],
                )?
                .ok_or(OrchestratorError::InvalidState {
                    step: document.step,
                    status: document.status,
                })?;
                scope.commit()?;
                info!(job_uuid = %job.uuid, document_uuid, "Document already parsed");
                return Ok(ParseReceipt {
                    document,
                    job,
                    disposition: ParseDisposition::Reused,
                });
            }
            (DocumentStep::Parse, DocumentStatus::Parsing) => {
                let active = job_repo::latest_for_document(
                    &scope,
                    document_uuid,
                    JobType::Parse,
                    &[JobStatus::Pending, JobStatus::Processing],
                )?;
                if let Some(job) = active {
                    scope.commit()?;
                    info!(job_uuid = %job.uuid, document_uuid, "Parse already in flight");
                    return Ok(ParseReceipt {
                        document,
                        job,
                        disposition: ParseDisposition::InFlight,
                    });
                }
            }
            (DocumentStep::Upload, DocumentStatus::Uploaded)
            | (DocumentStep::Parse, DocumentStatus::Failed) => {}
            (step, status) => return Err(OrchestratorError::InvalidState { step, status }),
        }

        let job = job_repo::insert(
            &scope,
            &NewJob {
                uuid: Uuid::new_v4().to_string(),
                job_type: JobType::Parse,
                file: Some(document.name.clone()),
                message: Some(format!("Parsing document: {}", document_uuid)),
            },
        )?;
        document_repo::set_state(
            &scope,
            document_uuid,
            DocumentStep::Parse,
            DocumentStatus::Parsing,
        )?;
        document_repo::link(&scope, document_uuid, &job.uuid)?;
        scope.commit()?;

        document.step = DocumentStep::Parse;
        document.status = DocumentStatus::Parsing;
        info!(job_uuid = %job.uuid, document_uuid, "Parse requested");

        let message = TaskMessage::new(
            job.uuid.clone(),
            PARSE_TASK,
            vec![Value::from(document.source.clone())],
        );
        self.enqueue(conn, message, &document)?;

        Ok(ParseReceipt {
            document,
            job,
            disposition: ParseDisposition::Created,
        })
    }

    fn enqueue(
        &self,
        conn: &Connection,
        message: TaskMessage,
        document: &Document,
    ) -> Result<(), OrchestratorError> {
        let job_uuid = message.id.clone();
        let Err(source) = self.queue.submit(message) else {
            return Ok(());
        };

        error!(job_uuid = %job_uuid, error = %source, "Failed to enqueue task");
        if let Err(e) = mark_enqueue_failed(conn, &job_uuid, document, &source) {
            error!(job_uuid = %job_uuid, error = %e, "Failed to mark job as failed after enqueue error");
        }
        Err(OrchestratorError::Enqueue { job_uuid, source })
    }
}

fn mark_enqueue_failed(
    conn: &Connection,
    job_uuid: &str,
    document: &Document,
    source: &QueueError,
) -> Result<(), DatabaseError> {
    let mut task = Payload::new();
    task.insert("error".into(), Value::from(source.to_string()));

    let scope = Scope::begin_immediate(conn)?;
    job_repo::update(
        &scope,
        job_uuid,
        &JobUpdate::default()
            .status(JobStatus::Failed)
            .message(format!("Failed to enqueue task: {}", source))
            .task(task),
    )?;
    document_repo::set_state(&scope, &document.uuid, document.step, DocumentStatus::Failed)?;
    scope.commit()
}

fn ensure_autocommit(conn: &Connection) -> Result<(), OrchestratorError> {
    if !conn.is_autocommit() {
        return Err(OrchestratorError::NestedTransaction);
    }
    Ok(())
}

/// Lowercase text after the last `.` of the file name, if any.
pub fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| e.to_lowercase())
}

/// Upload policy: a non-empty payload within the size limit whose file
/// name carries an allowed extension.
pub fn validate_upload(
    policy: &UploadConfig,
    filename: &str,
    bytes: &[u8],
) -> Result<(), OrchestratorError> {
    if bytes.is_empty() {
        return Err(OrchestratorError::Validation(format!(
            "File '{}' is empty",
            filename
        )));
    }

    let Some(extension) = extension_of(filename) else {
        return Err(OrchestratorError::Validation(format!(
            "File '{}' has no extension",
            filename
        )));
    };
    if !policy.allowed_extensions.iter().any(|e| *e == extension) {
        return Err(OrchestratorError::Validation(format!(
            "Unsupported file type: .{}",
            extension
        )));
    }

    if bytes.len() as u64 > policy.max_file_size {
        return Err(OrchestratorError::Validation(format!(
            "File size {} exceeds the limit of {} bytes",
            bytes.len(),
            policy.max_file_size
        )));
    }

    Ok(())
}
