use std::path::PathBuf;
use thiserror::Error;

use crate::db::DatabaseError;
use crate::model::{DocumentStatus, DocumentStep};

#[derive(Error, Debug)]
pub enum DocflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error(transparent)]
    Status(#[from] StatusError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("No extractor registered for extension '{0}'")]
    UnsupportedFormat(String),

    #[error("Failed to read document '{path}': {source}")]
    ReadDocument {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to process PDF: {0}")]
    Pdf(String),

    #[error("Failed to process DOCX: {0}")]
    Docx(String),

    #[error("Failed to process JSON: {0}")]
    Json(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move file from '{from}' to '{to}': {source}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File already exists: {0}")]
    FileExists(PathBuf),

    #[error("Stored file not found: {0}")]
    NotFound(String),
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Task queue is closed")]
    Closed,

    #[error("No executor registered for task '{0}'")]
    UnknownTask(String),

    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),
}

/// Failure of a single task attempt.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Task '{0}' is not linked to any job and document")]
    Unresolved(String),

    #[error("Document {document_uuid} is in ({step}, {status}); task expects ({expected_step}, {expected_status})")]
    StateMismatch {
        document_uuid: String,
        step: DocumentStep,
        status: DocumentStatus,
        expected_step: DocumentStep,
        expected_status: DocumentStatus,
    },

    #[error("Invalid task arguments: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("Soft time limit of {0:?} exceeded")]
    SoftTimeLimit(std::time::Duration),

    #[error("Hard time limit of {0:?} exceeded")]
    HardTimeLimit(std::time::Duration),

    #[error("Attempt was cancelled")]
    Cancelled,

    #[error("Executor panicked: {0}")]
    Panicked(String),

    #[error("Failed to start attempt thread: {0}")]
    Spawn(String),
}

impl ExecutionError {
    /// Whether another attempt could succeed. Resolution and argument
    /// failures never change between attempts.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ExecutionError::Unresolved(_)
                | ExecutionError::StateMismatch { .. }
                | ExecutionError::InvalidArguments(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Document is not in a valid state for parsing (current state: {step}, {status})")]
    InvalidState {
        step: DocumentStep,
        status: DocumentStatus,
    },

    #[error("Orchestrator calls need a connection outside any open transaction")]
    NestedTransaction,

    #[error("Failed to enqueue task for job {job_uuid}: {source}")]
    Enqueue {
        job_uuid: String,
        #[source]
        source: QueueError,
    },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

#[derive(Error, Debug)]
pub enum StatusError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

pub type Result<T> = std::result::Result<T, DocflowError>;
