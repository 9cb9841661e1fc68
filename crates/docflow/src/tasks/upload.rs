use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rusqlite::Connection;
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::db::{document_repo, job_repo, Database, JobUpdate};
use crate::error::{ExecutionError, StorageError};
use crate::model::{DocumentStatus, DocumentStep, JobStatus, Payload};
use crate::queue::{TaskContext, TaskExecutor, TaskResponse};
use crate::sanitize::redact_location;
use crate::storage::{dated_key, BlobStore};
use crate::tasks::{
    begin_final, checkpoint, expect_state, finished_response, record_failure, resolve, str_arg,
    UPLOAD_TASK,
};

/// Moves uploaded bytes into the blob store.
///
/// Arguments: `[bucket_name, base64(file_bytes), filename]`.
pub struct UploadExecutor {
    db: Database,
    blob: Arc<dyn BlobStore>,
    temp_dir: Option<PathBuf>,
}

impl UploadExecutor {
    pub fn new(db: Database, blob: Arc<dyn BlobStore>) -> Self {
        Self {
            db,
            blob,
            temp_dir: None,
        }
    }

    /// Stages uploads under `dir` instead of the system temp directory.
    pub fn with_temp_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.temp_dir = dir;
        self
    }

    /// Runs one attempt on `conn`. When `conn` is already inside a
    /// transaction, nothing is durable until the caller commits it.
    pub fn run_on(
        &self,
        conn: &Connection,
        ctx: &TaskContext,
        args: &[Value],
    ) -> Result<TaskResponse, ExecutionError> {
        let bucket = str_arg(args, 0, "bucket_name")?;
        let encoded = str_arg(args, 1, "file_bytes")?;
        let filename = str_arg(args, 2, "filename")?;

        let resolved = resolve(conn, ctx)?;
        if let Some(response) = finished_response(ctx, &resolved.job) {
            return Ok(response);
        }
        let document = resolved.document;
        expect_state(&document, DocumentStep::Upload, DocumentStatus::Uploading)?;

        checkpoint(conn, ctx, 0, "Uploading document")?;

        let bytes = BASE64.decode(encoded).map_err(|e| {
            ExecutionError::InvalidArguments(format!("file_bytes is not base64: {}", e))
        })?;
        let staged = self.stage(&bytes)?;
        debug!(
            document_uuid = %document.uuid,
            size = bytes.len(),
            "Staged upload"
        );

        checkpoint(conn, ctx, 50, "Document staged")?;

        let location = self.blob.put_file(staged.path(), &dated_key(filename))?;

        let mut task_info = Payload::new();
        task_info.insert("document_uuid".into(), Value::from(document.uuid.clone()));
        task_info.insert("bucket_name".into(), Value::from(bucket));
        task_info.insert("file_source".into(), Value::from(location.clone()));
        task_info.insert("file_name".into(), Value::from(filename));
        let response = TaskResponse::success(ctx, task_info, "Document uploaded successfully");

        let scope = begin_final(
            conn,
            ctx,
            &document.uuid,
            DocumentStep::Upload,
            DocumentStatus::Uploading,
        )?;
        document_repo::mark_uploaded(&scope, &document.uuid, &location)?;
        job_repo::update(
            &scope,
            &ctx.task_id,
            &JobUpdate::default()
                .status(JobStatus::Completed)
                .progress(100)
                .message(response.message.clone())
                .task(response.to_payload()),
        )?;
        scope.commit()?;

        info!(
            document_uuid = %document.uuid,
            location = %redact_location(&location),
            "Document uploaded"
        );
        Ok(response)
    }

    fn stage(&self, bytes: &[u8]) -> Result<NamedTempFile, StorageError> {
        let dir = self.temp_dir.clone().unwrap_or_else(std::env::temp_dir);
        std::fs::create_dir_all(&dir).map_err(|e| StorageError::CreateDirectory {
            path: dir.clone(),
            source: e,
        })?;

        let mut staged = tempfile::Builder::new()
            .prefix("docflow-upload-")
            .tempfile_in(&dir)
            .map_err(|e| StorageError::WriteFile {
                path: dir.clone(),
                source: e,
            })?;
        staged
            .write_all(bytes)
            .and_then(|_| staged.flush())
            .map_err(|e| StorageError::WriteFile {
                path: staged.path().to_path_buf(),
                source: e,
            })?;
        Ok(staged)
    }
}

impl TaskExecutor for UploadExecutor {
    fn name(&self) -> &'static str {
        UPLOAD_TASK
    }

    fn execute(&self, ctx: &TaskContext, args: &[Value]) -> Result<TaskResponse, ExecutionError> {
        let conn = self.db.connect()?;
        self.run_on(&conn, ctx, args)
    }

    fn fail(&self, ctx: &TaskContext, _args: &[Value], error: &ExecutionError) -> TaskResponse {
        record_failure(&self.db, ctx, error, "Document upload failed".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::temp_db;
    use crate::db::{NewDocument, NewJob};
    use crate::model::JobType;
    use crate::queue::{RetryPolicy, TaskMessage};
    use crate::storage::LocalBlobStore;

    fn seed(conn: &Connection) {
        job_repo::insert(
            conn,
            &NewJob {
                uuid: "j1".into(),
                job_type: JobType::Upload,
                file: Some("a.txt".into()),
                message: None,
            },
        )
        .unwrap();
        document_repo::insert(
            conn,
            &NewDocument {
                uuid: "d1".into(),
                name: "a.txt".into(),
                extension: "txt".into(),
                text: BASE64.encode(b"hello"),
                extra_info: Payload::new(),
            },
        )
        .unwrap();
        document_repo::link(conn, "d1", "j1").unwrap();
    }

    fn args(encoded: &str) -> Vec<Value> {
        vec![
            Value::from("bucket"),
            Value::from(encoded),
            Value::from("a.txt"),
        ]
    }

    fn ctx() -> TaskContext {
        TaskContext::new(&TaskMessage::new("j1", UPLOAD_TASK, vec![]), &RetryPolicy::default())
    }

    #[test]
    fn test_upload_stores_file_and_completes_job() {
        let (dir, db) = temp_db();
        let blob = Arc::new(LocalBlobStore::new(dir.path().join("blobs")));
        let executor =
            UploadExecutor::new(db.clone(), blob).with_temp_dir(Some(dir.path().join("tmp")));
        let conn = db.connect().unwrap();
        seed(&conn);

        let response = executor
            .run_on(&conn, &ctx(), &args(&BASE64.encode(b"hello")))
            .unwrap();
        let source = response.task_info["file_source"].as_str().unwrap().to_string();
        assert_eq!(std::fs::read(&source).unwrap(), b"hello");
        assert!(source.ends_with("_a.txt"));

        let doc = document_repo::find_by_uuid(&conn, "d1").unwrap().unwrap();
        assert_eq!(doc.state(), (DocumentStep::Upload, DocumentStatus::Uploaded));
        assert_eq!(doc.source, source);

        let job = job_repo::find_by_uuid(&conn, "j1").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.task.unwrap()["task_info"]["bucket_name"], "bucket");
    }

    #[test]
    fn test_bad_base64_is_not_retryable() {
        let (dir, db) = temp_db();
        let blob = Arc::new(LocalBlobStore::new(dir.path().join("blobs")));
        let executor = UploadExecutor::new(db.clone(), blob);
        let conn = db.connect().unwrap();
        seed(&conn);

        let err = executor.run_on(&conn, &ctx(), &args("%%%")).unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidArguments(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_missing_arguments() {
        let (dir, db) = temp_db();
        let executor = UploadExecutor::new(db, Arc::new(LocalBlobStore::new(dir.path())));
        let err = executor.execute(&ctx(), &[]).unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidArguments(_)));
    }
}
