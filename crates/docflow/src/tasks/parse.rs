use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::Connection;
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::{chunk_repo, document_repo, job_repo, Database, JobUpdate, NewChunk};
use crate::error::{ExecutionError, StorageError};
use crate::extract::{ExtractorRegistry, FileInfo};
use crate::model::{DocumentStatus, DocumentStep, JobStatus, Payload};
use crate::queue::{TaskContext, TaskExecutor, TaskResponse};
use crate::sanitize::{clean_text, redact_location};
use crate::storage::BlobStore;
use crate::tasks::{
    begin_final, checkpoint, expect_state, finished_response, record_failure, resolve, str_arg,
    PARSE_TASK,
};
use crate::tokens::TokenCounter;

/// Extracts a stored document into chunks.
///
/// Arguments: `[source]`, the location recorded by the upload.
pub struct ParseExecutor {
    db: Database,
    blob: Arc<dyn BlobStore>,
    registry: Arc<ExtractorRegistry>,
    tokens: Arc<TokenCounter>,
    temp_dir: Option<PathBuf>,
}

/// A readable path for a stored blob, kept alive for the extraction.
enum Materialized {
    Local(PathBuf),
    Temp(NamedTempFile),
}

impl Materialized {
    fn path(&self) -> &Path {
        match self {
            Materialized::Local(path) => path,
            Materialized::Temp(file) => file.path(),
        }
    }
}

impl ParseExecutor {
    pub fn new(
        db: Database,
        blob: Arc<dyn BlobStore>,
        registry: Arc<ExtractorRegistry>,
        tokens: Arc<TokenCounter>,
    ) -> Self {
        Self {
            db,
            blob,
            registry,
            tokens,
            temp_dir: None,
        }
    }

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
        let source = str_arg(args, 0, "source")?;

        let resolved = resolve(conn, ctx)?;
        if let Some(response) = finished_response(ctx, &resolved.job) {
            return Ok(response);
        }
        let document = resolved.document;
        expect_state(&document, DocumentStep::Parse, DocumentStatus::Parsing)?;

        checkpoint(conn, ctx, 10, "Processing document")?;

        if !self.blob.exists(source) {
            return Err(StorageError::NotFound(source.to_string()).into());
        }
        let file = self.materialize(source, &document.extension)?;

        checkpoint(conn, ctx, 30, "Extracting content from document")?;

        let info = FileInfo::with_extension(file.path(), &document.name, &document.extension);
        let segments = self.registry.extract(&info)?;
        debug!(
            document_uuid = %document.uuid,
            segments = segments.len(),
            "Extracted document"
        );

        checkpoint(conn, ctx, 70, "Storing extracted chunks")?;

        // One chunk per segment, even when cleaning leaves no text.
        let chunks: Vec<NewChunk> = segments
            .into_iter()
            .map(|segment| NewChunk {
                uuid: Uuid::new_v4().to_string(),
                token_count: clamp_count(self.tokens.count(&segment.text)),
                text: clean_text(&segment.text),
                extra_info: segment.metadata,
            })
            .collect();

        let total_tokens: u64 = chunks.iter().map(|c| u64::from(c.token_count)).sum();
        let summaries: Vec<Value> = chunks
            .iter()
            .enumerate()
            .map(|(index, chunk)| {
                serde_json::json!({
                    "uuid": chunk.uuid,
                    "chunk_index": index,
                    "token_count": chunk.token_count,
                })
            })
            .collect();

        let mut task_info = Payload::new();
        task_info.insert("document_uuid".into(), Value::from(document.uuid.clone()));
        task_info.insert("file_path".into(), Value::from(source));
        task_info.insert("chunk_count".into(), Value::from(chunks.len()));
        task_info.insert("total_tokens".into(), Value::from(total_tokens));
        task_info.insert("chunks".into(), Value::Array(summaries));
        let response = TaskResponse::success(ctx, task_info, "Document parsed successfully");

        let scope = begin_final(
            conn,
            ctx,
            &document.uuid,
            DocumentStep::Parse,
            DocumentStatus::Parsing,
        )?;
        let replaced = chunk_repo::delete_for_document(&scope, &document.uuid)?;
        chunk_repo::insert_all(&scope, &document.uuid, &chunks)?;
        document_repo::set_state(
            &scope,
            &document.uuid,
            DocumentStep::Parse,
            DocumentStatus::Parsed,
        )?;
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
            chunks = chunks.len(),
            replaced,
            total_tokens,
            "Document parsed"
        );
        Ok(response)
    }

    fn materialize(&self, source: &str, extension: &str) -> Result<Materialized, StorageError> {
        if let Some(path) = self.blob.local_path(source).filter(|p| p.is_file()) {
            return Ok(Materialized::Local(path));
        }

        let bytes = self.blob.get(source)?;
        let dir = self.temp_dir.clone().unwrap_or_else(std::env::temp_dir);
        let suffix = format!(".{}", extension);
        let mut file = tempfile::Builder::new()
            .prefix("docflow-parse-")
            .suffix(&suffix)
            .tempfile_in(&dir)
            .map_err(|e| StorageError::WriteFile {
                path: dir.clone(),
                source: e,
            })?;
        file.write_all(&bytes)
            .and_then(|_| file.flush())
            .map_err(|e| StorageError::WriteFile {
                path: file.path().to_path_buf(),
                source: e,
            })?;

        debug!(location = %redact_location(source), "Materialized blob for extraction");
        Ok(Materialized::Temp(file))
    }
}

/// Token counts are stored as `u32`; larger counts saturate.
fn clamp_count(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}

impl TaskExecutor for ParseExecutor {
    fn name(&self) -> &'static str {
        PARSE_TASK
    }

    fn execute(&self, ctx: &TaskContext, args: &[Value]) -> Result<TaskResponse, ExecutionError> {
        let conn = self.db.connect()?;
        self.run_on(&conn, ctx, args)
    }

    fn fail(&self, ctx: &TaskContext, args: &[Value], error: &ExecutionError) -> TaskResponse {
        let location = args.first().and_then(Value::as_str).unwrap_or_default();
        let message = format!(
            "Error processing document: {}, with max retries {}",
            location, ctx.max_retries
        );
        record_failure(&self.db, ctx, error, message)
    }
}
