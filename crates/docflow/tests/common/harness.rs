//! Test harness for isolated pipeline runs.
//!
//! The `TestHarness` wires the real orchestrator, executors and dispatcher
//! to a temp database, a temp blob root and a `MemoryQueue`. Queued tasks run
//! only when a test calls `drain`, and retries are re-queued without any
//! backoff sleep, so every scenario is deterministic.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;
use tempfile::TempDir;

use docflow::db::{chunk_repo, document_repo, job_repo};
use docflow::orchestrator::{Orchestrator, ParseReceipt, UploadReceipt};
use docflow::{
    BlobStore, Database, Dispatch, Dispatcher, Document, DocumentChunk, ExtractorRegistry, Job,
    LocalBlobStore, MemoryQueue, ParseExecutor, RetryPolicy, TokenCounter, UploadExecutor,
};

pub struct TestHarness {
    temp_dir: TempDir,
    pub db: Database,
    pub blob: Arc<dyn BlobStore>,
    pub queue: Arc<MemoryQueue>,
    pub dispatcher: Dispatcher,
    pub orchestrator: Orchestrator,
}

impl TestHarness {
    /// Default extractors and a local blob store.
    pub fn new() -> Self {
        Self::with_registry(ExtractorRegistry::with_defaults())
    }

    pub fn with_registry(registry: ExtractorRegistry) -> Self {
        Self::with_policy(registry, Self::policy())
    }

    pub fn with_policy(registry: ExtractorRegistry, policy: RetryPolicy) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let blob = Arc::new(LocalBlobStore::new(temp_dir.path().join("blobs")));
        Self::build(temp_dir, blob, registry, policy)
    }

    /// Wraps the harness blob store, e.g. to inject failures.
    pub fn with_blob<F>(wrap: F) -> Self
    where
        F: FnOnce(LocalBlobStore) -> Arc<dyn BlobStore>,
    {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let blob = wrap(LocalBlobStore::new(temp_dir.path().join("blobs")));
        Self::build(temp_dir, blob, ExtractorRegistry::with_defaults(), Self::policy())
    }

    fn build(
        temp_dir: TempDir,
        blob: Arc<dyn BlobStore>,
        registry: ExtractorRegistry,
        policy: RetryPolicy,
    ) -> Self {
        let db = Database::open(&temp_dir.path().join("docflow.db")).expect("Failed to open db");
        let staging = Some(temp_dir.path().join("staging"));

        let mut dispatcher = Dispatcher::new(policy);
        dispatcher.register(Arc::new(
            UploadExecutor::new(db.clone(), Arc::clone(&blob)).with_temp_dir(staging.clone()),
        ));
        dispatcher.register(Arc::new(
            ParseExecutor::new(
                db.clone(),
                Arc::clone(&blob),
                Arc::new(registry),
                Arc::new(TokenCounter::characters()),
            )
            .with_temp_dir(staging),
        ));

        let queue = Arc::new(MemoryQueue::new());
        let orchestrator = Orchestrator::new(queue.clone(), "test-bucket");

        Self {
            temp_dir,
            db,
            blob,
            queue,
            dispatcher,
            orchestrator,
        }
    }

    /// Production retry cap with a millisecond backoff unit and no time
    /// limits.
    pub fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            backoff_unit: Duration::from_millis(1),
            soft_time_limit: None,
            hard_time_limit: None,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn blob_root(&self) -> PathBuf {
        self.temp_dir.path().join("blobs")
    }

    pub fn conn(&self) -> Connection {
        self.db.connect().expect("Failed to connect")
    }

    /// Runs queued tasks, including retries, until the queue is empty.
    pub fn drain(&self) -> Vec<Dispatch> {
        self.queue.drain_with(&self.dispatcher)
    }

    pub fn upload(&self, filename: &str, bytes: &[u8]) -> UploadReceipt {
        self.orchestrator
            .request_upload(&self.conn(), bytes, filename)
            .expect("Upload request failed")
    }

    /// Uploads and runs the upload task. Returns the document afterwards.
    pub fn uploaded(&self, filename: &str, bytes: &[u8]) -> Document {
        let receipt = self.upload(filename, bytes);
        self.drain();
        self.document(&receipt.document.uuid)
    }

    pub fn parse(&self, document_uuid: &str) -> ParseReceipt {
        self.orchestrator
            .request_parse(&self.conn(), document_uuid)
            .expect("Parse request failed")
    }

    pub fn job(&self, uuid: &str) -> Job {
        job_repo::find_by_uuid(&self.conn(), uuid)
            .expect("Job query failed")
            .expect("Job not found")
    }

    pub fn document(&self, uuid: &str) -> Document {
        document_repo::find_by_uuid(&self.conn(), uuid)
            .expect("Document query failed")
            .expect("Document not found")
    }

    pub fn chunks(&self, document_uuid: &str) -> Vec<DocumentChunk> {
        chunk_repo::list_for_document(&self.conn(), document_uuid).expect("Chunk query failed")
    }

    pub fn count(&self, table: &str) -> u64 {
        self.conn()
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
            .expect("Count failed")
    }
}
