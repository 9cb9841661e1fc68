pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod model;
pub mod orchestrator;
pub mod queue;
pub mod sanitize;
pub mod status;
pub mod storage;
pub mod tasks;
pub mod tokens;

pub use config::{load_config, Config};
pub use db::{Database, DatabaseError, Scope};
pub use error::{
    ConfigError, DocflowError, ExecutionError, ExtractError, OrchestratorError, QueueError, Result,
    StatusError, StorageError,
};
pub use extract::{Extractor, ExtractorRegistry, FileInfo, Segment};
pub use model::{
    Document, DocumentChunk, DocumentStatus, DocumentStep, Job, JobStatus, JobType, Payload,
};
pub use orchestrator::{
    validate_upload, Orchestrator, ParseDisposition, ParseReceipt, UploadReceipt,
};
pub use queue::{
    Dispatch, Dispatcher, MemoryQueue, RetryPolicy, TaskContext, TaskExecutor, TaskMessage,
    TaskQueue, TaskResponse, TaskStatus, WorkerQueue,
};
pub use storage::{BlobStore, LocalBlobStore};
pub use tasks::{ParseExecutor, UploadExecutor, PARSE_TASK, UPLOAD_TASK};
pub use tokens::TokenCounter;
