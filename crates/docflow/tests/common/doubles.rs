//! Collaborators that count calls or fail on demand.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use docflow::db::{document_repo, job_repo};
use docflow::extract::text::PlainTextExtractor;
use docflow::{
    BlobStore, Database, ExtractError, Extractor, FileInfo, LocalBlobStore, QueueError, Segment,
    StorageError, TaskMessage, TaskQueue,
};

/// Plain text extractor that counts calls and fails while `failing` is set.
pub struct SwitchableExtractor {
    pub calls: AtomicU32,
    pub failing: AtomicBool,
}

impl SwitchableExtractor {
    pub fn new(failing: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            failing: AtomicBool::new(failing),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Extractor for SwitchableExtractor {
    fn extensions(&self) -> &'static [&'static str] {
        &["txt"]
    }

    fn convert(&self, file: &FileInfo) -> Result<Vec<Segment>, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ExtractError::ReadDocument {
                path: file.path.clone(),
                source: std::io::Error::other("extraction service unavailable"),
            });
        }
        PlainTextExtractor.convert(file)
    }
}

/// Plain text extractor that sleeps before answering.
pub struct SlowExtractor {
    delay: Duration,
    pub started: AtomicU32,
    pub finished: AtomicU32,
}

impl SlowExtractor {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            started: AtomicU32::new(0),
            finished: AtomicU32::new(0),
        })
    }

    /// Waits until every started extraction has returned.
    pub fn wait_settled(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.finished.load(Ordering::SeqCst) == self.started.load(Ordering::SeqCst) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }
}

impl Extractor for SlowExtractor {
    fn extensions(&self) -> &'static [&'static str] {
        &["txt"]
    }

    fn convert(&self, file: &FileInfo) -> Result<Vec<Segment>, ExtractError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        let segments = PlainTextExtractor.convert(file);
        self.finished.fetch_add(1, Ordering::SeqCst);
        segments
    }
}

/// Fails the first `failures` staged-file writes, then delegates.
pub struct FlakyBlobStore {
    inner: LocalBlobStore,
    remaining_failures: AtomicU32,
}

impl FlakyBlobStore {
    pub fn new(inner: LocalBlobStore, failures: u32) -> Self {
        Self {
            inner,
            remaining_failures: AtomicU32::new(failures),
        }
    }
}

impl BlobStore for FlakyBlobStore {
    fn put(&self, bytes: &[u8], key: &str) -> Result<String, StorageError> {
        self.inner.put(bytes, key)
    }

    fn put_file(&self, staged: &Path, key: &str) -> Result<String, StorageError> {
        let failed = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StorageError::WriteFile {
                path: PathBuf::from(key),
                source: std::io::Error::other("disk hiccup"),
            });
        }
        self.inner.put_file(staged, key)
    }

    fn get(&self, location: &str) -> Result<Vec<u8>, StorageError> {
        self.inner.get(location)
    }

    fn exists(&self, location: &str) -> bool {
        self.inner.exists(location)
    }

    fn local_path(&self, location: &str) -> Option<PathBuf> {
        self.inner.local_path(location)
    }
}

/// Rejects every submission.
pub struct RejectingQueue;

impl TaskQueue for RejectingQueue {
    fn submit(&self, message: TaskMessage) -> Result<(), QueueError> {
        Err(QueueError::UnknownTask(message.name))
    }
}

/// Records, for every submission, whether another connection can already
/// see the job and its linked document.
pub struct VisibilityRecordingQueue {
    db: Database,
    pub observed: Mutex<Vec<(String, bool)>>,
}

impl VisibilityRecordingQueue {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            observed: Mutex::new(Vec::new()),
        }
    }
}

impl TaskQueue for VisibilityRecordingQueue {
    fn submit(&self, message: TaskMessage) -> Result<(), QueueError> {
        let conn = self.db.connect().map_err(|e| QueueError::SpawnFailed(e.to_string()))?;
        let visible = job_repo::find_by_uuid(&conn, &message.id)
            .map(|j| j.is_some())
            .unwrap_or(false)
            && document_repo::find_by_job(&conn, &message.id)
                .map(|d| d.is_some())
                .unwrap_or(false);
        self.observed.lock().unwrap().push((message.id, visible));
        Ok(())
    }
}
