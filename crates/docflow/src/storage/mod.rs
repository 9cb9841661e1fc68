//! Durable storage for uploaded files.

pub mod filesystem;

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::StorageError;

pub use filesystem::LocalBlobStore;

/// Where uploaded bytes live. Implementations are interchangeable as long
/// as a location returned by `put` can later be read back with `get`.
pub trait BlobStore: Send + Sync {
    /// Stores `bytes` under `key` and returns the resolved location.
    fn put(&self, bytes: &[u8], key: &str) -> Result<String, StorageError>;

    /// Stores a staged file under `key`, consuming it where possible.
    fn put_file(&self, staged: &Path, key: &str) -> Result<String, StorageError> {
        let bytes = std::fs::read(staged).map_err(|e| StorageError::ReadFile {
            path: staged.to_path_buf(),
            source: e,
        })?;
        self.put(&bytes, key)
    }

    fn get(&self, location: &str) -> Result<Vec<u8>, StorageError>;

    fn exists(&self, location: &str) -> bool;

    /// A filesystem path for the location, when the store has one.
    fn local_path(&self, _location: &str) -> Option<PathBuf> {
        None
    }
}

/// Date-partitioned key: `YYYY/MM/DD/<uuid>_<filename>`.
///
/// Only the final component of `filename` is used.
pub fn dated_key(filename: &str) -> String {
    let name = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    format!(
        "{}/{}_{}",
        Utc::now().format("%Y/%m/%d"),
        uuid::Uuid::new_v4(),
        name
    )
}
