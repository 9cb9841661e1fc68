//! Database module for persistent storage.
//!
//! Uses rusqlite (SQLite). `Database` is a cheap, cloneable handle that
//! opens one connection per unit of work; every orchestrator call and
//! executor attempt runs inside its own [`Scope`]. WAL mode lets readers
//! proceed while a single writer holds the lock.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;
use serde_json::Value;

use crate::model::Payload;

pub mod chunk_repo;
pub mod document_repo;
pub mod error;
pub mod job_repo;
pub mod migrations;
mod scope;

pub use chunk_repo::NewChunk;
pub use document_repo::NewDocument;
pub use error::DatabaseError;
pub use job_repo::{JobFilter, JobUpdate, NewJob};
pub use scope::Scope;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the SQLite database file.
#[derive(Clone, Debug)]
pub struct Database {
    path: Arc<PathBuf>,
    busy_timeout: Duration,
}

impl Database {
    /// Opens (or creates) the database at the given path and runs all
    /// pending migrations.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn open_with_timeout(path: &Path, busy_timeout: Duration) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let db = Self {
            path: Arc::new(path.to_path_buf()),
            busy_timeout,
        };

        let conn = db.connect()?;
        migrations::run_all(&conn)?;

        log::info!("Database opened at {}", path.display());

        Ok(db)
    }

    /// Opens a new connection with the standard pragmas applied.
    pub fn connect(&self) -> Result<Connection, DatabaseError> {
        let conn = Connection::open(self.path.as_path())?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Ok(conn)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Returns the canonical database path: `~/.docflow/data/docflow.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".docflow").join("data").join("docflow.db"))
}

/// Current time as stored in timestamp columns.
pub(crate) fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}

/// Reads a JSON object column; anything that is not an object becomes empty.
pub(crate) fn object_or_empty(value: Option<Value>) -> Payload {
    match value {
        Some(Value::Object(map)) => map,
        _ => Payload::new(),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_file_db() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("test.db");
        let db = Database::open(&path).unwrap();
        let conn = db.connect().unwrap();
        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert!(count > 0);
        assert!(path.exists());
    }

    #[test]
    fn test_connections_see_each_others_commits() {
        let (_dir, db) = test_support::temp_db();
        let a = db.connect().unwrap();
        let b = db.connect().unwrap();
        a.execute(
            "INSERT INTO jobs (uuid, type, status, progress, created_at, updated_at)
             VALUES ('j1', 'upload', 'pending', 0, ?1, ?1)",
            [now()],
        )
        .unwrap();
        let count: u32 = b
            .query_row("SELECT COUNT(*) FROM jobs", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_foreign_keys_enforced() {
        let (_dir, db) = test_support::temp_db();
        let conn = db.connect().unwrap();
        let result = conn.execute(
            "INSERT INTO document_jobs (job_uuid, document_uuid) VALUES ('missing', 'missing')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_default_database_path() {
        let path = default_database_path().unwrap();
        assert!(path.ends_with("docflow.db"));
        assert!(path.to_string_lossy().contains(".docflow"));
    }

    #[test]
    fn test_object_or_empty() {
        let obj = serde_json::json!({"a": 1});
        assert_eq!(object_or_empty(Some(obj)).len(), 1);
        assert!(object_or_empty(Some(Value::Null)).is_empty());
        assert!(object_or_empty(None).is_empty());
    }
}
