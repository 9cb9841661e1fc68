use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};

use rusqlite::Connection;

use super::DatabaseError;

static SAVEPOINT_SEQ: AtomicU64 = AtomicU64::new(0);

enum Kind {
    Transaction,
    Savepoint(String),
}

/// A transaction scope that rolls back unless committed.
///
/// On a connection in autocommit mode the scope is a real transaction and
/// `commit` makes the work durable. On a connection that is already inside
/// a caller-owned transaction the scope is a savepoint: `commit` releases
/// it into the outer transaction and the caller decides when it lands.
pub struct Scope<'c> {
    conn: &'c Connection,
    kind: Kind,
    finished: bool,
}

impl<'c> Scope<'c> {
    /// Starts a deferred scope.
    pub fn begin(conn: &'c Connection) -> Result<Self, DatabaseError> {
        Self::open(conn, "BEGIN DEFERRED")
    }

    /// Starts a scope that takes the write lock up front, so a
    /// check-then-write sequence cannot interleave with another writer.
    pub fn begin_immediate(conn: &'c Connection) -> Result<Self, DatabaseError> {
        Self::open(conn, "BEGIN IMMEDIATE")
    }

    fn open(conn: &'c Connection, begin: &str) -> Result<Self, DatabaseError> {
        let kind = if conn.is_autocommit() {
            conn.execute_batch(begin)?;
            Kind::Transaction
        } else {
            let name = format!(
                "docflow_sp_{}",
                SAVEPOINT_SEQ.fetch_add(1, Ordering::Relaxed)
            );
            conn.execute_batch(&format!("SAVEPOINT {}", name))?;
            Kind::Savepoint(name)
        };

        Ok(Self {
            conn,
            kind,
            finished: false,
        })
    }

    /// True when this scope's commit is the durable one.
    pub fn owns_transaction(&self) -> bool {
        matches!(self.kind, Kind::Transaction)
    }

    pub fn commit(mut self) -> Result<(), DatabaseError> {
        let sql = match &self.kind {
            Kind::Transaction => "COMMIT".to_string(),
            Kind::Savepoint(name) => format!("RELEASE {}", name),
        };

        self.finished = true;
        if let Err(e) = self.conn.execute_batch(&sql) {
            if let Err(rollback) = self.rollback_inner() {
                log::warn!("Rollback after failed commit also failed: {}", rollback);
            }
            return Err(DatabaseError::Commit(e));
        }
        Ok(())
    }

    pub fn rollback(mut self) -> Result<(), DatabaseError> {
        self.finished = true;
        self.rollback_inner()?;
        Ok(())
    }

    fn rollback_inner(&self) -> rusqlite::Result<()> {
        match &self.kind {
            // SQLite may already have rolled back on its own.
            Kind::Transaction if self.conn.is_autocommit() => Ok(()),
            Kind::Transaction => self.conn.execute_batch("ROLLBACK"),
            Kind::Savepoint(name) => self
                .conn
                .execute_batch(&format!("ROLLBACK TO {0}; RELEASE {0}", name)),
        }
    }
}

impl Deref for Scope<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.rollback_inner() {
                log::warn!("Scope rollback failed: {}", e);
            }
        }
    }
}
