//! Shared SQLite handle and schema.

use crate::StoreError;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;

/// One SQLite connection behind a mutex, shared by the signature store and
/// the emotion log. Every read or write runs with the lock held, so a query
/// never observes a partially applied append.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file at `path` and apply the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        tracing::info!(path = %path.as_ref().display(), "opened database");
        Self::init(conn)
    }

    /// Private in-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS subjects (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                age INTEGER NOT NULL,
                crime TEXT NOT NULL,
                subject_key TEXT NOT NULL UNIQUE,
                signature BLOB,
                enrolled_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS emotion_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject_key TEXT NOT NULL
                    REFERENCES subjects(subject_key) ON DELETE CASCADE,
                ts_us INTEGER NOT NULL,
                emotion TEXT NOT NULL,
                session_id TEXT
            );
            CREATE INDEX IF NOT EXISTS emotion_records_subject_idx
                ON emotion_records(subject_key, ts_us);
            COMMIT;",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` with exclusive access to the connection.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&mut conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_is_idempotent() {
        let tf = tempfile::NamedTempFile::new().unwrap();
        Database::open(tf.path()).unwrap();
        // Reopening applies CREATE IF NOT EXISTS over an existing schema.
        let db = Database::open(tf.path()).unwrap();
        let fk: i64 = db
            .with_conn(|c| Ok(c.query_row("PRAGMA foreign_keys", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(fk, 1);
    }
}
