//! Database connection management

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::error::Result;

use super::migrations;
use super::preferences::SqlitePreferenceStore;
use super::repository::SqliteRecordStore;

/// SQLite database wrapper.
///
/// All access goes through a single connection behind a mutex; the store
/// contract requires one writer at a time and callers never hold the lock
/// across an await point.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open a database at the given path, creating it if it doesn't exist.
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::initialize(conn)
    }

    /// Open an in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> Result<Self> {
        configure(&conn);
        migrations::run(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Record repository sharing this connection.
    #[must_use]
    pub fn record_store(&self) -> SqliteRecordStore {
        SqliteRecordStore::new(Arc::clone(&self.conn))
    }

    /// Preference repository sharing this connection.
    #[must_use]
    pub fn preference_store(&self) -> SqlitePreferenceStore {
        SqlitePreferenceStore::new(Arc::clone(&self.conn))
    }
}

/// Configure SQLite for a single-writer embedded workload.
///
/// Pragma failures are non-fatal; the database still works with default
/// settings, just with worse concurrency characteristics.
fn configure(conn: &Connection) {
    // WAL keeps reads cheap while a sync pass writes status updates.
    for (pragma, value) in [
        ("journal_mode", "WAL"),
        ("synchronous", "NORMAL"),
        ("foreign_keys", "ON"),
    ] {
        if let Err(error) = conn.pragma_update(None, pragma, value) {
            tracing::warn!(pragma, value, "Failed to apply SQLite pragma: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::RecordStore;
    use tempfile::tempdir;

    #[test]
    fn open_in_memory_runs_migrations() {
        let db = Database::open_in_memory().unwrap();
        // Migrated schema accepts inserts immediately.
        let id = db.record_store().insert("Acme", "/tmp/a.jpg", "tester").unwrap();
        assert_eq!(id.as_i64(), 1);
    }

    #[test]
    fn open_creates_file_and_reopens() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stocksnap.db");

        {
            let db = Database::open(&path).unwrap();
            db.record_store().insert("Acme", "/tmp/a.jpg", "tester").unwrap();
        }

        let db = Database::open(&path).unwrap();
        assert_eq!(db.record_store().count_pending().unwrap(), 1);
    }
}
