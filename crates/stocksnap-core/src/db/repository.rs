//! Upload record repository implementation

use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{params, Connection};

use crate::error::{Error, Result};
use crate::models::{RecordId, UploadRecord, UploadStatus};
use crate::util::unix_timestamp_ms;

/// Trait for upload record storage operations.
///
/// Implementations serialize access internally; callers may share one store
/// across tasks. The orchestrator is the only caller that mutates `status`.
pub trait RecordStore: Send + Sync {
    /// Insert a new pending record, returning its store-assigned id.
    fn insert(&self, customer_label: &str, stored_path: &str, uploaded_by: &str)
        -> Result<RecordId>;

    /// Get a record by id.
    fn get(&self, id: RecordId) -> Result<Option<UploadRecord>>;

    /// List pending records, oldest first.
    fn list_pending(&self) -> Result<Vec<UploadRecord>>;

    /// Mark a record uploaded. Returns `true` if a pending row was flipped;
    /// `false` when the record was already uploaded or does not exist.
    fn mark_uploaded(&self, id: RecordId) -> Result<bool>;

    /// Persist a corrected artifact path for a record.
    fn update_path(&self, id: RecordId, new_path: &str) -> Result<bool>;

    /// Count pending records.
    fn count_pending(&self) -> Result<usize>;

    /// Delete the given pending records, returning how many rows went away.
    /// Used by the orchestrator's cleanup of sustained-unresolvable records.
    fn prune(&self, ids: &[RecordId]) -> Result<usize>;

    /// Rewrite `uploaded_by` in bulk when the device's registered owner changes.
    fn reassign_owner(&self, old_label: &str, new_label: &str) -> Result<usize>;
}

/// SQLite implementation of `RecordStore`.
#[derive(Clone)]
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    /// Create a new repository over a shared connection.
    #[must_use]
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("connection mutex poisoned".to_string()))
    }

    /// Parse a record from a database row.
    fn parse_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<UploadRecord> {
        Ok(UploadRecord {
            id: RecordId(row.get(0)?),
            customer_label: row.get(1)?,
            stored_path: row.get(2)?,
            created_at: row.get(3)?,
            uploaded_by: row.get(4)?,
            status: UploadStatus::from_i32(row.get(5)?),
        })
    }
}

impl RecordStore for SqliteRecordStore {
    fn insert(
        &self,
        customer_label: &str,
        stored_path: &str,
        uploaded_by: &str,
    ) -> Result<RecordId> {
        let customer_label = customer_label.trim();
        if customer_label.is_empty() {
            return Err(Error::InvalidInput(
                "customer label must not be empty".to_string(),
            ));
        }

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO upload_records (customer_label, stored_path, created_at, uploaded_by, status)
             VALUES (?, ?, ?, ?, ?)",
            params![
                customer_label,
                stored_path,
                unix_timestamp_ms(),
                uploaded_by,
                UploadStatus::Pending.as_i32()
            ],
        )?;

        Ok(RecordId(conn.last_insert_rowid()))
    }

    fn get(&self, id: RecordId) -> Result<Option<UploadRecord>> {
        let conn = self.lock()?;
        let result = conn.query_row(
            "SELECT id, customer_label, stored_path, created_at, uploaded_by, status
             FROM upload_records WHERE id = ?",
            params![id.as_i64()],
            Self::parse_record,
        );

        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list_pending(&self) -> Result<Vec<UploadRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, customer_label, stored_path, created_at, uploaded_by, status
             FROM upload_records
             WHERE status = 0
             ORDER BY created_at ASC, id ASC",
        )?;

        let records = stmt
            .query_map([], Self::parse_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records)
    }

    fn mark_uploaded(&self, id: RecordId) -> Result<bool> {
        let conn = self.lock()?;
        // Guarded on status = 0 so the transition is monotonic: a record
        // already uploaded is never rewritten.
        let rows = conn.execute(
            "UPDATE upload_records SET status = 1 WHERE id = ? AND status = 0",
            params![id.as_i64()],
        )?;
        Ok(rows > 0)
    }

    fn update_path(&self, id: RecordId, new_path: &str) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE upload_records SET stored_path = ? WHERE id = ?",
            params![new_path, id.as_i64()],
        )?;
        Ok(rows > 0)
    }

    fn count_pending(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM upload_records WHERE status = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn prune(&self, ids: &[RecordId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let conn = self.lock()?;
        let mut removed = 0;
        for id in ids {
            // Only pending rows are ever pruned; an uploaded record is
            // history, not garbage.
            removed += conn.execute(
                "DELETE FROM upload_records WHERE id = ? AND status = 0",
                params![id.as_i64()],
            )?;
        }
        Ok(removed)
    }

    fn reassign_owner(&self, old_label: &str, new_label: &str) -> Result<usize> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE upload_records SET uploaded_by = ? WHERE uploaded_by = ?",
            params![new_label, old_label],
        )?;
        Ok(rows)
    }
}
