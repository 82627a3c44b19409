//! Self-healing artifact path resolution.
//!
//! A record's `stored_path` is only a hint: the artifact root can be recreated
//! or renamed between app installs while the database row, inserted earlier,
//! still carries the old location. The resolver walks progressively wider
//! search scopes and writes the corrected path back to the store on a hit, so
//! the first stale lookup after a root move is also the last one.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::db::RecordStore;
use crate::models::UploadRecord;

/// Resolution failure. `NotFound` is expected operational state, not a fault;
/// the orchestrator skips the record and reconsiders it on the next pass.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no backing file found for record {record_id}")]
    NotFound { record_id: i64 },
}

/// Locates the physical artifact for a record under a storage root laid out
/// as `<root>/<customer_label>/<filename>`.
#[derive(Clone)]
pub struct PathResolver {
    root: PathBuf,
    store: Arc<dyn RecordStore>,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>, store: Arc<dyn RecordStore>) -> Self {
        Self {
            root: root.into(),
            store,
        }
    }

    /// Storage root this resolver searches under.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve the artifact for `record`, first hit wins:
    /// 1. the stored path as-is;
    /// 2. the canonical `<root>/<customer>/<filename>` location;
    /// 3. any customer folder under the root containing the filename.
    ///
    /// Hits outside the stored path are healed back into the store.
    pub fn resolve(&self, record: &UploadRecord) -> Result<PathBuf, ResolveError> {
        let stored = Path::new(&record.stored_path);
        if stored.is_file() {
            return Ok(stored.to_path_buf());
        }

        let not_found = ResolveError::NotFound {
            record_id: record.id.as_i64(),
        };
        let Some(file_name) = record.file_name() else {
            return Err(not_found);
        };

        let canonical = self.root.join(&record.customer_label).join(file_name);
        if canonical.is_file() {
            self.heal(record, &canonical);
            return Ok(canonical);
        }

        if let Some(found) = self.scan_customer_folders(file_name) {
            self.heal(record, &found);
            return Ok(found);
        }

        Err(not_found)
    }

    /// Last-resort scan across all customer sub-folders for the filename.
    fn scan_customer_folders(&self, file_name: &str) -> Option<PathBuf> {
        let entries = std::fs::read_dir(&self.root).ok()?;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let candidate = path.join(file_name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }

    fn heal(&self, record: &UploadRecord, found: &Path) {
        let new_path = found.to_string_lossy();
        match self.store.update_path(record.id, &new_path) {
            Ok(true) => {
                tracing::info!(
                    record_id = record.id.as_i64(),
                    old_path = %record.stored_path,
                    new_path = %new_path,
                    "Healed stale artifact path"
                );
            }
            Ok(false) => {
                tracing::warn!(
                    record_id = record.id.as_i64(),
                    "Record vanished while healing its path"
                );
            }
            Err(error) => {
                // The artifact was still found; persisting the correction can
                // wait for the next resolve.
                tracing::warn!(
                    record_id = record.id.as_i64(),
                    "Failed to persist healed path: {error}"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, RecordStore};
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn record_for(store: &dyn RecordStore, customer: &str, path: &Path) -> UploadRecord {
        let id = store
            .insert(customer, &path.to_string_lossy(), "op")
            .unwrap();
        store.get(id).unwrap().unwrap()
    }

    #[test]
    fn resolves_stored_path_directly() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("IMG_0001.jpg");
        std::fs::write(&file, b"jpeg").unwrap();

        let store = Arc::new(Database::open_in_memory().unwrap().record_store());
        let resolver = PathResolver::new(dir.path().join("unused-root"), store.clone());

        let record = record_for(store.as_ref(), "Acme", &file);
        assert_eq!(resolver.resolve(&record).unwrap(), file);
    }

    #[test]
    fn heals_from_canonical_customer_folder() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("artifacts");
        let real = root.join("Acme").join("IMG_0002.jpg");
        std::fs::create_dir_all(real.parent().unwrap()).unwrap();
        std::fs::write(&real, b"jpeg").unwrap();

        let store = Arc::new(Database::open_in_memory().unwrap().record_store());
        let resolver = PathResolver::new(&root, store.clone());

        // Stale hint pointing at a root from a previous install.
        let record = record_for(
            store.as_ref(),
            "Acme",
            Path::new("/old/install/Acme/IMG_0002.jpg"),
        );

        let resolved = resolver.resolve(&record).unwrap();
        assert_eq!(resolved, real);

        // One resolve call also persisted the corrected path.
        let healed = store.get(record.id).unwrap().unwrap();
        assert_eq!(healed.stored_path, real.to_string_lossy());
    }

    #[test]
    fn heals_from_sibling_customer_folder_scan() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("artifacts");
        // File lives under a folder that doesn't match the record's label
        // (customer renamed on disk).
        let real = root.join("Acme Corp").join("IMG_0003.jpg");
        std::fs::create_dir_all(real.parent().unwrap()).unwrap();
        std::fs::write(&real, b"jpeg").unwrap();

        let store = Arc::new(Database::open_in_memory().unwrap().record_store());
        let resolver = PathResolver::new(&root, store.clone());

        let record = record_for(store.as_ref(), "Acme", Path::new("/gone/Acme/IMG_0003.jpg"));

        let resolved = resolver.resolve(&record).unwrap();
        assert_eq!(resolved, real);
        assert_eq!(
            store.get(record.id).unwrap().unwrap().stored_path,
            real.to_string_lossy()
        );
    }

    #[test]
    fn missing_everywhere_is_not_found() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Database::open_in_memory().unwrap().record_store());
        let resolver = PathResolver::new(dir.path(), store.clone());

        let record = record_for(store.as_ref(), "Acme", Path::new("/gone/Acme/IMG_0004.jpg"));
        assert_eq!(
            resolver.resolve(&record),
            Err(ResolveError::NotFound {
                record_id: record.id.as_i64()
            })
        );
        // The stale hint is left untouched.
        assert_eq!(
            store.get(record.id).unwrap().unwrap().stored_path,
            "/gone/Acme/IMG_0004.jpg"
        );
    }
}
