//! Upload record model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A unique identifier for an upload record, assigned by the store on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub i64);

impl RecordId {
    /// Raw row identifier.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Delivery status of a captured artifact.
///
/// The only legal transition is `Pending` to `Uploaded`, applied exactly once
/// after a confirmed server success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// Captured locally, not yet confirmed by the server.
    #[default]
    Pending,
    /// Server confirmed receipt.
    Uploaded,
}

impl UploadStatus {
    /// Integer encoding used in the database.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        match self {
            Self::Pending => 0,
            Self::Uploaded => 1,
        }
    }

    /// Decode the database integer encoding; unknown values read as Pending
    /// so a stray row is retried rather than stranded.
    #[must_use]
    pub const fn from_i32(value: i32) -> Self {
        match value {
            1 => Self::Uploaded,
            _ => Self::Pending,
        }
    }
}

/// One durable record per captured artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    /// Store-assigned identity; the only stable handle for a record.
    pub id: RecordId,
    /// Logical customer bucket the artifact belongs to.
    pub customer_label: String,
    /// Path hint captured at insert time. Not authoritative; the resolver
    /// may rewrite it when the storage root moves between installs.
    pub stored_path: String,
    /// Creation timestamp (Unix ms), set once at insert.
    pub created_at: i64,
    /// Operator/device identity; rewritten in bulk if the registered owner changes.
    pub uploaded_by: String,
    /// Delivery status.
    pub status: UploadStatus,
}

impl UploadRecord {
    /// File name component of the stored path, if any.
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        std::path::Path::new(&self.stored_path)
            .file_name()
            .and_then(|name| name.to_str())
    }
}
