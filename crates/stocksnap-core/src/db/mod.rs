//! Database layer: connection management, migrations, and repositories.

mod connection;
mod migrations;
mod preferences;
mod repository;

pub use connection::Database;
pub use preferences::{PreferenceStore, SqlitePreferenceStore};
pub use repository::{RecordStore, SqliteRecordStore};
