//! Data models shared by the sync engine and its host app.

mod device;
mod record;
mod status;

pub use device::{DeviceAuthState, InstallationState, SyncPreferences};
pub use record::{RecordId, UploadRecord, UploadStatus};
pub use status::SyncStatus;
