//! stocksnap-core - Offline-first upload sync engine for StockSnap
//!
//! This crate contains the durable record store, device authorization gate,
//! artifact path resolution, and the sync orchestration used by the StockSnap
//! field apps. Capture, camera, and UI live in the host app crates; they talk
//! to this engine through the trait seams re-exported here.

pub mod auth;
pub mod background;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod models;
pub mod resolver;
pub mod sync;
pub mod uploader;
mod util;

pub use auth::{AuthDecision, AuthorizationGate, DeviceAuthGate, HttpDeviceAuthClient};
pub use background::{BackgroundBridge, BackgroundRun, BackgroundScheduler, UserNotifier};
pub use connectivity::{ConnectivityChange, ConnectivityMonitor, NetworkSnapshot, TransportKind};
pub use db::{Database, PreferenceStore, RecordStore};
pub use error::{Error, Result};
pub use models::{RecordId, SyncStatus, UploadRecord, UploadStatus};
pub use resolver::PathResolver;
pub use sync::{PassOutcome, SyncOrchestrator, SyncTrigger};
pub use uploader::{ArtifactUploader, HttpArtifactUploader, UploadError};
