//! Observable sync pass status

use serde::{Deserialize, Serialize};

/// Point-in-time view of the current (or last) sync pass.
///
/// In-memory only; recreated on every pass and published through a watch
/// channel for UI consumption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SyncStatus {
    /// Whether a pass is currently running.
    pub is_running: bool,
    /// 1-based index of the record currently being processed.
    pub current_index: usize,
    /// Number of records the pass set out to process.
    pub total_count: usize,
    /// Records confirmed uploaded so far in this pass.
    pub uploaded_count: usize,
    /// Human-readable status line for display.
    pub message: String,
}

impl SyncStatus {
    /// Idle status with a message and no progress.
    pub fn idle(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Running status for the given position in the batch.
    pub fn running(
        current_index: usize,
        total_count: usize,
        uploaded_count: usize,
        message: impl Into<String>,
    ) -> Self {
        Self {
            is_running: true,
            current_index,
            total_count,
            uploaded_count,
            message: message.into(),
        }
    }
}
