//! Device authorization and installation state models

use serde::{Deserialize, Serialize};

/// Last-known device authorization snapshot, persisted in preferences.
///
/// The server is the authority; this snapshot never expires on its own and is
/// refreshed on every successful remote check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DeviceAuthState {
    /// Whether the server granted this installation permission to transmit.
    pub is_authorized: bool,
    /// Owner label reported by the server, if any.
    pub owner_label: Option<String>,
    /// Unix ms of the last successful server check.
    pub last_checked_at: Option<i64>,
}

/// Per-installation identity and one-shot registration bookkeeping.
///
/// `registration_attempted` is set after the first registration attempt
/// regardless of outcome, so registration runs at most once per install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationState {
    /// Stable device identity used against the authorization endpoint.
    pub device_id: String,
    /// Whether first-run registration was already attempted.
    pub registration_attempted: bool,
}

impl InstallationState {
    /// New installation state for a device that has never registered.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            registration_attempted: false,
        }
    }
}

/// User-facing sync preferences consumed by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPreferences {
    /// Restrict uploads to Wi-Fi. Defaults to on; field devices commonly run
    /// on metered cellular plans.
    pub wifi_only: bool,
    /// Operator name stamped onto new uploads.
    pub uploader_name: String,
}

impl Default for SyncPreferences {
    fn default() -> Self {
        Self {
            wifi_only: true,
            uploader_name: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preferences_default_to_wifi_only() {
        let prefs = SyncPreferences::default();
        assert!(prefs.wifi_only);
    }

    #[test]
    fn new_installation_has_no_registration() {
        let state = InstallationState::new("device-1234");
        assert_eq!(state.device_id, "device-1234");
        assert!(!state.registration_attempted);
    }
}
