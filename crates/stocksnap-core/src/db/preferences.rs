//! Preference repository implementation
//!
//! Key-value persistence for the small pieces of state shared between the
//! engine and the host app: sync preferences, the device authorization
//! snapshot, the per-device fallback flag, and the one-shot registration flag.

use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{params, Connection};

use crate::error::{Error, Result};
use crate::models::{DeviceAuthState, SyncPreferences};
use crate::util::unix_timestamp_ms;

const KEY_WIFI_ONLY: &str = "wifi_only";
const KEY_UPLOADER_NAME: &str = "uploader_name";
const KEY_AUTH_STATE: &str = "auth_state";

/// Trait for preference storage operations.
pub trait PreferenceStore: Send + Sync {
    /// Load sync preferences, falling back to defaults for unset keys.
    fn preferences(&self) -> Result<SyncPreferences>;

    /// Save sync preferences.
    fn set_preferences(&self, prefs: &SyncPreferences) -> Result<()>;

    /// Load the last-known device authorization snapshot.
    fn auth_state(&self) -> Result<DeviceAuthState>;

    /// Save the device authorization snapshot.
    fn set_auth_state(&self, state: &DeviceAuthState) -> Result<()>;

    /// Per-device local fallback flag: was this device authorized the last
    /// time the server was reachable?
    fn local_auth_fallback(&self, device_id: &str) -> Result<bool>;

    /// Set the per-device local fallback flag.
    fn set_local_auth_fallback(&self, device_id: &str, authorized: bool) -> Result<()>;

    /// Whether first-run registration was already attempted for this device.
    fn registration_attempted(&self, device_id: &str) -> Result<bool>;

    /// Record that registration was attempted (set at most once per install,
    /// regardless of the registration outcome).
    fn set_registration_attempted(&self, device_id: &str) -> Result<()>;
}

/// SQLite implementation of `PreferenceStore`.
#[derive(Clone)]
pub struct SqlitePreferenceStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePreferenceStore {
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

    fn get_value(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let result = conn.query_row(
            "SELECT value FROM preferences WHERE key = ?",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_value(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO preferences (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, unix_timestamp_ms()],
        )?;
        Ok(())
    }

    fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        Ok(self.get_value(key)?.map_or(default, |value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        }))
    }

    fn fallback_key(device_id: &str) -> String {
        format!("auth_fallback:{device_id}")
    }

    fn registration_key(device_id: &str) -> String {
        format!("registration_attempted:{device_id}")
    }
}

impl PreferenceStore for SqlitePreferenceStore {
    fn preferences(&self) -> Result<SyncPreferences> {
        let defaults = SyncPreferences::default();
        Ok(SyncPreferences {
            wifi_only: self.get_bool(KEY_WIFI_ONLY, defaults.wifi_only)?,
            uploader_name: self
                .get_value(KEY_UPLOADER_NAME)?
                .unwrap_or(defaults.uploader_name),
        })
    }

    fn set_preferences(&self, prefs: &SyncPreferences) -> Result<()> {
        self.set_value(KEY_WIFI_ONLY, if prefs.wifi_only { "true" } else { "false" })?;
        self.set_value(KEY_UPLOADER_NAME, &prefs.uploader_name)?;
        Ok(())
    }

    fn auth_state(&self) -> Result<DeviceAuthState> {
        match self.get_value(KEY_AUTH_STATE)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(DeviceAuthState::default()),
        }
    }

    fn set_auth_state(&self, state: &DeviceAuthState) -> Result<()> {
        self.set_value(KEY_AUTH_STATE, &serde_json::to_string(state)?)
    }

    fn local_auth_fallback(&self, device_id: &str) -> Result<bool> {
        self.get_bool(&Self::fallback_key(device_id), false)
    }

    fn set_local_auth_fallback(&self, device_id: &str, authorized: bool) -> Result<()> {
        self.set_value(
            &Self::fallback_key(device_id),
            if authorized { "true" } else { "false" },
        )
    }

    fn registration_attempted(&self, device_id: &str) -> Result<bool> {
        self.get_bool(&Self::registration_key(device_id), false)
    }

    fn set_registration_attempted(&self, device_id: &str) -> Result<()> {
        self.set_value(&Self::registration_key(device_id), "true")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;

    fn setup() -> SqlitePreferenceStore {
        Database::open_in_memory().unwrap().preference_store()
    }

    #[test]
    fn preferences_default_when_unset() {
        let store = setup();
        let prefs = store.preferences().unwrap();
        assert!(prefs.wifi_only);
        assert_eq!(prefs.uploader_name, "");
    }

    #[test]
    fn preferences_round_trip() {
        let store = setup();
        let prefs = SyncPreferences {
            wifi_only: false,
            uploader_name: "scanner-7".to_string(),
        };
        store.set_preferences(&prefs).unwrap();
        assert_eq!(store.preferences().unwrap(), prefs);
    }

    #[test]
    fn auth_state_round_trip() {
        let store = setup();
        assert_eq!(store.auth_state().unwrap(), DeviceAuthState::default());

        let state = DeviceAuthState {
            is_authorized: true,
            owner_label: Some("Warehouse North".to_string()),
            last_checked_at: Some(1_700_000_000_000),
        };
        store.set_auth_state(&state).unwrap();
        assert_eq!(store.auth_state().unwrap(), state);
    }

    #[test]
    fn fallback_flag_is_per_device() {
        let store = setup();
        store.set_local_auth_fallback("device-a", true).unwrap();

        assert!(store.local_auth_fallback("device-a").unwrap());
        assert!(!store.local_auth_fallback("device-b").unwrap());
    }

    #[test]
    fn registration_flag_sticks() {
        let store = setup();
        assert!(!store.registration_attempted("device-a").unwrap());

        store.set_registration_attempted("device-a").unwrap();
        assert!(store.registration_attempted("device-a").unwrap());
    }
}
