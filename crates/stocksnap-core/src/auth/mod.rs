//! Device authorization gate.
//!
//! Field devices must be permitted by the backend before they transmit, but
//! they routinely operate with intermittent connectivity. Authorization is
//! therefore two-tier: the server is the authority, and a locally persisted
//! "was authorized last time we could reach the server" flag keeps a
//! previously-granted device working while the server is unreachable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;

use crate::db::PreferenceStore;
use crate::models::{DeviceAuthState, InstallationState};
use crate::util::{
    compact_text, is_http_url, looks_like_html, normalize_text_option, unix_timestamp_ms,
};

const CHECK_TIMEOUT: Duration = Duration::from_secs(3);
const REGISTER_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of an authorization check.
///
/// Indeterminate server results are resolved inside the gate via the local
/// fallback tier; callers only ever see a definite decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    /// Device may transmit. `degraded` marks a fallback decision made while
    /// the server was unreachable.
    Authorized {
        owner_label: Option<String>,
        degraded: bool,
    },
    /// Device must not transmit.
    Denied { reason: String },
}

impl AuthDecision {
    #[must_use]
    pub const fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized { .. })
    }
}

/// Gate seam the orchestrator depends on.
#[async_trait]
pub trait AuthorizationGate: Send + Sync {
    async fn check_authorization(&self) -> AuthDecision;
}

/// Errors from the authorization endpoint.
#[derive(Debug, Error)]
pub enum AuthApiError {
    #[error("Invalid auth configuration: {0}")]
    InvalidConfiguration(&'static str),
    /// Timeout or unreachable host. The gate treats this as indeterminate.
    #[error("Auth HTTP request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Non-200 status or an HTML error page where JSON was expected.
    #[error("Auth server error: HTTP {status}: {body}")]
    Server { status: u16, body: String },
    /// A 200 response whose body is not the expected envelope.
    #[error("Malformed auth response: {body}")]
    MalformedResponse { body: String },
}

/// Parsed `{success, message, device_owner?}` envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAuthReply {
    pub success: bool,
    pub message: String,
    pub device_owner: Option<String>,
}

/// Wire seam for the authorization endpoint, injectable in tests.
#[async_trait]
pub trait DeviceAuthApi: Send + Sync {
    /// Bounded-timeout authorization check.
    async fn check(&self, device_id: &str) -> Result<DeviceAuthReply, AuthApiError>;

    /// One-shot device registration.
    async fn register(
        &self,
        device_id: &str,
        device_info: &str,
    ) -> Result<DeviceAuthReply, AuthApiError>;
}

/// HTTP implementation of `DeviceAuthApi`.
#[derive(Clone)]
pub struct HttpDeviceAuthClient {
    endpoint: String,
    client: Client,
}

impl HttpDeviceAuthClient {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, AuthApiError> {
        let endpoint = endpoint.into().trim().trim_end_matches('/').to_string();
        if endpoint.is_empty() {
            return Err(AuthApiError::InvalidConfiguration(
                "endpoint must not be empty",
            ));
        }
        if !is_http_url(&endpoint) {
            return Err(AuthApiError::InvalidConfiguration(
                "endpoint must include http:// or https://",
            ));
        }

        Ok(Self {
            endpoint,
            client: Client::builder().build()?,
        })
    }

    async fn post_form(
        &self,
        form: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<DeviceAuthReply, AuthApiError> {
        let response = self
            .client
            .post(&self.endpoint)
            .timeout(timeout)
            .form(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        parse_auth_reply(status, &body)
    }
}

#[async_trait]
impl DeviceAuthApi for HttpDeviceAuthClient {
    async fn check(&self, device_id: &str) -> Result<DeviceAuthReply, AuthApiError> {
        self.post_form(&[("action", "check"), ("device_id", device_id)], CHECK_TIMEOUT)
            .await
    }

    async fn register(
        &self,
        device_id: &str,
        device_info: &str,
    ) -> Result<DeviceAuthReply, AuthApiError> {
        self.post_form(
            &[
                ("action", "register"),
                ("device_id", device_id),
                ("device_info", device_info),
            ],
            REGISTER_TIMEOUT,
        )
        .await
    }
}

#[derive(Debug, Deserialize)]
struct AuthReplyBody {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    device_owner: Option<String>,
}

/// Classify a raw endpoint response.
///
/// A non-200 status or an HTML body is a server failure, distinct from a
/// genuine JSON-decode failure of a 200 response; both are logged under
/// different classes for diagnostics.
fn parse_auth_reply(status: StatusCode, body: &str) -> Result<DeviceAuthReply, AuthApiError> {
    if status != StatusCode::OK || looks_like_html(body) {
        return Err(AuthApiError::Server {
            status: status.as_u16(),
            body: compact_text(body),
        });
    }

    let parsed: AuthReplyBody =
        serde_json::from_str(body).map_err(|_| AuthApiError::MalformedResponse {
            body: compact_text(body),
        })?;

    // Servers hand back "" or padded owner names; treat blanks as absent so
    // a whitespace label never overwrites a record's owner.
    Ok(DeviceAuthReply {
        success: parsed.success,
        message: parsed.message.unwrap_or_default(),
        device_owner: normalize_text_option(parsed.device_owner),
    })
}

/// Two-tier authorization gate.
pub struct DeviceAuthGate {
    api: Arc<dyn DeviceAuthApi>,
    prefs: Arc<dyn PreferenceStore>,
    device_id: String,
    device_info: String,
    registration_attempted: AtomicBool,
}

impl DeviceAuthGate {
    /// Build a gate for this installation. `device_info` is a human-readable
    /// descriptor sent with first-run registration (model, app version).
    pub fn new(
        api: Arc<dyn DeviceAuthApi>,
        prefs: Arc<dyn PreferenceStore>,
        installation: InstallationState,
        device_info: impl Into<String>,
    ) -> Self {
        Self {
            api,
            prefs,
            device_id: installation.device_id,
            device_info: device_info.into(),
            registration_attempted: AtomicBool::new(installation.registration_attempted),
        }
    }

    /// First-run registration, attempted at most once per install.
    ///
    /// Best-effort: the flag is set regardless of outcome so a flaky first
    /// launch doesn't re-register on every subsequent check.
    async fn register_if_first_run(&self) {
        if self.registration_attempted.load(Ordering::Acquire) {
            return;
        }
        if self
            .prefs
            .registration_attempted(&self.device_id)
            .unwrap_or(false)
        {
            self.registration_attempted.store(true, Ordering::Release);
            return;
        }

        match self.api.register(&self.device_id, &self.device_info).await {
            Ok(reply) => {
                tracing::info!(success = reply.success, "Device registration: {}", reply.message);
            }
            Err(error) => {
                tracing::warn!("Device registration failed: {error}");
            }
        }

        self.registration_attempted.store(true, Ordering::Release);
        if let Err(error) = self.prefs.set_registration_attempted(&self.device_id) {
            tracing::warn!("Failed to persist registration flag: {error}");
        }
    }

    fn persist_decision(&self, is_authorized: bool, owner_label: Option<&str>) {
        let state = DeviceAuthState {
            is_authorized,
            owner_label: owner_label.map(str::to_string),
            last_checked_at: Some(unix_timestamp_ms()),
        };
        if let Err(error) = self.prefs.set_auth_state(&state) {
            tracing::warn!("Failed to persist auth state: {error}");
        }
        if let Err(error) = self
            .prefs
            .set_local_auth_fallback(&self.device_id, is_authorized)
        {
            tracing::warn!("Failed to persist auth fallback flag: {error}");
        }
    }

    /// Resolve an unreachable-server check via the local fallback tier.
    fn fallback_decision(&self) -> AuthDecision {
        let previously_authorized = self
            .prefs
            .local_auth_fallback(&self.device_id)
            .unwrap_or(false);

        if previously_authorized {
            let owner_label = self
                .prefs
                .auth_state()
                .ok()
                .and_then(|state| state.owner_label);
            tracing::warn!(
                device_id = %self.device_id,
                "Authorization server unreachable; proceeding on cached authorization"
            );
            AuthDecision::Authorized {
                owner_label,
                degraded: true,
            }
        } else {
            AuthDecision::Denied {
                reason: "authorization server unreachable and no prior authorization".to_string(),
            }
        }
    }
}

#[async_trait]
impl AuthorizationGate for DeviceAuthGate {
    async fn check_authorization(&self) -> AuthDecision {
        self.register_if_first_run().await;

        match self.api.check(&self.device_id).await {
            Ok(reply) if reply.success => {
                self.persist_decision(true, reply.device_owner.as_deref());
                AuthDecision::Authorized {
                    owner_label: reply.device_owner,
                    degraded: false,
                }
            }
            Ok(reply) => {
                // Authoritative denial from the server overwrites any cached grant.
                self.persist_decision(false, reply.device_owner.as_deref());
                let reason = if reply.message.is_empty() {
                    "device not authorized".to_string()
                } else {
                    reply.message
                };
                AuthDecision::Denied { reason }
            }
            Err(error) => {
                tracing::debug!("Authorization check failed: {error}");
                self.fallback_decision()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    struct FakeAuthApi {
        check_result: fn() -> Result<DeviceAuthReply, AuthApiError>,
        register_calls: AtomicUsize,
    }

    impl FakeAuthApi {
        fn new(check_result: fn() -> Result<DeviceAuthReply, AuthApiError>) -> Self {
            Self {
                check_result,
                register_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DeviceAuthApi for FakeAuthApi {
        async fn check(&self, _device_id: &str) -> Result<DeviceAuthReply, AuthApiError> {
            (self.check_result)()
        }

        async fn register(
            &self,
            _device_id: &str,
            _device_info: &str,
        ) -> Result<DeviceAuthReply, AuthApiError> {
            self.register_calls.fetch_add(1, Ordering::SeqCst);
            Err(AuthApiError::Server {
                status: 503,
                body: "maintenance".to_string(),
            })
        }
    }

    fn unreachable() -> Result<DeviceAuthReply, AuthApiError> {
        Err(AuthApiError::Server {
            status: 504,
            body: String::new(),
        })
    }

    fn granted() -> Result<DeviceAuthReply, AuthApiError> {
        Ok(DeviceAuthReply {
            success: true,
            message: "ok".to_string(),
            device_owner: Some("Warehouse North".to_string()),
        })
    }

    fn revoked() -> Result<DeviceAuthReply, AuthApiError> {
        Ok(DeviceAuthReply {
            success: false,
            message: "device revoked".to_string(),
            device_owner: None,
        })
    }

    fn gate_with(api: Arc<FakeAuthApi>, prefs: Arc<dyn PreferenceStore>) -> DeviceAuthGate {
        DeviceAuthGate::new(
            api,
            prefs,
            InstallationState::new("device-1"),
            "test rig v1",
        )
    }

    #[test]
    fn endpoint_validation() {
        assert!(HttpDeviceAuthClient::new("  ").is_err());
        assert!(HttpDeviceAuthClient::new("api.example.com").is_err());
        assert!(HttpDeviceAuthClient::new("https://api.example.com/device/").is_ok());
    }

    #[test]
    fn parse_rejects_html_as_server_error() {
        let result = parse_auth_reply(
            StatusCode::OK,
            "<!DOCTYPE html><html><body>502 Bad Gateway</body></html>",
        );
        assert!(matches!(result, Err(AuthApiError::Server { status: 200, .. })));
    }

    #[test]
    fn parse_distinguishes_malformed_json() {
        let result = parse_auth_reply(StatusCode::OK, "not json at all");
        assert!(matches!(result, Err(AuthApiError::MalformedResponse { .. })));
    }

    #[test]
    fn parse_accepts_envelope() {
        let reply =
            parse_auth_reply(StatusCode::OK, r#"{"success":true,"message":"ok","device_owner":"W1"}"#)
                .unwrap();
        assert_eq!(reply.device_owner.as_deref(), Some("W1"));
        assert!(reply.success);
    }

    #[test]
    fn parse_drops_blank_owner() {
        let reply = parse_auth_reply(
            StatusCode::OK,
            r#"{"success":true,"message":"ok","device_owner":"   "}"#,
        )
        .unwrap();
        assert_eq!(reply.device_owner, None);

        let reply = parse_auth_reply(
            StatusCode::OK,
            r#"{"success":true,"message":"ok","device_owner":" Warehouse North "}"#,
        )
        .unwrap();
        assert_eq!(reply.device_owner.as_deref(), Some("Warehouse North"));
    }

    #[tokio::test]
    async fn grant_persists_state_and_fallback_flag() {
        let prefs: Arc<dyn PreferenceStore> =
            Arc::new(Database::open_in_memory().unwrap().preference_store());
        let gate = gate_with(Arc::new(FakeAuthApi::new(granted)), prefs.clone());

        let decision = gate.check_authorization().await;
        assert_eq!(
            decision,
            AuthDecision::Authorized {
                owner_label: Some("Warehouse North".to_string()),
                degraded: false
            }
        );
        assert!(prefs.local_auth_fallback("device-1").unwrap());
        assert!(prefs.auth_state().unwrap().is_authorized);
    }

    #[tokio::test]
    async fn unreachable_with_prior_grant_degrades_to_authorized() {
        let prefs: Arc<dyn PreferenceStore> =
            Arc::new(Database::open_in_memory().unwrap().preference_store());
        prefs.set_local_auth_fallback("device-1", true).unwrap();
        prefs
            .set_auth_state(&DeviceAuthState {
                is_authorized: true,
                owner_label: Some("Warehouse North".to_string()),
                last_checked_at: Some(0),
            })
            .unwrap();

        let gate = gate_with(Arc::new(FakeAuthApi::new(unreachable)), prefs);
        let decision = gate.check_authorization().await;
        assert_eq!(
            decision,
            AuthDecision::Authorized {
                owner_label: Some("Warehouse North".to_string()),
                degraded: true
            }
        );
    }

    #[tokio::test]
    async fn unreachable_without_prior_grant_is_denied() {
        let prefs: Arc<dyn PreferenceStore> =
            Arc::new(Database::open_in_memory().unwrap().preference_store());
        let gate = gate_with(Arc::new(FakeAuthApi::new(unreachable)), prefs);

        let decision = gate.check_authorization().await;
        assert!(matches!(decision, AuthDecision::Denied { .. }));
    }

    #[tokio::test]
    async fn authoritative_denial_clears_cached_grant() {
        let prefs: Arc<dyn PreferenceStore> =
            Arc::new(Database::open_in_memory().unwrap().preference_store());
        prefs.set_local_auth_fallback("device-1", true).unwrap();

        let gate = gate_with(Arc::new(FakeAuthApi::new(revoked)), prefs.clone());
        let decision = gate.check_authorization().await;
        assert_eq!(
            decision,
            AuthDecision::Denied {
                reason: "device revoked".to_string()
            }
        );
        assert!(!prefs.local_auth_fallback("device-1").unwrap());
    }

    #[tokio::test]
    async fn registration_is_attempted_at_most_once() {
        let prefs: Arc<dyn PreferenceStore> =
            Arc::new(Database::open_in_memory().unwrap().preference_store());
        let api = Arc::new(FakeAuthApi::new(granted));
        let gate = gate_with(api.clone(), prefs.clone());

        gate.check_authorization().await;
        gate.check_authorization().await;

        // Registration failed (503) but the flag still sticks.
        assert_eq!(api.register_calls.load(Ordering::SeqCst), 1);
        assert!(prefs.registration_attempted("device-1").unwrap());

        // A fresh gate for the same install sees the persisted flag.
        let gate2 = gate_with(api.clone(), prefs);
        gate2.check_authorization().await;
        assert_eq!(api.register_calls.load(Ordering::SeqCst), 1);
    }
}
