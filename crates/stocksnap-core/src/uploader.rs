//! Artifact upload worker.
//!
//! Transfers one record's file to the backend as a multipart POST and
//! interprets the server's JSON envelope. Failure classes are kept distinct:
//! a proxy's HTML error page is a server rejection, not a parse bug.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;

use crate::models::UploadRecord;
use crate::util::{compact_text, is_http_url, looks_like_html};

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Upload failure taxonomy. Every variant leaves the record Pending; they
/// differ only in diagnostics and logging.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Invalid upload configuration: {0}")]
    InvalidConfiguration(&'static str),
    /// Timeout or unreachable host; retried on the next trigger.
    #[error("Upload HTTP request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Non-200 status, HTML error page, or an explicit `success:false`.
    #[error("Upload rejected by server (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    /// A 200 response whose body is not the expected envelope. The raw body
    /// is carried for diagnostics.
    #[error("Malformed upload response: {body}")]
    MalformedResponse { body: String },
    /// Artifact could not be read from disk.
    #[error("Failed to read artifact: {0}")]
    Io(#[from] std::io::Error),
}

/// Worker seam the orchestrator depends on.
#[async_trait]
pub trait ArtifactUploader: Send + Sync {
    /// Transfer one record's artifact at its resolved path.
    async fn upload(&self, record: &UploadRecord, path: &Path) -> Result<(), UploadError>;
}

/// HTTP multipart implementation of `ArtifactUploader`.
#[derive(Clone)]
pub struct HttpArtifactUploader {
    endpoint: String,
    client: Client,
}

impl HttpArtifactUploader {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, UploadError> {
        let endpoint = endpoint.into().trim().trim_end_matches('/').to_string();
        if endpoint.is_empty() {
            return Err(UploadError::InvalidConfiguration(
                "endpoint must not be empty",
            ));
        }
        if !is_http_url(&endpoint) {
            return Err(UploadError::InvalidConfiguration(
                "endpoint must include http:// or https://",
            ));
        }

        Ok(Self {
            endpoint,
            client: Client::builder().build()?,
        })
    }
}

#[async_trait]
impl ArtifactUploader for HttpArtifactUploader {
    async fn upload(&self, record: &UploadRecord, path: &Path) -> Result<(), UploadError> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map_or_else(|| "artifact.jpg".to_string(), |name| name.to_string_lossy().to_string());

        let form = Form::new()
            .text("customer_name", record.customer_label.clone())
            .text("uploader", record.uploaded_by.clone())
            .part(
                "file",
                Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str("image/jpeg")?,
            );

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(UPLOAD_TIMEOUT)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        interpret_upload_response(status, &body)
    }
}

#[derive(Debug, Deserialize)]
struct UploadReplyBody {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Classify the server's answer to one upload.
fn interpret_upload_response(status: StatusCode, body: &str) -> Result<(), UploadError> {
    if status != StatusCode::OK || looks_like_html(body) {
        tracing::warn!(status = status.as_u16(), "Upload rejected by server");
        return Err(UploadError::Rejected {
            status: status.as_u16(),
            message: compact_text(body),
        });
    }

    let Ok(parsed) = serde_json::from_str::<UploadReplyBody>(body) else {
        tracing::warn!(body = %compact_text(body), "Upload response was not the expected envelope");
        return Err(UploadError::MalformedResponse {
            body: compact_text(body),
        });
    };

    if parsed.success {
        Ok(())
    } else {
        let message = parsed
            .error
            .or(parsed.message)
            .unwrap_or_else(|| "server reported failure".to_string());
        tracing::warn!(%message, "Upload rejected by server");
        Err(UploadError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_validation() {
        assert!(HttpArtifactUploader::new("").is_err());
        assert!(HttpArtifactUploader::new("uploads.example.com").is_err());
        assert!(HttpArtifactUploader::new("https://uploads.example.com/api/upload/").is_ok());
    }

    #[test]
    fn success_envelope_is_ok() {
        assert!(interpret_upload_response(StatusCode::OK, r#"{"success":true}"#).is_ok());
    }

    #[test]
    fn explicit_failure_is_rejected_with_server_message() {
        let result = interpret_upload_response(
            StatusCode::OK,
            r#"{"success":false,"error":"customer unknown"}"#,
        );
        match result {
            Err(UploadError::Rejected { status: 200, message }) => {
                assert_eq!(message, "customer unknown");
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[test]
    fn non_200_is_rejected_not_malformed() {
        let result = interpret_upload_response(StatusCode::BAD_GATEWAY, "upstream down");
        assert!(matches!(
            result,
            Err(UploadError::Rejected { status: 502, .. })
        ));
    }

    #[test]
    fn html_error_page_is_rejected_not_malformed() {
        let result = interpret_upload_response(
            StatusCode::OK,
            "<!DOCTYPE html><html><body>Maintenance</body></html>",
        );
        assert!(matches!(
            result,
            Err(UploadError::Rejected { status: 200, .. })
        ));
    }

    #[test]
    fn garbage_200_body_is_malformed_with_raw_body() {
        let result = interpret_upload_response(StatusCode::OK, "yes ok done");
        match result {
            Err(UploadError::MalformedResponse { body }) => assert_eq!(body, "yes ok done"),
            other => panic!("expected MalformedResponse, got {other:?}"),
        }
    }
}
