//! Client for the external OCR backend
//!
//! Three independent round-trips, one per pipeline stage:
//! - raw upload → server reference
//! - duplicate check → match verdict
//! - classify and parse → document type, confidence, extracted fields
//!
//! The client never retries and never caches; retry policy belongs to the
//! orchestrator (and is explicit, user-triggered).

use crate::config::BackendConfig;
use async_trait::async_trait;
use bytes::Bytes;
use intake_common::events::{DocumentType, FailureKind};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

const USER_AGENT: &str = concat!("intake-svc/", env!("CARGO_PKG_VERSION"));

/// Longest server error body kept in a message
const MAX_ERROR_BODY: usize = 300;

/// Backend call failure
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    /// Connection refused, reset, DNS or timeout
    #[error("Network error: {0}")]
    Network(String),

    /// Non-success HTTP status
    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    /// OCR could not read or classify the document
    #[error("OCR failed: {0}")]
    Ocr(String),
}

impl BackendError {
    pub fn kind(&self) -> FailureKind {
        match self {
            BackendError::Network(_) => FailureKind::Network,
            BackendError::Server { .. } => FailureKind::Server,
            BackendError::Ocr(_) => FailureKind::Ocr,
        }
    }
}

/// Everything a stage call needs to know about one file
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file_id: Uuid,
    pub file_name: String,
    pub content_type: Option<String>,
    pub content_hash: String,
    pub bytes: Bytes,
    /// Reference from an earlier raw upload, if any
    pub server_reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub server_reference: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateCheckResult {
    pub is_duplicate: bool,
    #[serde(default)]
    pub matched_document: Option<serde_json::Value>,
    #[serde(default)]
    pub similarity_score: Option<f64>,
}

impl DuplicateCheckResult {
    pub fn unique() -> Self {
        Self {
            is_duplicate: false,
            matched_document: None,
            similarity_score: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseResult {
    pub document_type: DocumentType,
    /// Backend score on a 0..100 scale
    pub confidence_score: f64,
    #[serde(default)]
    pub extracted_fields: BTreeMap<String, serde_json::Value>,
}

impl ParseResult {
    /// Confidence mapped to 0..=1; non-finite scores count as 0
    pub fn normalized_confidence(&self) -> f64 {
        if self.confidence_score.is_finite() {
            (self.confidence_score / 100.0).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Stage operations against the OCR backend
#[async_trait]
pub trait IntakeBackend: Send + Sync {
    async fn upload_raw(&self, request: &UploadRequest) -> Result<UploadReceipt, BackendError>;

    async fn check_duplicate(
        &self,
        request: &UploadRequest,
    ) -> Result<DuplicateCheckResult, BackendError>;

    async fn classify_and_parse(&self, request: &UploadRequest)
        -> Result<ParseResult, BackendError>;
}

/// HTTP implementation of [`IntakeBackend`] (multipart uploads)
pub struct HttpUploadClient {
    http_client: reqwest::Client,
    config: BackendConfig,
}

impl HttpUploadClient {
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| BackendError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            config,
        })
    }

    fn file_part(request: &UploadRequest) -> Part {
        let build = || Part::bytes(request.bytes.to_vec()).file_name(request.file_name.clone());
        let mime = request
            .content_type
            .as_deref()
            .unwrap_or("application/octet-stream");
        build().mime_str(mime).unwrap_or_else(|_| build())
    }

    fn form(request: &UploadRequest) -> Form {
        let mut form = Form::new()
            .part("file", Self::file_part(request))
            .text("file_id", request.file_id.to_string());
        if let Some(reference) = &request.server_reference {
            form = form.text("server_reference", reference.clone());
        }
        form
    }

    async fn post(&self, path: &str, form: Form, file_id: Uuid) -> Result<String, BackendError> {
        let url = self.config.endpoint(path);
        tracing::debug!(file_id = %file_id, url = %url, "Backend request");

        let response = self
            .http_client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| BackendError::Network(network_message(&e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::Network(network_message(&e)))?;

        if !status.is_success() {
            tracing::debug!(file_id = %file_id, status = status.as_u16(), "Backend returned error");
            return Err(BackendError::Server {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        Ok(body)
    }
}

#[async_trait]
impl IntakeBackend for HttpUploadClient {
    async fn upload_raw(&self, request: &UploadRequest) -> Result<UploadReceipt, BackendError> {
        let body = self
            .post(&self.config.upload_path, Self::form(request), request.file_id)
            .await?;
        serde_json::from_str(&body).map_err(|e| BackendError::Server {
            status: 200,
            message: format!("Malformed upload response: {}", e),
        })
    }

    async fn check_duplicate(
        &self,
        request: &UploadRequest,
    ) -> Result<DuplicateCheckResult, BackendError> {
        let form = Self::form(request).text("content_hash", request.content_hash.clone());
        let body = self
            .post(&self.config.duplicate_path, form, request.file_id)
            .await?;
        serde_json::from_str(&body).map_err(|e| BackendError::Server {
            status: 200,
            message: format!("Malformed duplicate-check response: {}", e),
        })
    }

    async fn classify_and_parse(
        &self,
        request: &UploadRequest,
    ) -> Result<ParseResult, BackendError> {
        let body = match self
            .post(&self.config.classify_path, Self::form(request), request.file_id)
            .await
        {
            Ok(body) => body,
            // Unprocessable document: OCR failure, not a server fault
            Err(BackendError::Server { status: 422, message }) => {
                return Err(BackendError::Ocr(message))
            }
            Err(e) => return Err(e),
        };
        parse_classify_body(&body)
    }
}

/// Interpret a classify response body
///
/// `success: false` and unreadable bodies are OCR failures.
pub fn parse_classify_body(body: &str) -> Result<ParseResult, BackendError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| BackendError::Ocr(format!("Unreadable classification response: {}", e)))?;

    if value.get("success").and_then(|s| s.as_bool()) == Some(false) {
        return Err(BackendError::Ocr(error_message(body)));
    }

    serde_json::from_value(value)
        .map_err(|e| BackendError::Ocr(format!("Incomplete classification response: {}", e)))
}

fn network_message(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("Request timed out: {}", err)
    } else if err.is_connect() {
        format!("Connection failed: {}", err)
    } else {
        err.to_string()
    }
}

/// Pull a readable message out of an error body (`detail` or `error` field)
fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["detail", "error", "message"] {
            if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
                return text.to_string();
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "No response body".to_string();
    }
    trimmed.chars().take(MAX_ERROR_BODY).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_kinds() {
        assert_eq!(BackendError::Network("x".into()).kind(), FailureKind::Network);
        assert_eq!(
            BackendError::Server {
                status: 500,
                message: "x".into()
            }
            .kind(),
            FailureKind::Server
        );
        assert_eq!(BackendError::Ocr("x".into()).kind(), FailureKind::Ocr);
    }

    #[test]
    fn test_confidence_normalization() {
        let mut result = ParseResult {
            document_type: DocumentType::Invoice,
            confidence_score: 92.0,
            extracted_fields: BTreeMap::new(),
        };
        assert!((result.normalized_confidence() - 0.92).abs() < 1e-9);

        result.confidence_score = 140.0;
        assert_eq!(result.normalized_confidence(), 1.0);

        result.confidence_score = f64::NAN;
        assert_eq!(result.normalized_confidence(), 0.0);
    }

    #[test]
    fn test_parse_classify_body() {
        let parsed = parse_classify_body(
            r#"{"document_type":"delivery_note","confidence_score":81.5,
                "extracted_fields":{"supplier":"Acme"}}"#,
        )
        .unwrap();
        assert_eq!(parsed.document_type, DocumentType::DeliveryNote);
        assert_eq!(parsed.extracted_fields["supplier"], "Acme");

        let failed = parse_classify_body(r#"{"success":false,"error":"blank page"}"#);
        assert_eq!(failed, Err(BackendError::Ocr("blank page".to_string())));

        assert!(matches!(
            parse_classify_body("<html>"),
            Err(BackendError::Ocr(_))
        ));
        assert!(matches!(
            parse_classify_body(r#"{"document_type":"invoice"}"#),
            Err(BackendError::Ocr(_))
        ));
    }

    #[test]
    fn test_duplicate_result_optional_fields() {
        let result: DuplicateCheckResult =
            serde_json::from_str(r#"{"is_duplicate":false}"#).unwrap();
        assert_eq!(result, DuplicateCheckResult::unique());
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(error_message(r#"{"detail":"File too large"}"#), "File too large");
        assert_eq!(error_message("  plain failure "), "plain failure");
        assert_eq!(error_message(""), "No response body");
        assert_eq!(error_message(&"x".repeat(1000)).len(), MAX_ERROR_BODY);
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_network_error() {
        let client = HttpUploadClient::new(BackendConfig {
            // Reserved port, nothing listens
            base_url: "http://127.0.0.1:9".to_string(),
            request_timeout_secs: 5,
            ..BackendConfig::default()
        })
        .unwrap();

        let request = UploadRequest {
            file_id: Uuid::new_v4(),
            file_name: "a.pdf".to_string(),
            content_type: Some("application/pdf".to_string()),
            content_hash: "00".to_string(),
            bytes: Bytes::from_static(b"%PDF"),
            server_reference: None,
        };

        let err = client.upload_raw(&request).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Network);
    }
}
