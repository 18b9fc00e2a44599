//! Adapter around the external layout-analysis service.
//!
//! The provider works asynchronously: the document is submitted once, the
//! response carries an `Operation-Location` to poll, and the final poll
//! returns pages with their lines and line polygons.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client as HttpClient, ClientBuilder, StatusCode};
use serde::Deserialize;

use crate::config::OcrConfig;
use crate::error::AppError;

const API_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const OPERATION_LOCATION: &str = "operation-location";
const USER_AGENT: &str = concat!("docvault/", env!("CARGO_PKG_VERSION"));
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Layout of a document as reported by the provider, in its own units.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzedDocument {
    #[serde(default)]
    pub pages: Vec<AnalyzedPage>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzedPage {
    pub page_number: u32,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub lines: Vec<AnalyzedLine>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzedLine {
    #[serde(default)]
    pub content: String,
    /// Alternating x, y coordinates.
    #[serde(default)]
    pub polygon: Vec<f64>,
}

#[async_trait]
pub trait OcrClient: Send + Sync {
    /// Submits one document and waits for its analysis. Not cancellable once
    /// started; dropping the future only stops waiting for it.
    async fn analyze(&self, file_name: &str, content: Vec<u8>)
        -> Result<AnalyzedDocument, AppError>;
}

/// Stand-in used when no provider is configured; every analysis fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledClient;

#[async_trait]
impl OcrClient for DisabledClient {
    async fn analyze(&self, file_name: &str, _content: Vec<u8>) -> Result<AnalyzedDocument, AppError> {
        Err(AppError::ExternalService(format!(
            "no OCR provider configured, cannot analyze {file_name}"
        )))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeOperation {
    status: String,
    #[serde(default)]
    analyze_result: Option<AnalyzedDocument>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, PartialEq)]
enum OperationState {
    Running,
    Succeeded(AnalyzedDocument),
}

fn parse_operation(body: &[u8]) -> Result<OperationState, AppError> {
    let operation: AnalyzeOperation = serde_json::from_slice(body)
        .map_err(|e| AppError::ExternalService(format!("malformed analyze response: {e}")))?;

    match operation.status.to_ascii_lowercase().as_str() {
        "notstarted" | "running" => Ok(OperationState::Running),
        "succeeded" => operation
            .analyze_result
            .map(OperationState::Succeeded)
            .ok_or_else(|| {
                AppError::ExternalService("analysis succeeded without a result".to_string())
            }),
        other => {
            let detail = operation
                .error
                .and_then(|e| e.get("message").and_then(|m| m.as_str()).map(str::to_string))
                .unwrap_or_else(|| "no details".to_string());
            Err(AppError::ExternalService(format!(
                "analysis {other}: {detail}"
            )))
        }
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| Duration::from_secs(secs).min(MAX_RETRY_AFTER))
}

/// HTTP client for a Document Intelligence compatible endpoint.
#[derive(Debug, Clone)]
pub struct DocumentIntelligenceClient {
    http_client: HttpClient,
    config: OcrConfig,
}

impl DocumentIntelligenceClient {
    pub fn new(config: OcrConfig) -> Result<Self, AppError> {
        if config.endpoint.trim().is_empty() {
            return Err(AppError::InvalidArgument(
                "OCR endpoint is not configured".to_string(),
            ));
        }
        if config.api_key.trim().is_empty() {
            return Err(AppError::InvalidArgument(
                "OCR API key is not configured".to_string(),
            ));
        }

        let http_client = ClientBuilder::new()
            .timeout(config.request_timeout())
            .connect_timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AppError::ExternalService(format!("cannot build HTTP client: {e}")))?;

        tracing::debug!(endpoint = %config.endpoint, model = %config.model_id, "OCR client created");

        Ok(Self {
            http_client,
            config,
        })
    }

    fn analyze_url(&self) -> String {
        format!(
            "{}/documentintelligence/documentModels/{}:analyze?api-version={}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model_id,
            self.config.api_version
        )
    }

    async fn submit(&self, content: Vec<u8>) -> Result<String, AppError> {
        let response = self
            .http_client
            .post(self.analyze_url())
            .header(API_KEY_HEADER, &self.config.api_key)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(content)
            .send()
            .await
            .map_err(|e| AppError::ExternalService(format!("submit failed: {e}")))?;

        let status = response.status();
        if status != StatusCode::ACCEPTED && !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalService(format!(
                "submit rejected with {status}: {message}"
            )));
        }

        response
            .headers()
            .get(OPERATION_LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                AppError::ExternalService("submit response has no Operation-Location".to_string())
            })
    }

    async fn poll(&self, operation_url: &str) -> Result<AnalyzedDocument, AppError> {
        let mut delay = self.config.poll_interval();
        loop {
            tokio::time::sleep(delay).await;

            let response = self
                .http_client
                .get(operation_url)
                .header(API_KEY_HEADER, &self.config.api_key)
                .send()
                .await
                .map_err(|e| AppError::ExternalService(format!("poll failed: {e}")))?;

            let status = response.status();
            let next_delay = retry_after(response.headers()).unwrap_or(self.config.poll_interval());
            let body = response
                .bytes()
                .await
                .map_err(|e| AppError::ExternalService(format!("poll body unreadable: {e}")))?;

            if !status.is_success() {
                return Err(AppError::ExternalService(format!(
                    "poll rejected with {status}: {}",
                    String::from_utf8_lossy(&body)
                )));
            }

            match parse_operation(&body)? {
                OperationState::Succeeded(document) => return Ok(document),
                OperationState::Running => delay = next_delay,
            }
        }
    }
}

#[async_trait]
impl OcrClient for DocumentIntelligenceClient {
    async fn analyze(
        &self,
        file_name: &str,
        content: Vec<u8>,
    ) -> Result<AnalyzedDocument, AppError> {
        let size = content.len();
        tracing::info!(file = file_name, bytes = size, "submitting document for OCR");

        let operation_url = self.submit(content).await?;
        let document = self.poll(&operation_url).await?;

        tracing::info!(
            file = file_name,
            pages = document.pages.len(),
            "OCR analysis finished"
        );
        Ok(document)
    }
}
