//! Session control service boundary
//!
//! Two request/response calls: "begin session" before the stream is opened and
//! "end session" carrying the registry, which returns the analysis report.

use crate::config::SessionConfig;
use crate::error::SessionError;
use argus_core::{DetectedObject, ThreatAnalysisReport};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::Value as JsonValue;
use tracing::{debug, info};

/// Control service calls. Each call has a binary outcome.
#[async_trait]
pub trait ControlService: Send + Sync {
    async fn begin_session(&self) -> Result<(), SessionError>;

    /// Submit the registry values (order irrelevant) and receive the report.
    async fn end_session(
        &self,
        objects: Vec<DetectedObject>,
    ) -> Result<ThreatAnalysisReport, SessionError>;

    fn service_name(&self) -> &str {
        "control"
    }
}

/// HTTP control service (`POST /start-stream`, `POST /stop-stream`)
pub struct HttpControlService {
    base_url: String,
    client: Client,
    max_response_bytes: usize,
}

impl HttpControlService {
    pub fn new(config: &SessionConfig) -> Result<Self, SessionError> {
        let base_url = url::Url::parse(&config.control_url)?;
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| SessionError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            client,
            max_response_bytes: config.max_response_bytes,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn read_json(&self, response: Response, call: &str) -> Result<JsonValue, SessionError> {
        let status = response.status();
        if let Some(len) = response.content_length() {
            if len > self.max_response_bytes as u64 {
                return Err(SessionError::Control(format!(
                    "{} response too large ({} bytes, max {})",
                    call, len, self.max_response_bytes
                )));
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SessionError::Control(format!("Failed to read {} response: {}", call, e)))?;
        if bytes.len() > self.max_response_bytes {
            return Err(SessionError::Control(format!(
                "{} response too large (max {} bytes)",
                call, self.max_response_bytes
            )));
        }

        if !status.is_success() {
            const MAX_ERROR_TEXT: usize = 512;
            let text = String::from_utf8_lossy(&bytes[..bytes.len().min(MAX_ERROR_TEXT)]).to_string();
            return Err(SessionError::Control(format!("{} failed: {} - {}", call, status, text)));
        }

        if bytes.is_empty() {
            return Ok(JsonValue::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// The service reports some failures in a 200 body: `{"error": "..."}`.
fn reported_error(body: &JsonValue) -> Option<String> {
    body.get("error").map(|e| match e.as_str() {
        Some(msg) => msg.to_string(),
        None => e.to_string(),
    })
}

#[async_trait]
impl ControlService for HttpControlService {
    async fn begin_session(&self) -> Result<(), SessionError> {
        let url = self.endpoint("start-stream");
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| SessionError::Control(format!("Failed to reach control service: {}", e)))?;
        let body = self.read_json(response, "begin session").await?;

        if let Some(msg) = reported_error(&body) {
            return Err(SessionError::Control(format!("begin session rejected: {}", msg)));
        }

        info!("Control service accepted session start");
        Ok(())
    }

    async fn end_session(
        &self,
        objects: Vec<DetectedObject>,
    ) -> Result<ThreatAnalysisReport, SessionError> {
        let url = self.endpoint("stop-stream");
        debug!("POST {} with {} registry entries", url, objects.len());

        let payload = serde_json::json!({ "accumulated_objects": objects });
        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SessionError::Control(format!("Failed to reach control service: {}", e)))?;
        let body = self.read_json(response, "end session").await?;

        if let Some(msg) = reported_error(&body) {
            return Err(SessionError::Control(format!("end session rejected: {}", msg)));
        }

        let analysis = body
            .get("analysis")
            .ok_or_else(|| SessionError::Control("Missing analysis in end session response".to_string()))?;
        let report = ThreatAnalysisReport::from_value(analysis)?;

        info!("Received analysis report: threat level {}", report.threat_level);
        Ok(report)
    }

    fn service_name(&self) -> &str {
        "http"
    }
}
