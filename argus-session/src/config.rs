//! Configuration for argus-session

use crate::error::SessionError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Environment variable overriding [`SessionConfig::control_url`]
pub const CONTROL_URL_ENV: &str = "ARGUS_CONTROL_URL";
/// Environment variable overriding [`SessionConfig::stream_url`]
pub const STREAM_URL_ENV: &str = "ARGUS_STREAM_URL";

/// What to do with the registry when the stream drops mid-session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectPolicy {
    /// Keep the registry as history; no end-session call, no report
    #[default]
    Discard,
    /// Submit the partial registry to the control service for analysis
    SubmitPartial,
}

/// What to show when the end-session call fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFallback {
    /// No report
    #[default]
    None,
    /// Build a local keyword-based report from the registry
    Heuristic,
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Base URL of the session control service
    pub control_url: String,
    /// WebSocket URL of the detection stream
    pub stream_url: String,
    /// Begin-session call timeout in milliseconds
    pub begin_timeout_ms: u64,
    /// End-session call timeout in milliseconds (the analysis can be slow)
    pub end_timeout_ms: u64,
    /// Stream handshake timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Time allowed for a graceful close handshake in milliseconds
    pub close_timeout_ms: u64,
    pub disconnect_policy: DisconnectPolicy,
    pub report_fallback: ReportFallback,
    /// Capacity of the observer event channel
    pub event_capacity: usize,
    /// Maximum accepted control-service response body in bytes
    pub max_response_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            control_url: "http://localhost:8000".to_string(),
            stream_url: "ws://localhost:8000/ws".to_string(),
            begin_timeout_ms: 10_000,
            end_timeout_ms: 60_000,
            connect_timeout_ms: 10_000,
            close_timeout_ms: 5_000,
            disconnect_policy: DisconnectPolicy::Discard,
            report_fallback: ReportFallback::None,
            event_capacity: 256,
            max_response_bytes: 1024 * 1024,
        }
    }
}

impl SessionConfig {
    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, SessionError> {
        toml::from_str(raw).map_err(|e| SessionError::Config(format!("Invalid config file: {}", e)))
    }

    /// Load from a TOML file, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self, SessionError> {
        let raw = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env_overrides();
        config.validate().map_err(SessionError::Config)?;
        debug!("Loaded session config from {}", path.display());
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(CONTROL_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.control_url = url.trim().to_string();
        }
        if let Some(url) = lookup(STREAM_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.stream_url = url.trim().to_string();
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        let control = Url::parse(&self.control_url)
            .map_err(|e| format!("Invalid control URL '{}': {}", self.control_url, e))?;
        if control.scheme() != "http" && control.scheme() != "https" {
            return Err("Control URL must use http or https".to_string());
        }

        let stream = Url::parse(&self.stream_url)
            .map_err(|e| format!("Invalid stream URL '{}': {}", self.stream_url, e))?;
        if stream.scheme() != "ws" && stream.scheme() != "wss" {
            return Err("Stream URL must use ws or wss".to_string());
        }

        if self.begin_timeout_ms == 0 || self.end_timeout_ms == 0 || self.connect_timeout_ms == 0 {
            return Err("Timeouts must be greater than 0".to_string());
        }

        if self.event_capacity == 0 {
            return Err("Event capacity must be greater than 0".to_string());
        }

        if self.max_response_bytes == 0 {
            return Err("Max response size must be greater than 0".to_string());
        }

        Ok(())
    }

    pub fn begin_timeout(&self) -> Duration {
        Duration::from_millis(self.begin_timeout_ms)
    }

    pub fn end_timeout(&self) -> Duration {
        Duration::from_millis(self.end_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}
