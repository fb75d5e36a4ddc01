//! Error types for argus-session

use argus_core::Error as CoreError;
use thiserror::Error;

/// Session errors, grouped by the boundary that produced them
#[derive(Error, Debug)]
pub enum SessionError {
    /// Stream failed to open, dropped or errored mid-session
    #[error("Transport error: {0}")]
    Transport(String),

    /// Inbound message could not be parsed as a detection frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Begin/end session call returned non-success or was unreachable
    #[error("Control service error: {0}")]
    Control(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Command sent after the controller loop ended
    #[error("Session controller stopped")]
    ControllerStopped,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    /// Control-service response body is not JSON
    #[error("Invalid response JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),
}
