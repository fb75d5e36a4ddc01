//! Session lifecycle states

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    Idle,
    /// Begin-session call in flight, or stream not yet open
    Starting,
    Streaming,
    /// Stream closed, end-session call in flight
    Stopping,
    /// Stream closed unexpectedly during a session
    Disconnected,
    Error,
}

impl SessionState {
    /// A transition is in flight; start/stop requests are rejected.
    pub fn is_busy(&self) -> bool {
        matches!(self, SessionState::Starting | SessionState::Stopping)
    }

    /// A session is live and owns the stream connection.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Starting | SessionState::Streaming)
    }

    /// A fresh start request is accepted from here.
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::Disconnected | SessionState::Error
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Streaming => "streaming",
            SessionState::Stopping => "stopping",
            SessionState::Disconnected => "disconnected",
            SessionState::Error => "error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
