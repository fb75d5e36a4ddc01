//! argus-session: live detection session engine
//!
//! Provides:
//! - Session lifecycle state machine sequenced against the control service
//!   and the detection stream
//! - Deduplicating, confidence-maximal registry of everything seen in a session
//! - Per-frame live threat scoring and report rendering
//! - WebSocket stream and HTTP control-service boundaries

pub mod error;
pub mod config;
pub mod state;
pub mod aggregator;
pub mod scorer;
pub mod control;
pub mod stream;
pub mod context;
pub mod controller;

pub use error::SessionError;
pub use config::{DisconnectPolicy, ReportFallback, SessionConfig};
pub use state::SessionState;
pub use aggregator::{merge, merge_into, Aggregator, Registry};
pub use scorer::{alert_banner, live_threat_level, weapon_alerts, DisplayTier, ReportView, WEAPON_THREAT_LEVEL};
pub use control::{ControlService, HttpControlService};
pub use stream::{StreamConnection, StreamConnector, StreamEvent, WebSocketConnector};
pub use context::{Effect, FrameOutcome, SessionContext};
pub use controller::{Command, FailureKind, SessionController, SessionEvent, SessionHandle};
