//! Session context: the lifecycle state machine
//!
//! Every mutation of session state happens through one method call here, made
//! by the controller in reaction to exactly one command, stream event or
//! control-service response. Methods never perform I/O; they return the
//! [`Effect`] the controller must carry out.

use crate::aggregator::{Aggregator, Registry};
use crate::config::{DisconnectPolicy, ReportFallback, SessionConfig};
use crate::scorer::live_threat_level;
use crate::state::SessionState;
use argus_core::{DetectedObject, DetectionFrame, ThreatAnalysisReport};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// I/O the controller performs after a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Close any open stream connection, then call begin-session
    BeginSession,
    /// Open the stream connection
    OpenStream,
    /// Close the stream connection now, then call end-session with the frozen registry
    EndSession { objects: Vec<DetectedObject> },
    /// Drop the stream connection
    CloseStream,
}

/// Result of handling one inbound stream message
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Processed { live_threat_level: u8, upgraded: usize },
    /// Malformed payload, discarded
    Dropped(String),
    /// Not streaming; message ignored
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingCall {
    Begin,
    End,
}

/// Explicit per-session context owned by one controller
#[derive(Debug)]
pub struct SessionContext {
    state: SessionState,
    aggregator: Aggregator,
    live_threat_level: u8,
    report: Option<ThreatAnalysisReport>,
    report_ready: bool,
    last_failure: Option<String>,
    pending: Option<PendingCall>,
    session_id: Option<Uuid>,
    started_at: Option<DateTime<Utc>>,
    disconnect_policy: DisconnectPolicy,
    report_fallback: ReportFallback,
}

impl SessionContext {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            state: SessionState::Idle,
            aggregator: Aggregator::new(),
            live_threat_level: 0,
            report: None,
            report_ready: false,
            last_failure: None,
            pending: None,
            session_id: None,
            started_at: None,
            disconnect_policy: config.disconnect_policy,
            report_fallback: config.report_fallback,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn registry(&self) -> &Registry {
        self.aggregator.registry()
    }

    pub fn latest_frame(&self) -> Option<&DetectionFrame> {
        self.aggregator.latest()
    }

    pub fn live_threat_level(&self) -> u8 {
        self.live_threat_level
    }

    pub fn report(&self) -> Option<&ThreatAnalysisReport> {
        self.report.as_ref()
    }

    /// The scorer should switch to rendering the report.
    pub fn report_ready(&self) -> bool {
        self.report_ready
    }

    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn frames_processed(&self) -> u64 {
        self.aggregator.frames_processed()
    }

    pub fn frames_dropped(&self) -> u64 {
        self.aggregator.frames_dropped()
    }

    /// A control-service call is in flight.
    pub fn awaiting_control(&self) -> bool {
        self.pending.is_some()
    }

    /// User asked to start a session.
    pub fn request_start(&mut self) -> Option<Effect> {
        if !self.state.can_start() || self.pending.is_some() {
            warn!("Start request rejected while {}", self.state);
            return None;
        }

        self.aggregator.reset();
        self.live_threat_level = 0;
        self.report = None;
        self.report_ready = false;
        self.last_failure = None;
        self.session_id = Some(Uuid::new_v4());
        self.started_at = Some(Utc::now());
        self.pending = Some(PendingCall::Begin);
        self.state = SessionState::Starting;

        info!("Starting session {}", self.session_label());
        Some(Effect::BeginSession)
    }

    pub fn begin_succeeded(&mut self) -> Option<Effect> {
        if self.pending != Some(PendingCall::Begin) || self.state != SessionState::Starting {
            debug!("Ignoring stale begin-session response while {}", self.state);
            return None;
        }
        self.pending = None;
        Some(Effect::OpenStream)
    }

    pub fn begin_failed(&mut self, reason: &str) -> Option<Effect> {
        if self.pending != Some(PendingCall::Begin) {
            return None;
        }
        self.pending = None;
        self.fail(SessionState::Error, format!("begin session failed: {}", reason));
        None
    }

    pub fn stream_opened(&mut self) {
        if self.state == SessionState::Starting && self.pending.is_none() {
            self.state = SessionState::Streaming;
            info!("Session {} streaming", self.session_label());
        } else {
            debug!("Ignoring stream open while {}", self.state);
        }
    }

    /// Handle one inbound message. Frames are only processed while streaming.
    pub fn stream_message(&mut self, payload: &str) -> FrameOutcome {
        if self.state != SessionState::Streaming {
            debug!("Ignoring stream message while {}", self.state);
            return FrameOutcome::Ignored;
        }

        match self.aggregator.ingest_message(payload) {
            Ok(upgraded) => {
                self.live_threat_level = self.aggregator.latest().map(live_threat_level).unwrap_or(0);
                FrameOutcome::Processed {
                    live_threat_level: self.live_threat_level,
                    upgraded,
                }
            }
            Err(e) => FrameOutcome::Dropped(e.to_string()),
        }
    }

    /// Handle an inbound payload the transport could not decode.
    pub fn stream_undecodable(&mut self, reason: &str) -> FrameOutcome {
        if self.state != SessionState::Streaming {
            debug!("Ignoring undecodable stream payload while {}", self.state);
            return FrameOutcome::Ignored;
        }
        FrameOutcome::Dropped(self.aggregator.reject(reason).to_string())
    }

    /// The stream closed without a user-initiated stop.
    pub fn stream_closed(&mut self, reason: Option<&str>) -> Option<Effect> {
        if !self.state.is_active() {
            debug!("Ignoring stream close while {}", self.state);
            return None;
        }

        let was_streaming = self.state == SessionState::Streaming;
        let reason = reason.unwrap_or("no reason given");
        self.fail(
            SessionState::Disconnected,
            format!("stream closed unexpectedly: {}", reason),
        );
        self.pending = None;

        if was_streaming && self.disconnect_policy == DisconnectPolicy::SubmitPartial {
            info!(
                "Submitting partial registry ({} classes) after disconnect",
                self.registry().len()
            );
            self.pending = Some(PendingCall::End);
            return Some(Effect::EndSession { objects: self.registry().values() });
        }
        Some(Effect::CloseStream)
    }

    /// The stream reported a transport error.
    pub fn stream_failed(&mut self, reason: &str) -> Option<Effect> {
        if !self.state.is_active() {
            debug!("Ignoring stream error while {}: {}", self.state, reason);
            return None;
        }
        self.pending = None;
        self.fail(SessionState::Error, format!("stream error: {}", reason));
        Some(Effect::CloseStream)
    }

    /// User asked to stop the session.
    pub fn request_stop(&mut self) -> Option<Effect> {
        if self.state != SessionState::Streaming {
            if self.state.is_busy() {
                warn!("Stop request rejected while {}", self.state);
            } else {
                debug!("Stop request ignored while {}", self.state);
            }
            return None;
        }

        self.state = SessionState::Stopping;
        self.pending = Some(PendingCall::End);
        info!(
            "Stopping session {}: {} frames, {} classes",
            self.session_label(),
            self.frames_processed(),
            self.registry().len()
        );
        Some(Effect::EndSession { objects: self.registry().values() })
    }

    pub fn end_succeeded(&mut self, report: ThreatAnalysisReport) {
        if self.pending != Some(PendingCall::End) {
            debug!("Ignoring stale end-session response while {}", self.state);
            return;
        }
        self.pending = None;
        self.report = Some(report);
        self.report_ready = true;
        self.finish_stop();
    }

    pub fn end_failed(&mut self, reason: &str) {
        if self.pending != Some(PendingCall::End) {
            return;
        }
        self.pending = None;
        self.last_failure = Some(format!("end session failed: {}", reason));
        warn!("Session {}: end session failed: {}", self.session_label(), reason);

        if self.report_fallback == ReportFallback::Heuristic {
            info!("Using local heuristic report");
            self.report = Some(ThreatAnalysisReport::heuristic(&self.registry().values()));
            self.report_ready = true;
        }
        self.finish_stop();
    }

    // Only a user stop returns to Idle; a partial submission keeps Disconnected.
    fn finish_stop(&mut self) {
        self.aggregator.clear_latest();
        self.live_threat_level = 0;
        if self.state == SessionState::Stopping {
            self.state = SessionState::Idle;
            info!("Session {} ended", self.session_label());
        }
    }

    fn fail(&mut self, state: SessionState, message: String) {
        warn!("Session {}: {}", self.session_label(), message);
        self.state = state;
        self.aggregator.clear_latest();
        self.live_threat_level = 0;
        self.last_failure = Some(message);
    }

    fn session_label(&self) -> String {
        self.session_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string())
    }
}
