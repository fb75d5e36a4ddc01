// Shared fixtures for argus-session integration tests

#![allow(dead_code)]

use argus_core::{DetectedObject, ThreatAnalysisReport, ThreatLevel};
use argus_session::{
    ControlService, SessionError, SessionEvent, SessionState, StreamConnection, StreamConnector,
    StreamEvent,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Notify};

pub const WAIT: Duration = Duration::from_secs(5);

/// Control service with scripted outcomes
pub struct ScriptedControl {
    begin_gate: Option<Arc<Notify>>,
    end_gate: Option<Arc<Notify>>,
    begin_error: Option<String>,
    end_error: Option<String>,
    report: ThreatAnalysisReport,
    begin_calls: AtomicUsize,
    end_calls: AtomicUsize,
    submitted: Mutex<Option<Vec<DetectedObject>>>,
}

impl ScriptedControl {
    pub fn accepting() -> Self {
        Self {
            begin_gate: None,
            end_gate: None,
            begin_error: None,
            end_error: None,
            report: sample_report(),
            begin_calls: AtomicUsize::new(0),
            end_calls: AtomicUsize::new(0),
            submitted: Mutex::new(None),
        }
    }

    /// Begin session blocks until the gate is notified.
    pub fn with_begin_gate(mut self, gate: Arc<Notify>) -> Self {
        self.begin_gate = Some(gate);
        self
    }

    /// End session blocks until the gate is notified.
    pub fn with_end_gate(mut self, gate: Arc<Notify>) -> Self {
        self.end_gate = Some(gate);
        self
    }

    pub fn failing_begin(mut self, message: &str) -> Self {
        self.begin_error = Some(message.to_string());
        self
    }

    pub fn failing_end(mut self, message: &str) -> Self {
        self.end_error = Some(message.to_string());
        self
    }

    pub fn begin_calls(&self) -> usize {
        self.begin_calls.load(Ordering::SeqCst)
    }

    pub fn end_calls(&self) -> usize {
        self.end_calls.load(Ordering::SeqCst)
    }

    /// Last end-session payload, sorted by class name.
    pub fn submitted(&self) -> Option<Vec<DetectedObject>> {
        self.submitted.lock().clone().map(|mut objects| {
            objects.sort_by(|a, b| a.class_key().cmp(&b.class_key()));
            objects
        })
    }
}

#[async_trait]
impl ControlService for ScriptedControl {
    async fn begin_session(&self) -> Result<(), SessionError> {
        self.begin_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.begin_gate {
            gate.notified().await;
        }
        match &self.begin_error {
            Some(message) => Err(SessionError::Control(message.clone())),
            None => Ok(()),
        }
    }

    async fn end_session(
        &self,
        objects: Vec<DetectedObject>,
    ) -> Result<ThreatAnalysisReport, SessionError> {
        self.end_calls.fetch_add(1, Ordering::SeqCst);
        *self.submitted.lock() = Some(objects);
        if let Some(gate) = &self.end_gate {
            gate.notified().await;
        }
        match &self.end_error {
            Some(message) => Err(SessionError::Control(message.clone())),
            None => Ok(self.report.clone()),
        }
    }

    fn service_name(&self) -> &str {
        "scripted"
    }
}

/// Connector handing out one pre-built in-process stream.
pub struct ChannelConnector {
    receiver: Mutex<Option<mpsc::Receiver<StreamEvent>>>,
    open_calls: AtomicUsize,
}

impl ChannelConnector {
    pub fn new() -> (Self, mpsc::Sender<StreamEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let connector = Self {
            receiver: Mutex::new(Some(rx)),
            open_calls: AtomicUsize::new(0),
        };
        (connector, tx)
    }

    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamConnector for ChannelConnector {
    async fn open(&self) -> Result<StreamConnection, SessionError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        self.receiver
            .lock()
            .take()
            .map(StreamConnection::from_channel)
            .ok_or_else(|| SessionError::Transport("stream already opened".to_string()))
    }
}

pub fn sample_report() -> ThreatAnalysisReport {
    ThreatAnalysisReport {
        threat_level: ThreatLevel::High,
        threat_percentage: 85.0,
        flagged_content: "Knife observed".to_string(),
        detected_keywords: vec!["knife".to_string()],
        summary: "Weapon present during session".to_string(),
        recommendations: vec!["Alert security".to_string()],
        ..Default::default()
    }
}

pub fn frame_json(objects: &[(&str, f64)]) -> String {
    let objects: Vec<serde_json::Value> = objects
        .iter()
        .map(|(name, conf)| {
            serde_json::json!({
                "class_name": name,
                "confidence": conf,
                "bbox": [10.0, 20.0, 110.0, 220.0],
            })
        })
        .collect();
    serde_json::json!({
        "objects": objects,
        "timestamp": "2024-05-01T12:00:00Z",
        "frame_width": 640,
        "frame_height": 480,
    })
    .to_string()
}

pub async fn next_event(events: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event channel closed")
}

/// Consume events until the session enters `state`.
pub async fn wait_for_state(events: &mut broadcast::Receiver<SessionEvent>, state: SessionState) {
    loop {
        if let SessionEvent::StateChanged { to, .. } = next_event(events).await {
            if to == state {
                return;
            }
        }
    }
}

/// Consume events until `count` frames have been processed.
pub async fn wait_for_frames(events: &mut broadcast::Receiver<SessionEvent>, count: usize) {
    let mut seen = 0;
    while seen < count {
        if let SessionEvent::FrameProcessed { .. } = next_event(events).await {
            seen += 1;
        }
    }
}
