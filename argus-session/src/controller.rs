//! Session lifecycle controller
//!
//! Runs a single event loop over user commands, stream events and the one
//! in-flight control-service call. Each reaction runs to completion before the
//! next event is polled, so state, registry and latest frame are never mutated
//! concurrently. The stream connection handle is owned here and nowhere else.

use crate::config::SessionConfig;
use crate::context::{Effect, FrameOutcome, SessionContext};
use crate::control::{ControlService, HttpControlService};
use crate::error::SessionError;
use crate::scorer::weapon_alerts;
use crate::state::SessionState;
use crate::stream::{StreamConnection, StreamConnector, StreamEvent, WebSocketConnector};
use argus_core::{DetectedObject, DetectionFrame, ThreatAnalysisReport};
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const COMMAND_BUFFER: usize = 32;

/// User intent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    /// Close everything and end the event loop
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transport,
    Control,
}

/// Published to observers after each reaction
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    FrameProcessed {
        frame: DetectionFrame,
        live_threat_level: u8,
        weapon_alerts: Vec<DetectedObject>,
        registry_size: usize,
    },
    FrameDropped {
        reason: String,
    },
    ReportReady(ThreatAnalysisReport),
    Failure {
        kind: FailureKind,
        message: String,
    },
}

#[derive(Debug)]
enum CallOutcome {
    Begin(Result<(), SessionError>),
    End(Result<ThreatAnalysisReport, SessionError>),
}

pub struct SessionController {
    ctx: SessionContext,
    config: SessionConfig,
    control: Arc<dyn ControlService>,
    connector: Arc<dyn StreamConnector>,
    connection: Option<StreamConnection>,
    pending: Option<BoxFuture<'static, CallOutcome>>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        control: Arc<dyn ControlService>,
        connector: Arc<dyn StreamConnector>,
    ) -> Result<Self, SessionError> {
        config.validate().map_err(SessionError::Config)?;
        let (events, _) = broadcast::channel(config.event_capacity);
        Ok(Self {
            ctx: SessionContext::new(&config),
            config,
            control,
            connector,
            connection: None,
            pending: None,
            events,
        })
    }

    /// Controller wired to the HTTP control service and WebSocket stream.
    pub fn from_config(config: SessionConfig) -> Result<Self, SessionError> {
        let control = Arc::new(HttpControlService::new(&config)?);
        let connector = Arc::new(WebSocketConnector::new(&config)?);
        Self::new(config, control, connector)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn state(&self) -> SessionState {
        self.ctx.state()
    }

    /// Run the event loop on a task. The task yields the final context.
    pub fn spawn(self) -> (SessionHandle, JoinHandle<SessionContext>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let handle = SessionHandle {
            commands: tx,
            events: self.events.clone(),
        };
        let task = tokio::spawn(self.run(rx));
        (handle, task)
    }

    /// Process commands until `Shutdown` or all senders are dropped.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> SessionContext {
        info!(
            "Session controller running (control: {})",
            self.control.service_name()
        );

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Start) => self.handle_start(),
                    Some(Command::Stop) => self.handle_stop(),
                    Some(Command::Shutdown) | None => break,
                },
                event = next_stream_event(&mut self.connection) => self.handle_stream_event(event),
                outcome = next_outcome(&mut self.pending) => self.handle_outcome(outcome).await,
            }
        }

        self.close_connection();
        if self.pending.take().is_some() {
            warn!("Shutting down with a control-service call in flight");
        }
        info!("Session controller stopped in state {}", self.ctx.state());
        self.ctx
    }

    fn handle_start(&mut self) {
        let before = self.ctx.state();
        if let Some(Effect::BeginSession) = self.ctx.request_start() {
            if self.connection.is_some() {
                warn!("Closing previous stream connection before starting");
                self.close_connection();
            }
            let control = Arc::clone(&self.control);
            let timeout = self.config.begin_timeout();
            self.pending = Some(Box::pin(async move {
                CallOutcome::Begin(with_timeout(timeout, "begin session", control.begin_session()).await)
            }));
        }
        self.publish_transition(before);
    }

    fn handle_stop(&mut self) {
        let before = self.ctx.state();
        if let Some(Effect::EndSession { objects }) = self.ctx.request_stop() {
            // Tear the socket down first; in-flight frames are abandoned.
            self.close_connection();
            self.submit_end(objects);
        }
        self.publish_transition(before);
    }

    fn handle_stream_event(&mut self, event: StreamEvent) {
        let before = self.ctx.state();
        let mut extra = Vec::new();

        match event {
            StreamEvent::Opened => self.ctx.stream_opened(),
            StreamEvent::Message(payload) => match self.ctx.stream_message(&payload) {
                FrameOutcome::Processed { live_threat_level, .. } => {
                    if let Some(frame) = self.ctx.latest_frame() {
                        extra.push(SessionEvent::FrameProcessed {
                            weapon_alerts: weapon_alerts(frame).into_iter().cloned().collect(),
                            frame: frame.clone(),
                            live_threat_level,
                            registry_size: self.ctx.registry().len(),
                        });
                    }
                }
                FrameOutcome::Dropped(reason) => extra.push(SessionEvent::FrameDropped { reason }),
                FrameOutcome::Ignored => {}
            },
            StreamEvent::Undecodable(reason) => {
                if let FrameOutcome::Dropped(reason) = self.ctx.stream_undecodable(&reason) {
                    extra.push(SessionEvent::FrameDropped { reason });
                }
            }
            StreamEvent::Closed { reason } => {
                let effect = self.ctx.stream_closed(reason.as_deref());
                self.close_connection();
                if effect.is_some() {
                    extra.push(self.failure(FailureKind::Transport));
                }
                if let Some(Effect::EndSession { objects }) = effect {
                    self.submit_end(objects);
                }
            }
            StreamEvent::Failed(reason) => {
                let effect = self.ctx.stream_failed(&reason);
                self.close_connection();
                if effect.is_some() {
                    extra.push(self.failure(FailureKind::Transport));
                }
            }
        }

        self.publish_transition(before);
        for event in extra {
            self.publish(event);
        }
    }

    async fn handle_outcome(&mut self, outcome: CallOutcome) {
        let before = self.ctx.state();
        let mut extra = Vec::new();

        match outcome {
            CallOutcome::Begin(Ok(())) => {
                if let Some(Effect::OpenStream) = self.ctx.begin_succeeded() {
                    self.close_connection();
                    match self.connector.open().await {
                        Ok(connection) => self.connection = Some(connection),
                        Err(e) => {
                            self.ctx.stream_failed(&e.to_string());
                            extra.push(self.failure(FailureKind::Transport));
                        }
                    }
                }
            }
            CallOutcome::Begin(Err(e)) => {
                self.ctx.begin_failed(&e.to_string());
                extra.push(self.failure(FailureKind::Control));
            }
            CallOutcome::End(Ok(report)) => {
                self.ctx.end_succeeded(report);
                if let Some(report) = self.ctx.report().filter(|_| self.ctx.report_ready()) {
                    extra.push(SessionEvent::ReportReady(report.clone()));
                }
            }
            CallOutcome::End(Err(e)) => {
                self.ctx.end_failed(&e.to_string());
                extra.push(self.failure(FailureKind::Control));
                if let Some(report) = self.ctx.report().filter(|_| self.ctx.report_ready()) {
                    extra.push(SessionEvent::ReportReady(report.clone()));
                }
            }
        }

        self.publish_transition(before);
        for event in extra {
            self.publish(event);
        }
    }

    fn submit_end(&mut self, objects: Vec<DetectedObject>) {
        let control = Arc::clone(&self.control);
        let timeout = self.config.end_timeout();
        debug!("Submitting {} registry entries", objects.len());
        self.pending = Some(Box::pin(async move {
            CallOutcome::End(with_timeout(timeout, "end session", control.end_session(objects)).await)
        }));
    }

    fn close_connection(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
            debug!("Stream connection closed");
        }
    }

    fn failure(&self, kind: FailureKind) -> SessionEvent {
        SessionEvent::Failure {
            kind,
            message: self.ctx.last_failure().unwrap_or("unknown failure").to_string(),
        }
    }

    fn publish_transition(&self, before: SessionState) {
        let after = self.ctx.state();
        if before != after {
            self.publish(SessionEvent::StateChanged { from: before, to: after });
        }
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Cloneable command sender for a spawned controller
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    pub async fn start(&self) -> Result<(), SessionError> {
        self.send(Command::Start).await
    }

    pub async fn stop(&self) -> Result<(), SessionError> {
        self.send(Command::Stop).await
    }

    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.send(Command::Shutdown).await
    }

    pub async fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::ControllerStopped)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

async fn with_timeout<T, F>(timeout: Duration, call: &'static str, fut: F) -> Result<T, SessionError>
where
    F: Future<Output = Result<T, SessionError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(SessionError::Timeout(format!(
            "{} after {}ms",
            call,
            timeout.as_millis()
        ))),
    }
}

// Pending forever when there is no connection, so the select! branch idles.
async fn next_stream_event(connection: &mut Option<StreamConnection>) -> StreamEvent {
    match connection {
        Some(connection) => connection
            .next_event()
            .await
            .unwrap_or(StreamEvent::Closed { reason: None }),
        None => std::future::pending().await,
    }
}

async fn next_outcome(pending: &mut Option<BoxFuture<'static, CallOutcome>>) -> CallOutcome {
    match pending {
        Some(fut) => {
            let outcome = fut.await;
            *pending = None;
            outcome
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct RefusingControl;

    #[async_trait]
    impl ControlService for RefusingControl {
        async fn begin_session(&self) -> Result<(), SessionError> {
            Err(SessionError::Control("Could not open camera".to_string()))
        }

        async fn end_session(
            &self,
            _objects: Vec<DetectedObject>,
        ) -> Result<ThreatAnalysisReport, SessionError> {
            Err(SessionError::Control("unreachable".to_string()))
        }
    }

    struct NoStream;

    #[async_trait]
    impl StreamConnector for NoStream {
        async fn open(&self) -> Result<StreamConnection, SessionError> {
            Err(SessionError::Transport("no stream".to_string()))
        }
    }

    #[test]
    fn test_idle_branches_stay_pending() {
        let mut connection = None;
        let mut event = tokio_test::task::spawn(next_stream_event(&mut connection));
        tokio_test::assert_pending!(event.poll());

        let mut pending = None;
        let mut outcome = tokio_test::task::spawn(next_outcome(&mut pending));
        tokio_test::assert_pending!(outcome.poll());
    }

    #[test]
    fn test_closed_source_reads_as_close() {
        let (tx, rx) = mpsc::channel(1);
        drop(tx);
        let mut connection = Some(StreamConnection::from_channel(rx));
        let event = tokio_test::block_on(next_stream_event(&mut connection));
        assert_eq!(event, StreamEvent::Closed { reason: None });
    }

    #[test]
    fn test_controller_rejects_invalid_config() {
        let config = SessionConfig { event_capacity: 0, ..Default::default() };
        assert!(SessionController::new(config, Arc::new(RefusingControl), Arc::new(NoStream)).is_err());
    }

    #[tokio::test]
    async fn test_begin_failure_reaches_error_state() {
        let controller =
            SessionController::new(SessionConfig::default(), Arc::new(RefusingControl), Arc::new(NoStream))
                .unwrap();
        let mut events = controller.subscribe();
        let (handle, task) = controller.spawn();

        handle.start().await.unwrap();

        let mut states = Vec::new();
        let mut failure = None;
        while failure.is_none() {
            match events.recv().await.unwrap() {
                SessionEvent::StateChanged { to, .. } => states.push(to),
                SessionEvent::Failure { kind, message } => failure = Some((kind, message)),
                _ => {}
            }
        }

        assert_eq!(states, vec![SessionState::Starting, SessionState::Error]);
        let (kind, message) = failure.unwrap();
        assert_eq!(kind, FailureKind::Control);
        assert!(message.contains("Could not open camera"));

        handle.shutdown().await.unwrap();
        let ctx = task.await.unwrap();
        assert_eq!(ctx.state(), SessionState::Error);
    }

    #[tokio::test]
    async fn test_stream_open_failure_reaches_error_state() {
        struct AcceptingControl;

        #[async_trait]
        impl ControlService for AcceptingControl {
            async fn begin_session(&self) -> Result<(), SessionError> {
                Ok(())
            }

            async fn end_session(
                &self,
                _objects: Vec<DetectedObject>,
            ) -> Result<ThreatAnalysisReport, SessionError> {
                Ok(ThreatAnalysisReport::default())
            }
        }

        let controller =
            SessionController::new(SessionConfig::default(), Arc::new(AcceptingControl), Arc::new(NoStream))
                .unwrap();
        let (handle, task) = controller.spawn();
        let mut events = handle.subscribe();
        handle.start().await.unwrap();

        loop {
            if let SessionEvent::Failure { kind, .. } = events.recv().await.unwrap() {
                assert_eq!(kind, FailureKind::Transport);
                break;
            }
        }

        handle.shutdown().await.unwrap();
        assert_eq!(task.await.unwrap().state(), SessionState::Error);
    }

    #[tokio::test]
    async fn test_dropping_handle_ends_loop() {
        let controller =
            SessionController::new(SessionConfig::default(), Arc::new(RefusingControl), Arc::new(NoStream))
                .unwrap();
        let (handle, task) = controller.spawn();
        drop(handle);
        assert_eq!(task.await.unwrap().state(), SessionState::Idle);
    }
}
