//! Detection stream boundary
//!
//! A connection is opened without waiting for the handshake; the outcome
//! arrives as the first [`StreamEvent`]. The connection handle is owned by the
//! session controller alone.

use crate::config::SessionConfig;
use crate::error::SessionError;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 1024;

/// Event reported by an open stream connection
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Opened,
    /// Raw inbound payload, parsed by the aggregator
    Message(String),
    /// Inbound payload that is not text
    Undecodable(String),
    /// Closed by the remote side or dropped
    Closed { reason: Option<String> },
    /// Transport error
    Failed(String),
}

/// Handle to a single stream connection
pub struct StreamConnection {
    events: mpsc::Receiver<StreamEvent>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl StreamConnection {
    pub fn new(
        events: mpsc::Receiver<StreamEvent>,
        shutdown: oneshot::Sender<()>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            events,
            shutdown: Some(shutdown),
            task: Some(task),
        }
    }

    /// Connection fed by an in-process channel, with no background task.
    pub fn from_channel(events: mpsc::Receiver<StreamEvent>) -> Self {
        Self {
            events,
            shutdown: None,
            task: None,
        }
    }

    /// Next event in arrival order; `None` once the source is gone.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Tear down the connection without waiting for in-flight frames.
    ///
    /// No events are delivered after this call.
    pub fn close(mut self) {
        self.events.close();
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        // The reader task finishes the close handshake on its own.
        drop(self.task.take());
    }
}

/// Opens stream connections
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn open(&self) -> Result<StreamConnection, SessionError>;
}

/// WebSocket detection stream
pub struct WebSocketConnector {
    url: String,
    connect_timeout: Duration,
    close_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(config: &SessionConfig) -> Result<Self, SessionError> {
        let url = url::Url::parse(&config.stream_url)?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(SessionError::Config(format!(
                "Stream URL must use ws or wss, got {}",
                url.scheme()
            )));
        }
        Ok(Self {
            url: url.to_string(),
            connect_timeout: config.connect_timeout(),
            close_timeout: config.close_timeout(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl StreamConnector for WebSocketConnector {
    async fn open(&self) -> Result<StreamConnection, SessionError> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_reader(
            self.url.clone(),
            self.connect_timeout,
            self.close_timeout,
            tx,
            shutdown_rx,
        ));
        debug!("Opening detection stream {}", self.url);
        Ok(StreamConnection::new(rx, shutdown_tx, task))
    }
}

async fn run_reader(
    url: String,
    connect_timeout: Duration,
    close_timeout: Duration,
    tx: mpsc::Sender<StreamEvent>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let connect = tokio::select! {
        _ = &mut shutdown => return,
        result = tokio::time::timeout(connect_timeout, connect_async(url.as_str())) => result,
    };

    let mut ws = match connect {
        Ok(Ok((ws, _response))) => ws,
        Ok(Err(e)) => {
            let _ = tx.send(StreamEvent::Failed(format!("Failed to connect WebSocket: {}", e))).await;
            return;
        }
        Err(_) => {
            let _ = tx.send(StreamEvent::Failed("WebSocket connection timed out".to_string())).await;
            return;
        }
    };

    info!("Detection stream connected: {}", url);
    if tx.send(StreamEvent::Opened).await.is_err() {
        return;
    }

    loop {
        let message = tokio::select! {
            _ = &mut shutdown => {
                match tokio::time::timeout(close_timeout, ws.close(None)).await {
                    Ok(Ok(())) => debug!("WebSocket closed"),
                    Ok(Err(e)) => debug!("WebSocket close error: {}", e),
                    Err(_) => warn!("WebSocket close timed out"),
                }
                return;
            }
            message = ws.next() => message,
        };

        let event = match message {
            Some(Ok(Message::Text(text))) => StreamEvent::Message(text),
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => StreamEvent::Message(text),
                Err(e) => StreamEvent::Undecodable(format!("binary frame is not UTF-8: {}", e.utf8_error())),
            },
            Some(Ok(Message::Close(frame))) => StreamEvent::Closed {
                reason: frame.map(|f| format!("{} {}", u16::from(f.code), f.reason)),
            },
            Some(Ok(_)) => continue,
            Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                StreamEvent::Closed { reason: None }
            }
            Some(Err(WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake))) => {
                StreamEvent::Closed {
                    reason: Some("connection reset without closing handshake".to_string()),
                }
            }
            Some(Err(e)) => StreamEvent::Failed(e.to_string()),
            None => StreamEvent::Closed { reason: None },
        };

        let terminal = !matches!(event, StreamEvent::Message(_) | StreamEvent::Undecodable(_));
        if tx.send(event).await.is_err() || terminal {
            return;
        }
    }
}
