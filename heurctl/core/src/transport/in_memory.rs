//! In-Memory Transport
//!
//! A scripted [`Connector`] for running the client without a server.
//! Each connection attempt consumes one queued outcome: either a refusal or
//! an accepted connection whose far end is handed to the caller as a
//! [`ServerEnd`]. With nothing queued, attempts are refused.
//!
//! Attempt times are recorded with `tokio::time::Instant`, so tests running
//! on a paused clock can assert exact backoff intervals.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::traits::{CloseKind, Connection, Connector, TransportError, WireEvent};

enum Plan {
    Refuse,
    Accept(InMemoryConnection),
}

#[derive(Default)]
struct ConnectorInner {
    plans: VecDeque<Plan>,
    attempts: Vec<Instant>,
}

/// Scripted connector; clones share the same script
#[derive(Clone, Default)]
pub struct InMemoryConnector {
    inner: Arc<Mutex<ConnectorInner>>,
}

impl InMemoryConnector {
    /// Connector with an empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an accepted connection and return its server side
    pub fn accept_next(&self) -> ServerEnd {
        let (to_client, client_rx) = mpsc::unbounded_channel();
        let (client_tx, from_client) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let connection = InMemoryConnection {
            events: client_rx,
            outbound: client_tx,
            closed: Arc::clone(&closed),
        };
        self.inner.lock().plans.push_back(Plan::Accept(connection));

        ServerEnd {
            to_client,
            from_client,
            closed,
        }
    }

    /// Queue a refused connection attempt
    pub fn refuse_next(&self) {
        self.inner.lock().plans.push_back(Plan::Refuse);
    }

    /// When each connection attempt was made
    pub fn attempts(&self) -> Vec<Instant> {
        self.inner.lock().attempts.clone()
    }

    /// Number of connection attempts so far
    pub fn attempt_count(&self) -> usize {
        self.inner.lock().attempts.len()
    }
}

#[async_trait]
impl Connector for InMemoryConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError> {
        let plan = {
            let mut inner = self.inner.lock();
            inner.attempts.push(Instant::now());
            inner.plans.pop_front()
        };
        match plan {
            Some(Plan::Accept(connection)) => Ok(Box::new(connection)),
            Some(Plan::Refuse) | None => Err(TransportError::ConnectionFailed(format!(
                "{url}: connection refused"
            ))),
        }
    }
}

/// Client side of an in-memory connection
pub struct InMemoryConnection {
    events: mpsc::UnboundedReceiver<WireEvent>,
    outbound: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Connection for InMemoryConnection {
    async fn recv(&mut self) -> WireEvent {
        // A dropped server end looks like a lost connection.
        self.events
            .recv()
            .await
            .unwrap_or(WireEvent::Closed(CloseKind::Unclean))
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.outbound
            .send(text)
            .map_err(|_| TransportError::SendFailed("server end dropped".to_string()))
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Server side of an in-memory connection
pub struct ServerEnd {
    to_client: mpsc::UnboundedSender<WireEvent>,
    from_client: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

impl ServerEnd {
    /// Push a raw text frame to the client
    pub fn push_text(&self, text: impl Into<String>) {
        let _ = self.to_client.send(WireEvent::Text(text.into()));
    }

    /// Push a JSON frame to the client
    pub fn push_json(&self, value: &Value) {
        self.push_text(value.to_string());
    }

    /// End the connection from the server side
    pub fn close(&self, kind: CloseKind) {
        let _ = self.to_client.send(WireEvent::Closed(kind));
    }

    /// Next frame the client sent
    pub async fn next_frame(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Next frame the client sent, decoded as JSON
    pub async fn next_json(&mut self) -> Option<Value> {
        let text = self.next_frame().await?;
        serde_json::from_str(&text).ok()
    }

    /// A frame the client already sent, if any
    pub fn try_next_frame(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }

    /// Whether the client closed the connection
    pub fn closed_by_client(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
