//! Reconnecting Transport
//!
//! Keeps one logical connection to the job server alive across drops.
//!
//! # Architecture
//!
//! ```text
//!            Transport (owner)                    supervisor task
//!   ┌──────────────────────────────┐      ┌─────────────────────────────┐
//!   │ connect() / shutdown()       │─────►│ connect ─► pump ─► backoff  │
//!   │ recv() ◄──── inbound frames ─┼──────┤   ▲                   │     │
//!   │ handle().send() ── outbound ─┼─────►│   └───────────────────┘     │
//!   │ watch_link() ◄── LinkState ──┼──────┤ owns the Connection         │
//!   └──────────────────────────────┘      └─────────────────────────────┘
//! ```
//!
//! Only the supervisor touches the physical connection. Every way a
//! connection can end (connect error, timeout, stream error, remote close)
//! funnels into the same `RetryState::on_close` decision; there is no
//! separate error-retry path.
//!
//! # Guarantees
//!
//! - At most one live connection per `Transport`; `connect()` is idempotent.
//! - `send` is dropped, not queued, unless the link is OPEN. Frames still
//!   buffered when a connection dies are discarded before the next attempt.
//! - `shutdown()` cancels a pending backoff sleep and closes the socket with
//!   a normal close code, so no retry is attempted.

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::commands::OutboundCommand;

use super::backoff::{RetryDecision, RetryPolicy, RetryState};
use super::config::TransportConfig;
use super::frame::{encode, RawFrame};
use super::traits::{CloseKind, Connection, ConnectionStatus, Connector, TransportError, WireEvent};

/// Inbound frame buffer between the supervisor and the consumer
const INBOUND_CAPACITY: usize = 256;

/// Observable state of the link
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkState {
    /// Coarse connectivity status
    pub status: ConnectionStatus,
    /// Reconnection attempts since the last successful open
    pub attempt: u32,
    /// Retry budget exhausted; CLOSED is terminal until `connect()` is called again
    pub gave_up: bool,
    /// Server ended the connection with a normal close; also terminal
    pub closed_by_server: bool,
    /// Number of successful opens so far; changes on every fresh connection
    pub generation: u64,
}

/// Cheap, cloneable sending side of a [`Transport`]
#[derive(Clone, Debug)]
pub struct TransportHandle {
    outbound: mpsc::UnboundedSender<String>,
    link: watch::Receiver<LinkState>,
}

impl TransportHandle {
    /// Current connectivity status
    pub fn status(&self) -> ConnectionStatus {
        self.link.borrow().status
    }

    /// Whether `send` would currently deliver
    pub fn is_open(&self) -> bool {
        self.status() == ConnectionStatus::Open
    }

    /// Hand a text frame to the live connection
    ///
    /// Returns `false` (and drops the frame) unless the link is OPEN.
    pub fn send_text(&self, text: String) -> bool {
        if !self.is_open() {
            debug!(status = %self.status(), "Link not open, dropping outbound frame");
            return false;
        }
        self.outbound.send(text).is_ok()
    }

    /// Encode and send a command
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SerializationError`] if the command cannot
    /// be encoded and [`TransportError::InvalidState`] if the link is not
    /// OPEN.
    pub fn send_command(&self, command: &OutboundCommand) -> Result<(), TransportError> {
        let text = encode(command)?;
        if self.send_text(text) {
            trace!(command = %command.kind(), "Command handed to transport");
            Ok(())
        } else {
            Err(TransportError::InvalidState("link is not open".to_string()))
        }
    }
}

/// Self-healing connection to the job server
pub struct Transport {
    config: TransportConfig,
    connector: Arc<dyn Connector>,
    link_tx: Arc<watch::Sender<LinkState>>,
    link_rx: watch::Receiver<LinkState>,
    outbound_tx: mpsc::UnboundedSender<String>,
    outbound_rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<String>>>,
    inbound_tx: mpsc::Sender<RawFrame>,
    inbound_rx: mpsc::Receiver<RawFrame>,
    shutdown_tx: Option<watch::Sender<bool>>,
    supervisor: Option<JoinHandle<()>>,
}

impl Transport {
    /// Create a transport; nothing is opened until [`connect`](Self::connect)
    pub fn new(config: TransportConfig, connector: impl Connector) -> Self {
        Self::with_connector(config, Arc::new(connector))
    }

    /// Create a transport from a shared connector
    pub fn with_connector(config: TransportConfig, connector: Arc<dyn Connector>) -> Self {
        let (link_tx, link_rx) = watch::channel(LinkState {
            status: ConnectionStatus::Closed,
            ..LinkState::default()
        });
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);

        Self {
            config,
            connector,
            link_tx: Arc::new(link_tx),
            link_rx,
            outbound_tx,
            outbound_rx: Arc::new(AsyncMutex::new(outbound_rx)),
            inbound_tx,
            inbound_rx,
            shutdown_tx: None,
            supervisor: None,
        }
    }

    /// Transport configuration
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Ensure a supervisor is running
    ///
    /// A no-op while a connection is live or being (re)established. After a
    /// clean close, a shutdown, or retry exhaustion, starts over with a fresh
    /// retry budget.
    pub fn connect(&mut self) {
        if self.supervisor.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("Transport already running, connect() ignored");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.link_tx.send_modify(|s| {
            s.status = ConnectionStatus::Connecting;
            s.attempt = 0;
            s.gave_up = false;
            s.closed_by_server = false;
        });

        let supervisor = Supervisor {
            url: self.config.url.clone(),
            timeout: self.config.connect_timeout(),
            policy: self.config.retry_policy(),
            connector: Arc::clone(&self.connector),
            link: Arc::clone(&self.link_tx),
            outbound: Arc::clone(&self.outbound_rx),
            inbound: self.inbound_tx.clone(),
            shutdown: shutdown_rx,
        };

        info!(url = %self.config.url, "Starting transport");
        self.supervisor = Some(tokio::spawn(supervisor.run()));
        self.shutdown_tx = Some(shutdown_tx);
    }

    /// Tear down: cancel any pending reconnect and close cleanly
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.supervisor.take() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Transport supervisor ended abnormally");
                }
            }
        }
        self.link_tx.send_modify(|s| s.status = ConnectionStatus::Closed);
    }

    /// Next inbound frame, in arrival order
    pub async fn recv(&mut self) -> Option<RawFrame> {
        self.inbound_rx.recv().await
    }

    /// Current link state
    pub fn link(&self) -> LinkState {
        *self.link_rx.borrow()
    }

    /// Subscribe to link state changes
    pub fn watch_link(&self) -> watch::Receiver<LinkState> {
        self.link_tx.subscribe()
    }

    /// Sending handle for injection into the session
    pub fn handle(&self) -> TransportHandle {
        TransportHandle {
            outbound: self.outbound_tx.clone(),
            link: self.link_tx.subscribe(),
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.supervisor.take() {
            handle.abort();
        }
    }
}

enum PumpExit {
    Closed(CloseKind),
    Shutdown,
}

struct Supervisor {
    url: String,
    timeout: std::time::Duration,
    policy: RetryPolicy,
    connector: Arc<dyn Connector>,
    link: Arc<watch::Sender<LinkState>>,
    outbound: Arc<AsyncMutex<mpsc::UnboundedReceiver<String>>>,
    inbound: mpsc::Sender<RawFrame>,
    shutdown: watch::Receiver<bool>,
}

impl Supervisor {
    fn publish(&self, update: impl FnOnce(&mut LinkState)) {
        self.link.send_modify(update);
    }

    async fn run(mut self) {
        let mut outbound = Arc::clone(&self.outbound).lock_owned().await;
        let mut retry = RetryState::new(self.policy);

        loop {
            // Frames buffered for a dead connection are dropped, never replayed.
            while outbound.try_recv().is_ok() {}

            let attempt = retry.attempt();
            self.publish(|s| {
                s.status = ConnectionStatus::Connecting;
                s.attempt = attempt;
            });

            let connected = tokio::select! {
                result = tokio::time::timeout(self.timeout, self.connector.connect(&self.url)) => result,
                _ = self.shutdown.changed() => {
                    self.publish(|s| s.status = ConnectionStatus::Closed);
                    return;
                }
            };

            let close = match connected {
                Ok(Ok(mut conn)) => {
                    retry.on_open();
                    self.publish(|s| {
                        s.status = ConnectionStatus::Open;
                        s.attempt = 0;
                        s.generation += 1;
                    });
                    info!(url = %self.url, "Connected to job server");

                    match self.pump(conn.as_mut(), &mut outbound).await {
                        PumpExit::Shutdown => {
                            conn.close().await;
                            self.publish(|s| s.status = ConnectionStatus::Closed);
                            info!("Transport shut down");
                            return;
                        }
                        PumpExit::Closed(kind) => {
                            info!(?kind, "Connection to job server closed");
                            kind
                        }
                    }
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "Connection attempt failed");
                    CloseKind::Unclean
                }
                Err(_) => {
                    warn!(
                        error = %TransportError::Timeout(self.timeout.as_millis() as u64),
                        "Connection attempt timed out"
                    );
                    CloseKind::Unclean
                }
            };

            self.publish(|s| s.status = ConnectionStatus::Closed);

            match retry.on_close(close) {
                RetryDecision::Reconnect { delay, attempt } => {
                    info!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Scheduling reconnect with exponential backoff"
                    );
                    self.publish(|s| s.attempt = attempt);
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        _ = self.shutdown.changed() => return,
                    }
                }
                RetryDecision::Stop => {
                    info!("Connection closed cleanly, not reconnecting");
                    self.publish(|s| s.closed_by_server = true);
                    return;
                }
                RetryDecision::Exhausted => {
                    error!(
                        max_retries = self.policy.max_retries,
                        "Reconnect budget exhausted, giving up"
                    );
                    self.publish(|s| s.gave_up = true);
                    return;
                }
            }
        }
    }

    async fn pump(
        &mut self,
        conn: &mut dyn Connection,
        outbound: &mut mpsc::UnboundedReceiver<String>,
    ) -> PumpExit {
        loop {
            tokio::select! {
                event = conn.recv() => match event {
                    WireEvent::Text(text) => {
                        trace!(len = text.len(), "Frame received");
                        let frame = RawFrame::decode(text);
                        // A full buffer must not hold off shutdown.
                        tokio::select! {
                            sent = self.inbound.send(frame) => if sent.is_err() {
                                debug!("Inbound receiver dropped");
                                return PumpExit::Shutdown;
                            },
                            _ = self.shutdown.changed() => return PumpExit::Shutdown,
                        }
                    }
                    WireEvent::Closed(kind) => return PumpExit::Closed(kind),
                },
                Some(text) = outbound.recv() => {
                    if let Err(e) = conn.send(text).await {
                        // A failed write is a closure like any other.
                        warn!(error = %e, "Write failed, closing connection");
                        return PumpExit::Closed(CloseKind::Unclean);
                    }
                }
                _ = self.shutdown.changed() => return PumpExit::Shutdown,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::in_memory::InMemoryConnector;
    use std::time::Duration;

    fn config() -> TransportConfig {
        TransportConfig::new("ws://test/ws")
            .with_max_retries(3)
            .with_initial_delay_ms(100)
    }

    #[tokio::test]
    async fn test_send_dropped_before_connect() {
        let transport = Transport::new(config(), InMemoryConnector::new());
        let handle = transport.handle();
        assert!(!handle.send_text("{}".to_string()));
        assert!(matches!(
            handle.send_command(&OutboundCommand::Pause),
            Err(TransportError::InvalidState(_))
        ));
        assert_eq!(transport.link().status, ConnectionStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_idempotent() {
        let connector = InMemoryConnector::new();
        let _server = connector.accept_next();
        let mut transport = Transport::new(config(), connector.clone());

        transport.connect();
        transport.connect();
        let mut link = transport.watch_link();
        link.wait_for(|s| s.status == ConnectionStatus::Open)
            .await
            .unwrap();
        transport.connect();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(connector.attempt_count(), 1);
        transport.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_flow_both_ways() {
        let connector = InMemoryConnector::new();
        let mut server = connector.accept_next();
        let mut transport = Transport::new(config(), connector.clone());
        transport.connect();
        transport
            .watch_link()
            .wait_for(|s| s.status == ConnectionStatus::Open)
            .await
            .unwrap();

        assert!(transport.handle().send_text(r#"{"type":"pause"}"#.to_string()));
        assert_eq!(
            server.next_frame().await.as_deref(),
            Some(r#"{"type":"pause"}"#)
        );

        server.push_text(r#"{"type":"start"}"#);
        server.push_text("garbage");
        assert!(matches!(transport.recv().await, Some(RawFrame::Structured(_))));
        assert_eq!(
            transport.recv().await,
            Some(RawFrame::Opaque("garbage".to_string()))
        );

        transport.shutdown().await;
        assert!(server.closed_by_client());
    }
}
