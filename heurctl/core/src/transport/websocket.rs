//! WebSocket Transport
//!
//! [`Connector`] implementation over `tokio-tungstenite`.
//!
//! A close is clean when the server completes the close handshake with a
//! normal close code (or no code at all). "Going away" and every other code
//! count as unclean so the client reconnects after a server restart.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use super::traits::{CloseKind, Connection, Connector, TransportError, WireEvent};

/// Opens websocket connections
#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError> {
        let (stream, response) = connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        debug!(status = %response.status(), "WebSocket handshake complete");
        Ok(Box::new(WebSocketConnection { stream }))
    }
}

struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

fn close_kind(frame: Option<&CloseFrame<'_>>) -> CloseKind {
    match frame {
        None => CloseKind::Clean,
        Some(frame) if frame.code == CloseCode::Normal => CloseKind::Clean,
        Some(frame) => {
            debug!(code = u16::from(frame.code), reason = %frame.reason, "Abnormal close code");
            CloseKind::Unclean
        }
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn recv(&mut self) -> WireEvent {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return WireEvent::Text(text),
                Some(Ok(Message::Binary(bytes))) => {
                    return WireEvent::Text(String::from_utf8_lossy(&bytes).into_owned());
                }
                Some(Ok(Message::Close(frame))) => {
                    return WireEvent::Closed(close_kind(frame.as_ref()));
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket stream error");
                    return WireEvent::Closed(CloseKind::Unclean);
                }
                None => return WireEvent::Closed(CloseKind::Unclean),
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "client shutdown".into(),
        };
        if let Err(e) = self.stream.close(Some(frame)).await {
            debug!(error = %e, "Close handshake failed");
        }
    }
}
