//! Transport Layer
//!
//! One logical, self-healing connection to the job server.
//!
//! - [`Transport`]: owns the connection lifecycle and reconnects with bounded
//!   exponential backoff after unclean closes
//! - [`Connector`] / [`Connection`]: the seam between lifecycle and wire
//! - [`WebSocketConnector`]: the production wire (feature `websocket`)
//! - [`InMemoryConnector`]: a scripted wire for tests and embedding
//!
//! # Design Philosophy
//!
//! The transport moves text frames and reports connectivity. It does not
//! know what a frame means: decoding stops at "is this JSON", and command
//! semantics live in the session layer.

pub mod backoff;
pub mod config;
pub mod frame;
pub mod in_memory;
pub mod reconnect;
pub mod traits;
#[cfg(feature = "websocket")]
pub mod websocket;

// Re-exports for convenience
pub use backoff::{RetryDecision, RetryPolicy, RetryState};
pub use config::{TransportConfig, DEFAULT_URL};
pub use frame::{encode, RawFrame};
pub use in_memory::{InMemoryConnection, InMemoryConnector, ServerEnd};
pub use reconnect::{LinkState, Transport, TransportHandle};
pub use traits::{CloseKind, Connection, ConnectionStatus, Connector, TransportError, WireEvent};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnector;
