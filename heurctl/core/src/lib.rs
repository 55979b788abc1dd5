//! heurctl Core - Job Control for Remote Heuristic-Optimization Batches
//!
//! This crate is the client-side connection and session-control layer for a
//! long-running remote optimization job: start it, pause/resume it, stop it,
//! watch its two progress gauges and receive its result. It has no terminal
//! or rendering dependencies; front ends only feed it input and render the
//! status it publishes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Front end (CLI)                          │
//! │        ClientInput (down)                 ClientStatus / notices (up)
//! └──────────────┬──────────────────────────────────────▲────────────┘
//!                │                                      │
//! ┌──────────────┼──────────────────────────────────────┼────────────┐
//! │              ▼               JobClient               │            │
//! │  ┌────────────────┐   ┌──────────────┐   ┌──────────────────────┐│
//! │  │    Session     │◄──│MessageRouter │   │ NotificationCenter   ││
//! │  │ (state + guard)│   └──────▲───────┘   │ (auto-expiring)      ││
//! │  └───────┬────────┘          │           └──────────▲───────────┘│
//! │          │ send        frames│          signals     │            │
//! │  ┌───────▼──────────────────┴──┐   ┌────────────────┴──────────┐ │
//! │  │   Transport (reconnecting)  │   │ ConfigReconciler + Store  │ │
//! │  └─────────────────────────────┘   └───────────────────────────┘ │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Transport`]: self-healing connection with bounded exponential backoff
//! - [`MessageRouter`]: raw frames to typed [`InboundEvent`]s
//! - [`Session`]: job lifecycle state machine with a single-in-flight guard
//! - [`ConfigReconciler`]: server configuration vs. the persisted cache
//! - [`NotificationCenter`]: short-lived user notices
//! - [`JobClient`]: wires all of the above onto one task
//!
//! # Quick Start
//!
//! ```ignore
//! use heurctl_core::{
//!     ClientInput, FileConfigStore, JobClient, Transport, TransportConfig, UserCommand,
//!     WebSocketConnector, NOTICE_TTL,
//! };
//! use tokio::sync::mpsc;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = Transport::new(TransportConfig::default(), WebSocketConnector);
//!     let store = FileConfigStore::new("/tmp/heurctl-cache");
//!     let mut client = JobClient::new(transport, store, NOTICE_TTL);
//!
//!     let (tx, rx) = mpsc::channel(16);
//!     tx.send(ClientInput::Command(UserCommand::Start)).await?;
//!     client.run(rx).await
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`transport`]: connection lifecycle, backoff, websocket and in-memory wires
//! - [`router`]: frame classification and protocol-fault handling
//! - [`messages`]: inbound event types
//! - [`commands`]: outbound command types
//! - [`params`]: job configuration data model
//! - [`session`]: job lifecycle state machine
//! - [`store`]: persisted configuration cache
//! - [`reconcile`]: cache vs. server configuration
//! - [`notify`]: notices and their expiry timers
//! - [`client`]: the wiring loop
//! - [`config`]: TOML/env/CLI configuration loading

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod commands;
pub mod config;
pub mod messages;
pub mod notify;
pub mod params;
pub mod reconcile;
pub mod router;
pub mod session;
pub mod store;
pub mod transport;

// Re-exports for convenience
pub use client::{ClientInput, ClientStatus, JobClient};
pub use commands::{AlgorithmRun, CommandKind, OutboundCommand, StartPayload, UserCommand};
pub use messages::{
    InboundEvent, InboundKind, JobResult, ProgressKind, ProgressReadings, ProgressUpdate,
    ServerSnapshot,
};
pub use notify::{Notice, NoticeEvent, NoticeId, NoticeLevel, NotificationCenter, NOTICE_TTL};
pub use params::{AlgorithmParams, FnData, JobConfig, NumKind, ParamError, ParamSpec};
pub use reconcile::{ConfigReconciler, ConfigSnapshot, Origin, Reconciliation};
pub use router::{classify, MessageRouter, RouteError, RouterStats};
pub use session::{CommandSink, RejectReason, Session, SessionSignal, SessionState};
pub use store::{ConfigStore, FileConfigStore, MemoryConfigStore, StoreError};
pub use transport::{
    CloseKind, ConnectionStatus, Connector, InMemoryConnector, LinkState, RawFrame, ServerEnd,
    Transport, TransportConfig, TransportError, TransportHandle,
};

#[cfg(feature = "websocket")]
pub use transport::WebSocketConnector;

// Config exports
pub use config::{
    default_cache_dir, default_config_path, load_config, load_config_from_path, ClientConfigFile,
    ConfigError, ConfigOverrides, ConfigSource, HeurctlToml,
};
