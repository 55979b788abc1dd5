//! Job Client
//!
//! Wires the pipeline together and runs it on one task:
//!
//! ```text
//!   Transport ──frames──► MessageRouter ──events──► Session ──signals──► NotificationCenter
//!       │                                   │
//!       │                                   └─ get_params ──► ConfigReconciler ──► ConfigStore
//!       └──link state──► get_params on each fresh connection, one notice on give-up
//!
//!   ClientInput ──► Session (start/pause/stop) ──► TransportHandle.send
//! ```
//!
//! All core logic runs on the task that calls [`JobClient::run`]; the only
//! other tasks are the transport supervisor and notice timers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::commands::{CommandKind, OutboundCommand, UserCommand};
use crate::messages::{InboundEvent, ProgressReadings};
use crate::notify::{NoticeId, NoticeLevel, NotificationCenter};
use crate::params::FnData;
use crate::reconcile::{ConfigReconciler, ConfigSnapshot};
use crate::router::MessageRouter;
use crate::session::{CommandSink, RejectReason, Session, SessionSignal, SessionState};
use crate::store::ConfigStore;
use crate::transport::{ConnectionStatus, LinkState, RawFrame, Transport, TransportHandle};

/// Requests from the front end
#[derive(Clone, Debug, PartialEq)]
pub enum ClientInput {
    /// Start/resume, pause or stop
    Command(UserCommand),
    /// Choose a catalog function by name
    SelectFunction(String),
    /// Use a user-supplied function
    SelectCustom(FnData),
    /// Enable or disable an algorithm
    SetAlgorithmEnabled {
        /// Algorithm name
        name: String,
        /// New flag
        enabled: bool,
    },
    /// Remove a notice early
    Dismiss(NoticeId),
    /// Tear everything down and return from `run`
    Shutdown,
}

/// Everything a front end needs to render
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClientStatus {
    /// Connection indicator
    pub link: LinkState,
    /// Job lifecycle state
    pub session: SessionState,
    /// Command awaiting its ack
    pub in_flight: Option<CommandKind>,
    /// Progress gauges
    pub progress: ProgressReadings,
    /// Current job configuration
    pub config: Arc<ConfigSnapshot>,
}

/// The client-side job controller
pub struct JobClient<S> {
    transport: Transport,
    router: MessageRouter,
    session: Session<TransportHandle>,
    signals: broadcast::Receiver<SessionSignal>,
    reconciler: ConfigReconciler<S>,
    notices: NotificationCenter,
    status: watch::Sender<ClientStatus>,
    generation: u64,
    loss_reported: bool,
}

impl<S: ConfigStore> JobClient<S> {
    /// Build a client around an unconnected transport
    pub fn new(transport: Transport, store: S, notice_ttl: Duration) -> Self {
        let session = Session::new(transport.handle());
        let signals = session.subscribe();
        let reconciler = ConfigReconciler::new(store);
        let (status, _) = watch::channel(ClientStatus {
            link: transport.link(),
            config: reconciler.current(),
            ..ClientStatus::default()
        });

        Self {
            transport,
            router: MessageRouter::new(),
            session,
            signals,
            reconciler,
            notices: NotificationCenter::new(notice_ttl),
            status,
            generation: 0,
            loss_reported: false,
        }
    }

    /// The session state machine
    pub fn session(&self) -> &Session<TransportHandle> {
        &self.session
    }

    /// The configuration reconciler
    pub fn reconciler(&self) -> &ConfigReconciler<S> {
        &self.reconciler
    }

    /// The notification center
    pub fn notices(&self) -> &NotificationCenter {
        &self.notices
    }

    /// The message router
    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// Subscribe to the render status
    pub fn watch_status(&self) -> watch::Receiver<ClientStatus> {
        self.status.subscribe()
    }

    /// Subscribe to session signals
    pub fn subscribe_signals(&self) -> broadcast::Receiver<SessionSignal> {
        self.session.subscribe()
    }

    /// Connect and process frames, link changes and input until shutdown
    ///
    /// Returns after [`ClientInput::Shutdown`] or when the input channel
    /// closes; the transport is closed cleanly and notice timers cancelled.
    ///
    /// # Errors
    ///
    /// Currently infallible; the signature leaves room for fatal I/O.
    pub async fn run(&mut self, mut input: mpsc::Receiver<ClientInput>) -> anyhow::Result<()> {
        self.transport.connect();
        let mut link = self.transport.watch_link();
        self.publish_status();

        loop {
            tokio::select! {
                frame = self.transport.recv() => match frame {
                    Some(frame) => self.handle_frame(&frame),
                    None => break,
                },
                changed = link.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *link.borrow_and_update();
                    self.handle_link(state);
                }
                request = input.recv() => match request {
                    None | Some(ClientInput::Shutdown) => break,
                    Some(request) => self.handle_input(request),
                },
            }
            self.publish_status();
        }

        self.shutdown().await;
        Ok(())
    }

    /// Close the transport cleanly and cancel all notice timers
    pub async fn shutdown(&mut self) {
        info!("Shutting down job client");
        self.transport.shutdown().await;
        self.notices.shutdown();
        self.publish_status();
    }

    /// Issue a user command
    ///
    /// # Errors
    ///
    /// Returns the [`RejectReason`] when the command was dropped; a notice
    /// has already been shown.
    pub fn issue(&mut self, command: UserCommand) -> Result<(), RejectReason> {
        let outcome = match command {
            UserCommand::Start => match self.reconciler.job_config() {
                Ok(config) => self.session.start(&config),
                Err(e) => {
                    let reason = RejectReason::InvalidConfig(e.to_string());
                    info!(%command, reason = %reason, "Command rejected");
                    self.notices.push(reason.to_string(), NoticeLevel::Muted);
                    Err(reason)
                }
            },
            UserCommand::Pause => self.session.pause(),
            UserCommand::Stop => self.session.stop(),
        };
        self.drain_signals();
        outcome
    }

    fn handle_input(&mut self, request: ClientInput) {
        match request {
            ClientInput::Command(command) => {
                // Rejections are already surfaced as notices.
                let _ = self.issue(command);
            }
            ClientInput::SelectFunction(name) => match self.reconciler.select_function(&name) {
                Ok(true) => {}
                Ok(false) => {
                    self.notices
                        .push(format!("Unknown function `{name}`"), NoticeLevel::Muted);
                }
                Err(e) => warn!(error = %e, "Failed to persist function selection"),
            },
            ClientInput::SelectCustom(function) => {
                if let Err(e) = self.reconciler.select_custom(function) {
                    warn!(error = %e, "Failed to persist function selection");
                }
            }
            ClientInput::SetAlgorithmEnabled { name, enabled } => {
                match self.reconciler.set_algorithm_enabled(&name, enabled) {
                    Ok(true) => {}
                    Ok(false) => {
                        self.notices
                            .push(format!("Unknown algorithm `{name}`"), NoticeLevel::Muted);
                    }
                    Err(e) => warn!(error = %e, "Failed to persist algorithm selection"),
                }
            }
            ClientInput::Dismiss(id) => {
                self.notices.dismiss(id);
            }
            ClientInput::Shutdown => {}
        }
    }

    fn handle_frame(&mut self, frame: &RawFrame) {
        // Frames can overtake the link watch; catch up first.
        self.handle_link(self.transport.link());

        let Some(event) = self.router.route(frame) else {
            return;
        };
        if let InboundEvent::GetParams(ref snapshot) = event {
            self.reconciler.reconcile(snapshot, self.generation);
        }
        self.session.apply(event);
        self.drain_signals();
    }

    fn handle_link(&mut self, state: LinkState) {
        if state.status == ConnectionStatus::Open && state.generation != self.generation {
            self.generation = state.generation;
            self.loss_reported = false;
            self.session.on_new_connection(state.generation);
            debug!(generation = state.generation, "Fresh connection, requesting parameters");
            if let Err(e) = self.session.sink().send(&OutboundCommand::GetParams) {
                warn!(error = %e, "Failed to request parameters");
            }
        }

        if self.loss_reported {
            return;
        }
        if state.gave_up {
            self.loss_reported = true;
            self.notices.connection_lost();
        } else if state.closed_by_server {
            self.loss_reported = true;
            self.notices.connection_closed();
        }
    }

    fn drain_signals(&mut self) {
        loop {
            match self.signals.try_recv() {
                Ok(signal) => {
                    self.notices.observe(&signal);
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Notice observer lagged behind session signals");
                }
                Err(_) => break,
            }
        }
    }

    fn publish_status(&self) {
        self.status.send_replace(ClientStatus {
            link: self.transport.link(),
            session: self.session.state(),
            in_flight: self.session.in_flight(),
            progress: self.session.progress(),
            config: self.reconciler.current(),
        });
    }
}
