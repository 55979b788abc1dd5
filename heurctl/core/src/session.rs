//! Session State Machine
//!
//! Tracks the lifecycle of the remote job and owns the single-in-flight
//! command guard.
//!
//! # Transitions
//!
//! ```text
//!   IDLE/STOPPED/FINISHED/ERROR ──start──► STARTING ──ack──► RUNNING
//!   RUNNING ──pause──► PAUSING ──ack──► PAUSED ──start(resume)──► STARTING
//!   RUNNING/PAUSED ──stop──► STOPPING ──ack──► STOPPED
//!   RUNNING ──finished──► FINISHED        any ──error──► ERROR
//! ```
//!
//! Every other (state, event) pair is ignored with a debug log.
//!
//! # Design Philosophy
//!
//! The session never touches the connection. It is handed a [`CommandSink`]
//! at construction and reports what happened as [`SessionSignal`]s on a
//! broadcast channel; notices, progress bars and connection indicators are
//! observers. A rejected command is a value ([`RejectReason`]), not an
//! error: nothing is sent, nothing transitions, and observers get a
//! `Rejected` signal to show.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::commands::{CommandKind, OutboundCommand, UserCommand};
use crate::messages::{InboundEvent, JobResult, ProgressReadings, ServerSnapshot};
use crate::params::JobConfig;
use crate::transport::{TransportError, TransportHandle};

/// Capacity of the signal channel
const SIGNAL_CAPACITY: usize = 64;

// ============================================================================
// State
// ============================================================================

/// Job lifecycle state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// No job has been started
    #[default]
    Idle,
    /// `start` sent, waiting for the ack
    Starting,
    /// Job is running
    Running,
    /// `pause` sent, waiting for the ack
    Pausing,
    /// Job is paused
    Paused,
    /// `stop` sent, waiting for the ack
    Stopping,
    /// Job was stopped
    Stopped,
    /// Job completed
    Finished,
    /// Server reported an error
    Error,
}

impl SessionState {
    /// States from which a fresh start is allowed
    pub fn is_resting(self) -> bool {
        matches!(self, Self::Idle | Self::Stopped | Self::Finished | Self::Error)
    }

    /// States in which a job exists on the server
    pub fn is_active(self) -> bool {
        !self.is_resting()
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "IDLE",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Pausing => "PAUSING",
            Self::Paused => "PAUSED",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Finished => "FINISHED",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Command sink
// ============================================================================

/// Where the session sends commands
///
/// Implemented by [`TransportHandle`]; tests use a recording sink.
pub trait CommandSink {
    /// Whether a sent command would reach the server
    fn is_open(&self) -> bool;

    /// Send one command
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the command could not be handed to
    /// the connection.
    fn send(&self, command: &OutboundCommand) -> Result<(), TransportError>;
}

impl CommandSink for TransportHandle {
    fn is_open(&self) -> bool {
        TransportHandle::is_open(self)
    }

    fn send(&self, command: &OutboundCommand) -> Result<(), TransportError> {
        self.send_command(command)
    }
}

// ============================================================================
// Signals
// ============================================================================

/// Why a user command was dropped
#[derive(Clone, Debug, PartialEq)]
pub enum RejectReason {
    /// Another command is still waiting for its ack
    AwaitingAck(CommandKind),
    /// The command makes no sense in the current state
    NotAllowed {
        /// Command issued
        command: UserCommand,
        /// State at the time
        state: SessionState,
    },
    /// The transport is not OPEN
    NotConnected,
    /// The job configuration failed validation
    InvalidConfig(String),
    /// The transport refused the frame
    SendFailed(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AwaitingAck(kind) => write!(f, "Still waiting for the server to confirm {kind}"),
            Self::NotAllowed { command, state } => {
                write!(f, "Cannot {command} while {}", state.to_string().to_lowercase())
            }
            Self::NotConnected => write!(f, "Not connected to server"),
            Self::InvalidConfig(reason) => write!(f, "Invalid job configuration: {reason}"),
            Self::SendFailed(reason) => write!(f, "Could not send command: {reason}"),
        }
    }
}

/// Something observers may want to show
#[derive(Clone, Debug, PartialEq)]
pub enum SessionSignal {
    /// A command was sent and is awaiting its ack
    Issued {
        /// Command sent
        command: UserCommand,
        /// Whether a `start` resumes a paused job
        resume: bool,
    },
    /// A command was dropped
    Rejected {
        /// Command issued
        command: UserCommand,
        /// Why
        reason: RejectReason,
    },
    /// The server acknowledged a command
    Acknowledged {
        /// Command acknowledged
        command: CommandKind,
        /// State entered
        state: SessionState,
    },
    /// The job completed
    Finished {
        /// Server summary, if any
        summary: Option<String>,
    },
    /// The server reported an error
    Failed {
        /// Server-supplied reason
        reason: String,
    },
    /// A progress reading changed
    ProgressChanged(ProgressReadings),
    /// State was realigned with the server after a reconnect
    Resynced {
        /// State entered
        state: SessionState,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct InFlight {
    kind: CommandKind,
    generation: u64,
}

// ============================================================================
// Session
// ============================================================================

/// The job lifecycle state machine
pub struct Session<S> {
    state: SessionState,
    in_flight: Option<InFlight>,
    generation: u64,
    progress: ProgressReadings,
    result: Option<JobResult>,
    last_error: Option<String>,
    sink: S,
    signals: broadcast::Sender<SessionSignal>,
}

impl<S: CommandSink> Session<S> {
    /// Create an idle session sending through `sink`
    pub fn new(sink: S) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self {
            state: SessionState::Idle,
            in_flight: None,
            generation: 0,
            progress: ProgressReadings::default(),
            result: None,
            last_error: None,
            sink,
            signals,
        }
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Command awaiting its ack, if any
    pub fn in_flight(&self) -> Option<CommandKind> {
        self.in_flight.map(|f| f.kind)
    }

    /// Whether the guard is set
    pub fn is_awaiting_ack(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Latest progress readings
    pub fn progress(&self) -> ProgressReadings {
        self.progress
    }

    /// Result of the last finished job
    pub fn result(&self) -> Option<&JobResult> {
        self.result.as_ref()
    }

    /// Reason of the last server error
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// The injected sink
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Subscribe to signals
    pub fn subscribe(&self) -> broadcast::Receiver<SessionSignal> {
        self.signals.subscribe()
    }

    /// Note that a new connection generation is live
    ///
    /// Commands sent on an older connection can no longer be acknowledged;
    /// the next `get_params` releases their guard.
    pub fn on_new_connection(&mut self, generation: u64) {
        self.generation = generation;
    }

    fn emit(&self, signal: SessionSignal) {
        // No receivers is fine; signals are advisory.
        let _ = self.signals.send(signal);
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "Session transition");
            self.state = next;
        }
    }

    fn reject(&self, command: UserCommand, reason: RejectReason) -> Result<(), RejectReason> {
        info!(%command, reason = %reason, "Command rejected");
        self.emit(SessionSignal::Rejected {
            command,
            reason: reason.clone(),
        });
        Err(reason)
    }

    /// Common admission checks: guard, then state, then connectivity
    fn admit(&self, command: UserCommand, allowed: bool) -> Result<(), RejectReason> {
        if let Some(flight) = self.in_flight {
            return self.reject(command, RejectReason::AwaitingAck(flight.kind));
        }
        if !allowed {
            return self.reject(
                command,
                RejectReason::NotAllowed {
                    command,
                    state: self.state,
                },
            );
        }
        if !self.sink.is_open() {
            return self.reject(command, RejectReason::NotConnected);
        }
        Ok(())
    }

    fn dispatch(
        &mut self,
        command: UserCommand,
        outbound: &OutboundCommand,
        next: SessionState,
        resume: bool,
    ) -> Result<(), RejectReason> {
        if let Err(e) = self.sink.send(outbound) {
            warn!(error = %e, %command, "Failed to send command");
            return self.reject(command, RejectReason::SendFailed(e.to_string()));
        }
        self.in_flight = Some(InFlight {
            kind: outbound.kind(),
            generation: self.generation,
        });
        self.transition(next);
        self.emit(SessionSignal::Issued { command, resume });
        Ok(())
    }

    /// User: start a job, or resume a paused one
    ///
    /// # Errors
    ///
    /// Returns the [`RejectReason`] if the command was dropped.
    pub fn start(&mut self, config: &JobConfig) -> Result<(), RejectReason> {
        let resume = self.state == SessionState::Paused;
        self.admit(UserCommand::Start, resume || self.state.is_resting())?;

        let outbound = match config.to_start_command(resume) {
            Ok(outbound) => outbound,
            Err(e) => return self.reject(UserCommand::Start, RejectReason::InvalidConfig(e.to_string())),
        };
        self.dispatch(UserCommand::Start, &outbound, SessionState::Starting, resume)?;

        if !resume {
            self.progress = ProgressReadings::default();
            self.result = None;
            self.last_error = None;
        }
        Ok(())
    }

    /// User: pause the running job
    ///
    /// # Errors
    ///
    /// Returns the [`RejectReason`] if the command was dropped.
    pub fn pause(&mut self) -> Result<(), RejectReason> {
        self.admit(UserCommand::Pause, self.state == SessionState::Running)?;
        self.dispatch(
            UserCommand::Pause,
            &OutboundCommand::Pause,
            SessionState::Pausing,
            false,
        )
    }

    /// User: stop the running or paused job
    ///
    /// # Errors
    ///
    /// Returns the [`RejectReason`] if the command was dropped.
    pub fn stop(&mut self) -> Result<(), RejectReason> {
        let allowed = matches!(self.state, SessionState::Running | SessionState::Paused);
        self.admit(UserCommand::Stop, allowed)?;
        self.dispatch(
            UserCommand::Stop,
            &OutboundCommand::Stop,
            SessionState::Stopping,
            false,
        )
    }

    fn acknowledge(&mut self, command: CommandKind, expected: SessionState, next: SessionState) -> bool {
        if self.state != expected {
            debug!(state = %self.state, ack = %command, "Ignoring ack in unexpected state");
            return false;
        }
        self.in_flight = None;
        self.transition(next);
        self.emit(SessionSignal::Acknowledged {
            command,
            state: next,
        });
        true
    }

    /// Apply one routed inbound event
    ///
    /// Returns whether anything observable changed.
    pub fn apply(&mut self, event: InboundEvent) -> bool {
        match event {
            InboundEvent::StartAck => {
                self.acknowledge(CommandKind::Start, SessionState::Starting, SessionState::Running)
            }
            InboundEvent::PauseAck => {
                self.acknowledge(CommandKind::Pause, SessionState::Pausing, SessionState::Paused)
            }
            InboundEvent::StopAck => {
                self.acknowledge(CommandKind::Stop, SessionState::Stopping, SessionState::Stopped)
            }
            InboundEvent::Progress(update) => {
                if self.state != SessionState::Running {
                    debug!(state = %self.state, "Ignoring progress outside RUNNING");
                    return false;
                }
                let changed = self.progress.apply(update);
                if changed {
                    self.emit(SessionSignal::ProgressChanged(self.progress));
                }
                changed
            }
            InboundEvent::Finished(result) => {
                if self.state != SessionState::Running {
                    debug!(state = %self.state, "Ignoring finished outside RUNNING");
                    return false;
                }
                self.in_flight = None;
                let summary = result.summary.clone();
                self.result = Some(result);
                self.transition(SessionState::Finished);
                self.emit(SessionSignal::Finished { summary });
                true
            }
            InboundEvent::Error(reason) => {
                warn!(state = %self.state, reason = %reason, "Server reported a job error");
                self.in_flight = None;
                self.last_error = Some(reason.clone());
                self.transition(SessionState::Error);
                self.emit(SessionSignal::Failed { reason });
                true
            }
            InboundEvent::GetParams(snapshot) => self.resync(&snapshot),
        }
    }

    /// Align with the server's view of the job
    ///
    /// Server flags are authoritative. A command sent on the current
    /// connection keeps its guard and pending state; its ack is still on
    /// the way.
    fn resync(&mut self, snapshot: &ServerSnapshot) -> bool {
        let mut changed = false;

        if self.progress != snapshot.progress_info {
            self.progress = snapshot.progress_info;
            self.emit(SessionSignal::ProgressChanged(self.progress));
            changed = true;
        }

        if self.in_flight.is_some_and(|f| f.generation == self.generation) {
            debug!(state = %self.state, "Command in flight on this connection, state kept");
            return changed;
        }
        self.in_flight = None;

        let next = if snapshot.is_started && snapshot.is_paused {
            SessionState::Paused
        } else if snapshot.is_started {
            SessionState::Running
        } else {
            match self.state {
                SessionState::Stopping => SessionState::Stopped,
                state if state.is_active() => SessionState::Idle,
                state => state,
            }
        };

        if next != self.state {
            self.transition(next);
            self.emit(SessionSignal::Resynced { state: next });
            changed = true;
        }
        changed
    }
}
