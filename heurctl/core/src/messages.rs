//! Inbound Messages
//!
//! Typed events received from the job server. The wire format is a loose
//! `{ "type": string, "message"?: any }` object; the router
//! ([`crate::router`]) turns each frame into exactly one [`InboundEvent`] or
//! rejects it.
//!
//! # Design Philosophy
//!
//! The discriminant string is parsed once, at the boundary, into
//! [`InboundKind`]. Everything past the router matches on closed enums, so a
//! new message type is a compile error in every consumer rather than a
//! silently unhandled string.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::params::{AlgorithmParams, FnData, ParamSpec};

/// Events from server to client
#[derive(Clone, Debug, PartialEq)]
pub enum InboundEvent {
    /// Acknowledges a `start` command; the job is running
    StartAck,
    /// Acknowledges a `pause` command; the job is paused
    PauseAck,
    /// Acknowledges a `stop` command; the job is stopped
    StopAck,
    /// One of the two progress gauges moved
    Progress(ProgressUpdate),
    /// The job completed
    Finished(JobResult),
    /// The server rejected or aborted the job
    Error(String),
    /// Server configuration and live job status
    GetParams(ServerSnapshot),
}

impl InboundEvent {
    /// Discriminant of this event
    pub fn kind(&self) -> InboundKind {
        match self {
            Self::StartAck => InboundKind::Start,
            Self::PauseAck => InboundKind::Pause,
            Self::StopAck => InboundKind::Stop,
            Self::Progress(_) => InboundKind::Progress,
            Self::Finished(_) => InboundKind::Finished,
            Self::Error(_) => InboundKind::Error,
            Self::GetParams(_) => InboundKind::GetParams,
        }
    }
}

/// Recognized inbound `type` values
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InboundKind {
    /// `start`
    Start,
    /// `pause`
    Pause,
    /// `stop`
    Stop,
    /// `progress`
    Progress,
    /// `finished`
    Finished,
    /// `error`
    Error,
    /// `get_params`
    GetParams,
}

impl InboundKind {
    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Stop => "stop",
            Self::Progress => "progress",
            Self::Finished => "finished",
            Self::Error => "error",
            Self::GetParams => "get_params",
        }
    }
}

impl FromStr for InboundKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "start" => Ok(Self::Start),
            "pause" => Ok(Self::Pause),
            "stop" => Ok(Self::Stop),
            "progress" => Ok(Self::Progress),
            "finished" => Ok(Self::Finished),
            "error" => Ok(Self::Error),
            "get_params" => Ok(Self::GetParams),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for InboundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which progress gauge a `progress` frame updates
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    /// Progress of the current algorithm run
    AlgProgress,
    /// Progress through the parameter sweep
    ParamProgress,
}

/// A single progress reading
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProgressUpdate {
    /// Gauge being updated
    pub kind: ProgressKind,
    /// Percentage, clamped to 0-100
    pub value: f64,
}

/// The two independent progress gauges
///
/// Presented as last-value gauges: a newer reading simply replaces the
/// older one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressReadings {
    /// Per-algorithm-run progress (0-100)
    #[serde(rename = "alg_progress", default)]
    pub alg: f64,
    /// Parameter-sweep progress (0-100)
    #[serde(rename = "param_progress", default)]
    pub param: f64,
}

impl ProgressReadings {
    /// Apply an update; returns whether a reading changed
    pub fn apply(&mut self, update: ProgressUpdate) -> bool {
        let slot = match update.kind {
            ProgressKind::AlgProgress => &mut self.alg,
            ProgressKind::ParamProgress => &mut self.param,
        };
        #[allow(clippy::float_cmp)]
        let changed = *slot != update.value;
        *slot = update.value;
        changed
    }

    /// Copy with both readings clamped to 0-100
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            alg: clamp_percent(self.alg),
            param: clamp_percent(self.param),
        }
    }
}

/// Clamp a percentage to 0-100, mapping NaN to 0
pub fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// Final payload of a finished job
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// Structured per-algorithm results
    #[serde(default)]
    pub result: serde_json::Value,
    /// Figures produced by the server (opaque to the client)
    #[serde(default)]
    pub figures: serde_json::Value,
    /// Human-readable summary, when the server sent one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Configuration and job status pushed by the server in `get_params`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerSnapshot {
    /// Algorithm parameter sets known to the server
    #[serde(default)]
    pub algorithms: Vec<AlgorithmParams>,
    /// Shared parameter set
    #[serde(default)]
    pub shared_params: Vec<ParamSpec>,
    /// Function catalog
    #[serde(default)]
    pub functions_data: Vec<FnData>,
    /// Live progress of the server's job
    #[serde(rename = "progressInfo", default)]
    pub progress_info: ProgressReadings,
    /// Whether the server's job is paused
    #[serde(rename = "isPaused", default)]
    pub is_paused: bool,
    /// Whether the server has a job
    #[serde(rename = "isStarted", default)]
    pub is_started: bool,
}
