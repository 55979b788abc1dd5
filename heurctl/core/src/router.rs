//! Message Router
//!
//! Turns raw inbound frames into typed [`InboundEvent`]s.
//!
//! The router is the protocol-fault boundary: a frame that cannot be
//! decoded, has no discriminant, names an unknown type, or carries a payload
//! of the wrong shape becomes a [`RouteError`], which is logged and dropped
//! here. Nothing malformed ever reaches the session.
//!
//! # Frame Shapes
//!
//! ```text
//! {"type":"start"}                                           -> StartAck
//! {"type":"progress","message":{"type":"alg_progress","progress":42}}
//! {"type":"progress","message":42}                           -> alg_progress
//! {"type":"finished","message":{"result":…,"figures":…}}
//! {"type":"finished","message":"All runs complete"}          -> summary only
//! {"type":"error","message":"Invalid bounds"}
//! {"type":"get_params","message":{"algorithms":[…],…}}
//! ```

use serde_json::Value;
use thiserror::Error;
use tracing::{trace, warn};

use crate::messages::{
    clamp_percent, InboundEvent, InboundKind, JobResult, ProgressKind, ProgressUpdate,
    ServerSnapshot,
};
use crate::transport::RawFrame;

/// Reason shown when an `error` frame carries no usable message
pub const UNKNOWN_SERVER_ERROR: &str = "Unknown server error";

/// Why a frame was dropped
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RouteError {
    /// Frame is not JSON
    #[error("undecodable frame: {preview}")]
    Undecodable {
        /// Start of the offending text
        preview: String,
    },

    /// Frame has no string `type` field
    #[error("frame has no `type` discriminant")]
    MissingType,

    /// Discriminant is not a recognized inbound type
    #[error("unknown frame type `{0}`")]
    UnknownType(String),

    /// Payload does not match the discriminant
    #[error("malformed `{kind}` payload: {reason}")]
    MalformedPayload {
        /// Discriminant of the frame
        kind: InboundKind,
        /// What was wrong
        reason: String,
    },
}

fn malformed(kind: InboundKind, reason: impl Into<String>) -> RouteError {
    RouteError::MalformedPayload {
        kind,
        reason: reason.into(),
    }
}

/// Classify one frame
///
/// Pure: no logging, no counters.
///
/// # Errors
///
/// Returns a [`RouteError`] describing the protocol fault.
pub fn classify(frame: &RawFrame) -> Result<InboundEvent, RouteError> {
    let value = match frame {
        RawFrame::Structured(value) => value,
        RawFrame::Opaque(_) => {
            return Err(RouteError::Undecodable {
                preview: frame.preview(),
            })
        }
    };

    let discriminant = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(RouteError::MissingType)?;
    let kind: InboundKind = discriminant.parse().map_err(RouteError::UnknownType)?;
    let message = value.get("message").unwrap_or(&Value::Null);

    match kind {
        InboundKind::Start => Ok(InboundEvent::StartAck),
        InboundKind::Pause => Ok(InboundEvent::PauseAck),
        InboundKind::Stop => Ok(InboundEvent::StopAck),
        InboundKind::Progress => progress(message).map(InboundEvent::Progress),
        InboundKind::Finished => Ok(InboundEvent::Finished(finished(message))),
        InboundKind::Error => Ok(InboundEvent::Error(error_reason(message))),
        InboundKind::GetParams => {
            let mut snapshot: ServerSnapshot = serde_json::from_value(message.clone())
                .map_err(|e| malformed(kind, e.to_string()))?;
            snapshot.progress_info = snapshot.progress_info.clamped();
            Ok(InboundEvent::GetParams(snapshot))
        }
    }
}

fn progress(message: &Value) -> Result<ProgressUpdate, RouteError> {
    // Older servers send the algorithm gauge as a bare number.
    if let Some(value) = message.as_f64() {
        return Ok(ProgressUpdate {
            kind: ProgressKind::AlgProgress,
            value: clamp_percent(value),
        });
    }

    let subtype = message
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed(InboundKind::Progress, "missing progress subtype"))?;
    let kind = match subtype {
        "alg_progress" => ProgressKind::AlgProgress,
        "param_progress" => ProgressKind::ParamProgress,
        other => {
            return Err(malformed(
                InboundKind::Progress,
                format!("unknown progress subtype `{other}`"),
            ))
        }
    };
    let value = message
        .get("progress")
        .and_then(Value::as_f64)
        .ok_or_else(|| malformed(InboundKind::Progress, "non-numeric progress value"))?;

    Ok(ProgressUpdate {
        kind,
        value: clamp_percent(value),
    })
}

fn finished(message: &Value) -> JobResult {
    match message {
        Value::Object(fields) => JobResult {
            result: fields.get("result").cloned().unwrap_or(Value::Null),
            figures: fields.get("figures").cloned().unwrap_or(Value::Null),
            summary: fields
                .get("summary")
                .and_then(Value::as_str)
                .map(str::to_string),
        },
        Value::String(text) => JobResult {
            summary: Some(text.clone()),
            ..JobResult::default()
        },
        Value::Null => JobResult::default(),
        other => JobResult {
            result: other.clone(),
            ..JobResult::default()
        },
    }
}

fn error_reason(message: &Value) -> String {
    match message {
        Value::String(text) if !text.trim().is_empty() => text.clone(),
        Value::Object(fields) => fields
            .get("message")
            .or_else(|| fields.get("detail"))
            .and_then(Value::as_str)
            .map_or_else(|| message.to_string(), str::to_string),
        Value::Null | Value::String(_) => UNKNOWN_SERVER_ERROR.to_string(),
        other => other.to_string(),
    }
}

/// Counters kept by the router
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RouterStats {
    /// Frames turned into events
    pub routed: u64,
    /// Frames dropped as protocol faults
    pub dropped: u64,
}

/// Logging front end over [`classify`]
#[derive(Debug, Default)]
pub struct MessageRouter {
    stats: RouterStats,
}

impl MessageRouter {
    /// Create a router
    pub fn new() -> Self {
        Self::default()
    }

    /// Route one frame
    ///
    /// Protocol faults are logged at `warn` and yield `None`.
    pub fn route(&mut self, frame: &RawFrame) -> Option<InboundEvent> {
        match classify(frame) {
            Ok(event) => {
                self.stats.routed += 1;
                trace!(kind = %event.kind(), "Routed inbound frame");
                Some(event)
            }
            Err(e) => {
                self.stats.dropped += 1;
                warn!(error = %e, frame = %frame.preview(), "Dropping inbound frame");
                None
            }
        }
    }

    /// Counters so far
    pub fn stats(&self) -> RouterStats {
        self.stats
    }
}
