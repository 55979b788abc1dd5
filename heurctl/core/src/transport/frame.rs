//! Frame Decoding
//!
//! The transport does not interpret frames; it only attempts a structured
//! JSON decode so the router does not have to re-parse. Text that is not
//! valid JSON is passed through as [`RawFrame::Opaque`] rather than raising;
//! rejecting it is the router's job.

use serde_json::Value;

use crate::commands::OutboundCommand;

use super::traits::TransportError;

/// Maximum characters of an opaque frame kept for diagnostics
const PREVIEW_CHARS: usize = 80;

/// One inbound frame as delivered by the transport
#[derive(Clone, Debug, PartialEq)]
pub enum RawFrame {
    /// Frame parsed as JSON
    Structured(Value),
    /// Frame that is not valid JSON
    Opaque(String),
}

impl RawFrame {
    /// Decode a text frame
    pub fn decode(text: String) -> Self {
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => Self::Structured(value),
            Err(_) => Self::Opaque(text),
        }
    }

    /// Short printable form for logs
    pub fn preview(&self) -> String {
        let full = match self {
            Self::Structured(value) => value.to_string(),
            Self::Opaque(text) => text.clone(),
        };
        if full.chars().count() <= PREVIEW_CHARS {
            full
        } else {
            let mut cut: String = full.chars().take(PREVIEW_CHARS).collect();
            cut.push('…');
            cut
        }
    }
}

/// Encode a command as a text frame
///
/// # Errors
///
/// Returns [`TransportError::SerializationError`] if the command cannot be
/// represented as JSON.
pub fn encode(command: &OutboundCommand) -> Result<String, TransportError> {
    Ok(command.to_frame()?)
}
