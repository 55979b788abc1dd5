//! Outbound Commands
//!
//! Frames sent from the client to the job server. Each variant serializes to
//! a `{ "type": ..., ...payload }` object.
//!
//! User-facing intents ([`UserCommand`]) are resolved into wire commands by
//! the session state machine, which decides e.g. whether `Start` means a fresh
//! start or a resume.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::params::{FnData, ParamSpec};

/// Commands from client to server
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundCommand {
    /// Start (or resume) a job
    Start(StartPayload),
    /// Pause the running job
    Pause,
    /// Stop the running or paused job
    Stop,
    /// Request the server configuration and live job status
    GetParams,
}

impl OutboundCommand {
    /// Discriminant of this command
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Start(_) => CommandKind::Start,
            Self::Pause => CommandKind::Pause,
            Self::Stop => CommandKind::Stop,
            Self::GetParams => CommandKind::GetParams,
        }
    }

    /// Serialize to a text frame
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be represented as JSON
    /// (e.g. a non-finite float slipped past validation).
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Payload of a `start` command
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StartPayload {
    /// Objective function to optimize
    pub selected_function: FnData,
    /// Enabled algorithms with shared parameters merged in
    pub algorithms: Vec<AlgorithmRun>,
    /// Continue a paused job instead of starting over
    #[serde(default, skip_serializing_if = "is_false")]
    pub resume: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(b: &bool) -> bool {
    !*b
}

/// One algorithm entry in a `start` command
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmRun {
    /// Algorithm name
    pub name: String,
    /// Own parameters followed by shared parameters
    pub args: Vec<ParamSpec>,
    /// Always true on the wire; disabled algorithms are not sent
    #[serde(rename = "isUsed")]
    pub is_used: bool,
}

/// Wire command discriminant
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// `start`
    Start,
    /// `pause`
    Pause,
    /// `stop`
    Stop,
    /// `get_params`
    GetParams,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Stop => "stop",
            Self::GetParams => "get_params",
        };
        f.write_str(s)
    }
}

/// What the user asked for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UserCommand {
    /// Start a new job, or resume a paused one
    Start,
    /// Pause the running job
    Pause,
    /// Stop the job
    Stop,
}

impl fmt::Display for UserCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Stop => "stop",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::NumKind;
    use serde_json::json;

    #[test]
    fn test_unit_commands_serialize_with_type_only() {
        assert_eq!(
            serde_json::to_value(OutboundCommand::Pause).unwrap(),
            json!({"type": "pause"})
        );
        assert_eq!(
            serde_json::to_value(OutboundCommand::GetParams).unwrap(),
            json!({"type": "get_params"})
        );
    }

    #[test]
    fn test_start_payload_is_flattened() {
        let cmd = OutboundCommand::Start(StartPayload {
            selected_function: FnData {
                name: "sphere".into(),
                code: "def sphere(x): return x".into(),
                bounds: (-1.0, 1.0),
                is_custom: true,
            },
            algorithms: vec![AlgorithmRun {
                name: "bat".into(),
                args: vec![ParamSpec::fixed("Agents", 10.0, NumKind::Int)],
                is_used: true,
            }],
            resume: false,
        });

        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value["type"], "start");
        assert_eq!(value["selected_function"]["isCustom"], true);
        assert_eq!(value["selected_function"]["bounds"], json!([-1.0, 1.0]));
        assert_eq!(value["algorithms"][0]["args"][0]["type"], "int");
        assert!(value.get("resume").is_none());
    }

    #[test]
    fn test_resume_flag_is_sent_when_set() {
        let cmd = OutboundCommand::Start(StartPayload {
            selected_function: FnData {
                name: "f".into(),
                code: String::new(),
                bounds: (0.0, 1.0),
                is_custom: false,
            },
            algorithms: vec![],
            resume: true,
        });
        let frame = cmd.to_frame().unwrap();
        assert!(frame.contains(r#""resume":true"#));
    }

    #[test]
    fn test_command_kind_display() {
        assert_eq!(CommandKind::GetParams.to_string(), "get_params");
        assert_eq!(OutboundCommand::Stop.kind(), CommandKind::Stop);
    }
}
