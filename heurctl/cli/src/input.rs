//! Line commands typed at the prompt

use std::path::PathBuf;

use heurctl_core::{ClientInput, UserCommand};

/// What a line asks for
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    /// Forward to the client
    Client(ClientInput),
    /// Load a custom function from a file
    Custom {
        /// Source file
        path: PathBuf,
        /// Optional domain bounds
        bounds: Option<(f64, f64)>,
    },
    /// Dismiss the newest visible notice
    DismissLatest,
    /// Print the current status
    Status,
    /// List algorithms
    Algorithms,
    /// List catalog functions
    Functions,
    /// Print usage
    Help,
    /// Blank line
    Nothing,
}

pub const HELP: &str = "\
commands:
  start | resume          start a job, or resume a paused one
  pause                   pause the running job
  stop                    stop the running or paused job
  fn <name>               select a catalog function
  custom <file> [lo hi]   use the first `def` in <file> as the function
  enable <alg>            include an algorithm in the next job
  disable <alg>           leave an algorithm out of the next job
  algos | fns             list algorithms / catalog functions
  status                  show connection, job state and progress
  dismiss                 hide the newest notice
  quit                    close the connection and exit";

/// Parse one line
///
/// Returns a short message for lines that are not understood.
pub fn parse_line(line: &str) -> Result<Action, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(Action::Nothing);
    };
    let rest: Vec<&str> = words.collect();

    let action = match (verb.to_ascii_lowercase().as_str(), rest.as_slice()) {
        ("start" | "resume", []) => Action::Client(ClientInput::Command(UserCommand::Start)),
        ("pause", []) => Action::Client(ClientInput::Command(UserCommand::Pause)),
        ("stop", []) => Action::Client(ClientInput::Command(UserCommand::Stop)),
        ("fn", [name]) => Action::Client(ClientInput::SelectFunction((*name).to_string())),
        ("enable" | "disable", [name]) => Action::Client(ClientInput::SetAlgorithmEnabled {
            name: (*name).to_string(),
            enabled: verb.eq_ignore_ascii_case("enable"),
        }),
        ("custom", [path]) => Action::Custom {
            path: PathBuf::from(path),
            bounds: None,
        },
        ("custom", [path, lo, hi]) => Action::Custom {
            path: PathBuf::from(path),
            bounds: Some((parse_bound(lo)?, parse_bound(hi)?)),
        },
        ("dismiss", []) => Action::DismissLatest,
        ("status", []) => Action::Status,
        ("algos", []) => Action::Algorithms,
        ("fns", []) => Action::Functions,
        ("help" | "?", []) => Action::Help,
        ("quit" | "exit", []) => Action::Client(ClientInput::Shutdown),
        _ => return Err(format!("unrecognized command `{}` (try `help`)", line.trim())),
    };
    Ok(action)
}

fn parse_bound(word: &str) -> Result<f64, String> {
    word.parse::<f64>()
        .map_err(|_| format!("`{word}` is not a number"))
}
