//! Job Parameters
//!
//! The data model behind a `start` command: which objective function to run,
//! which algorithms to run it with, and the parameter values or ranges each
//! algorithm sweeps over.
//!
//! # Wire Shape
//!
//! Parameters are serialized exactly the way the server and the local cache
//! expect them:
//!
//! ```json
//! { "name": "Agents", "value": 20, "type": "int" }
//! { "name": "Alpha", "min": 0.1, "max": 0.9, "step": 0.1, "type": "float" }
//! ```
//!
//! # Immutability
//!
//! Values here are plain data. Edits produce a new structure which replaces
//! the previous one wholesale (see [`crate::reconcile::ConfigReconciler`]);
//! nothing hands out `&mut` into a snapshot another consumer may still hold.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::commands::{AlgorithmRun, OutboundCommand, StartPayload};

/// Default domain bounds for a custom function when none are supplied
pub const DEFAULT_CUSTOM_BOUNDS: (f64, f64) = (-10.0, 10.0);

/// Errors raised while validating or building job parameters
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamError {
    /// A numeric field was NaN or infinite
    #[error("parameter `{name}` has a non-finite value")]
    NonFinite {
        /// Parameter name
        name: String,
    },

    /// Range lower bound exceeds upper bound
    #[error("parameter `{name}` has min {min} greater than max {max}")]
    InvertedRange {
        /// Parameter name
        name: String,
        /// Lower bound
        min: f64,
        /// Upper bound
        max: f64,
    },

    /// Range step must be positive
    #[error("parameter `{name}` has non-positive step {step}")]
    InvalidStep {
        /// Parameter name
        name: String,
        /// Offending step
        step: f64,
    },

    /// No algorithm is enabled for the job
    #[error("no algorithm is enabled")]
    NoActiveAlgorithm,

    /// No objective function is selected or available
    #[error("no objective function selected")]
    NoFunction,

    /// Custom function source has no `def name(` header
    #[error("custom function source does not define a function")]
    MissingFunctionName,

    /// Function bounds are inverted or non-finite
    #[error("function `{name}` has invalid bounds [{lower}, {upper}]")]
    InvalidBounds {
        /// Function name
        name: String,
        /// Lower bound
        lower: f64,
        /// Upper bound
        upper: f64,
    },
}

/// Numeric type of a parameter
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumKind {
    /// Integer parameter (values are rounded on submit)
    Int,
    /// Floating point parameter
    #[default]
    Float,
}

impl NumKind {
    fn normalize(self, value: f64) -> f64 {
        match self {
            Self::Int => value.round(),
            Self::Float => value,
        }
    }
}

/// A single algorithm parameter: either a fixed value or a `[min, max]` range
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamSpec {
    /// Swept range of values
    Range {
        /// Parameter name
        name: String,
        /// Lower bound (inclusive)
        min: f64,
        /// Upper bound (inclusive)
        max: f64,
        /// Optional sweep step
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step: Option<f64>,
        /// Numeric type
        #[serde(rename = "type", default)]
        kind: NumKind,
    },

    /// Single fixed value
    Fixed {
        /// Parameter name
        name: String,
        /// The value
        value: f64,
        /// Numeric type
        #[serde(rename = "type", default)]
        kind: NumKind,
    },
}

impl ParamSpec {
    /// Create a fixed-value parameter
    pub fn fixed(name: impl Into<String>, value: f64, kind: NumKind) -> Self {
        Self::Fixed {
            name: name.into(),
            value,
            kind,
        }
    }

    /// Create a range parameter without a step
    pub fn range(name: impl Into<String>, min: f64, max: f64, kind: NumKind) -> Self {
        Self::Range {
            name: name.into(),
            min,
            max,
            step: None,
            kind,
        }
    }

    /// Parameter name
    pub fn name(&self) -> &str {
        match self {
            Self::Range { name, .. } | Self::Fixed { name, .. } => name,
        }
    }

    /// Numeric type
    pub fn kind(&self) -> NumKind {
        match self {
            Self::Range { kind, .. } | Self::Fixed { kind, .. } => *kind,
        }
    }

    /// Check numeric sanity of the parameter
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ParamError> {
        match self {
            Self::Fixed { name, value, .. } => {
                if !value.is_finite() {
                    return Err(ParamError::NonFinite { name: name.clone() });
                }
            }
            Self::Range {
                name,
                min,
                max,
                step,
                ..
            } => {
                if !min.is_finite() || !max.is_finite() {
                    return Err(ParamError::NonFinite { name: name.clone() });
                }
                if min > max {
                    return Err(ParamError::InvertedRange {
                        name: name.clone(),
                        min: *min,
                        max: *max,
                    });
                }
                if let Some(step) = step {
                    if !step.is_finite() || *step <= 0.0 {
                        return Err(ParamError::InvalidStep {
                            name: name.clone(),
                            step: *step,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Copy with integer parameters rounded to whole numbers
    #[must_use]
    pub fn normalized(&self) -> Self {
        match self {
            Self::Fixed { name, value, kind } => Self::Fixed {
                name: name.clone(),
                value: kind.normalize(*value),
                kind: *kind,
            },
            Self::Range {
                name,
                min,
                max,
                step,
                kind,
            } => Self::Range {
                name: name.clone(),
                min: kind.normalize(*min),
                max: kind.normalize(*max),
                step: *step,
                kind: *kind,
            },
        }
    }
}

fn default_true() -> bool {
    true
}

/// Parameter set of one algorithm
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmParams {
    /// Algorithm name as known to the server
    pub name: String,
    /// The algorithm's own parameters
    #[serde(alias = "args", default)]
    pub params: Vec<ParamSpec>,
    /// Whether this algorithm takes part in the next job
    #[serde(rename = "isUsed", default = "default_true")]
    pub is_used: bool,
}

impl AlgorithmParams {
    /// Create an enabled algorithm entry
    pub fn new(name: impl Into<String>, params: Vec<ParamSpec>) -> Self {
        Self {
            name: name.into(),
            params,
            is_used: true,
        }
    }

    /// Copy with a different enabled flag
    #[must_use]
    pub fn with_enabled(&self, is_used: bool) -> Self {
        Self {
            is_used,
            ..self.clone()
        }
    }
}

/// An objective function, either from the catalog or user-supplied
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FnData {
    /// Function name (the Python `def` name)
    pub name: String,
    /// Source text, or catalog source for built-ins
    #[serde(default)]
    pub code: String,
    /// Search domain `[lower, upper]`
    #[serde(default = "default_bounds")]
    pub bounds: (f64, f64),
    /// Whether the user supplied the source
    #[serde(rename = "isCustom", default)]
    pub is_custom: bool,
}

fn default_bounds() -> (f64, f64) {
    DEFAULT_CUSTOM_BOUNDS
}

impl FnData {
    /// Build a custom function from its source text
    ///
    /// The function name is taken from the first `def <name>(` header.
    ///
    /// # Errors
    ///
    /// Returns [`ParamError::MissingFunctionName`] when no header is found and
    /// [`ParamError::InvalidBounds`] for inverted or non-finite bounds.
    pub fn custom(code: impl Into<String>, bounds: Option<(f64, f64)>) -> Result<Self, ParamError> {
        let code = code.into();
        let name = function_name(&code).ok_or(ParamError::MissingFunctionName)?;
        let data = Self {
            name,
            code,
            bounds: bounds.unwrap_or(DEFAULT_CUSTOM_BOUNDS),
            is_custom: true,
        };
        data.validate()?;
        Ok(data)
    }

    /// Check the domain bounds
    ///
    /// # Errors
    ///
    /// Returns [`ParamError::InvalidBounds`] for inverted or non-finite bounds.
    pub fn validate(&self) -> Result<(), ParamError> {
        let (lower, upper) = self.bounds;
        if !lower.is_finite() || !upper.is_finite() || lower > upper {
            return Err(ParamError::InvalidBounds {
                name: self.name.clone(),
                lower,
                upper,
            });
        }
        Ok(())
    }
}

/// Extract the first Python function name from source text
fn function_name(code: &str) -> Option<String> {
    code.lines().find_map(|line| {
        let rest = line.trim_start().strip_prefix("def")?;
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        let rest = rest.trim_start();
        let end = rest.find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))?;
        let (ident, tail) = rest.split_at(end);
        let starts_ok = ident
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        (starts_ok && tail.trim_start().starts_with('(')).then(|| ident.to_string())
    })
}

/// Everything needed to submit a job
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Objective function
    pub function: FnData,
    /// Per-algorithm parameter sets (enabled and disabled)
    pub algorithms: Vec<AlgorithmParams>,
    /// Parameters shared by every enabled algorithm
    pub shared: Vec<ParamSpec>,
}

impl JobConfig {
    /// Enabled algorithms, in configured order
    pub fn active_algorithms(&self) -> impl Iterator<Item = &AlgorithmParams> {
        self.algorithms.iter().filter(|a| a.is_used)
    }

    /// Validate everything that will be submitted
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ParamError> {
        self.function.validate()?;
        if self.active_algorithms().next().is_none() {
            return Err(ParamError::NoActiveAlgorithm);
        }
        for param in self
            .active_algorithms()
            .flat_map(|a| a.params.iter())
            .chain(self.shared.iter())
        {
            param.validate()?;
        }
        Ok(())
    }

    /// Build the `start` command
    ///
    /// Shared parameters are appended to every enabled algorithm's own
    /// argument list; disabled algorithms are left out.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the configuration cannot be submitted.
    pub fn to_start_command(&self, resume: bool) -> Result<OutboundCommand, ParamError> {
        self.validate()?;
        let algorithms = self
            .active_algorithms()
            .map(|alg| AlgorithmRun {
                name: alg.name.clone(),
                args: alg
                    .params
                    .iter()
                    .chain(self.shared.iter())
                    .map(ParamSpec::normalized)
                    .collect(),
                is_used: true,
            })
            .collect();

        Ok(OutboundCommand::Start(StartPayload {
            selected_function: self.function.clone(),
            algorithms,
            resume,
        }))
    }
}
