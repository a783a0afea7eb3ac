// Progress notifications pushed to live sessions
//
// Wire shape (camelCase, optional arrays omitted when absent):
// {"action": "build"|"run", "result": "launched"|"succeeded"|"aborted"|"failed",
//  "errorLines": [...], "outputLines": [...]}

use serde::{Deserialize, Serialize};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Pipeline phase a notification refers to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Build,
    Run,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Build => write!(f, "build"),
            Phase::Run => write!(f, "run"),
        }
    }
}

/// Outcome of a phase.
/// - `launched`: the phase has started
/// - `succeeded`: the phase finished successfully
/// - `aborted`: the phase was stopped (compiler errors, deadline exceeded)
/// - `failed`: the phase finished without success
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Launched,
    Succeeded,
    Aborted,
    Failed,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Launched => write!(f, "launched"),
            Outcome::Succeeded => write!(f, "succeeded"),
            Outcome::Aborted => write!(f, "aborted"),
            Outcome::Failed => write!(f, "failed"),
        }
    }
}

/// Progress message for one run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct RunNotification {
    pub action: Phase,
    pub result: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_lines: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_lines: Option<Vec<String>>,
}

impl RunNotification {
    pub fn new(action: Phase, result: Outcome) -> Self {
        Self {
            action,
            result,
            error_lines: None,
            output_lines: None,
        }
    }

    pub fn with_error_lines(mut self, lines: Vec<String>) -> Self {
        self.error_lines = Some(lines);
        self
    }

    pub fn with_output_lines(mut self, lines: Vec<String>) -> Self {
        self.output_lines = Some(lines);
        self
    }
}
