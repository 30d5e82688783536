//! Stage status, stage kind and run status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of work a stage performs.
///
/// The engine never branches on this; it is carried in events so reporters
/// can group stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Turns the initial input into a requirement document.
    Analysis,
    /// Turns requirements into a design.
    Design,
    /// Produces code and checks from the design.
    Build,
    /// Runs checks and drives the verify/fix loop.
    Verify,
    /// Packages the verified result.
    Release,
    /// Anything else.
    #[default]
    General,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Analysis => write!(f, "analysis"),
            Self::Design => write!(f, "design"),
            Self::Build => write!(f, "build"),
            Self::Verify => write!(f, "verify"),
            Self::Release => write!(f, "release"),
            Self::General => write!(f, "general"),
        }
    }
}

/// The execution status of a stage attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage has not run yet.
    #[default]
    Pending,
    /// Stage is currently running.
    Running,
    /// Stage completed successfully.
    Success,
    /// Stage completed with an expected failure.
    Failed,
    /// Stage was skipped.
    Skipped,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Skipped)
    }
}

/// Terminal state of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every stage ran (or was skipped) without raising or aborting.
    Success,
    /// A stage raised an unexpected error.
    Error,
    /// An intervention requested abort.
    Aborted,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}
