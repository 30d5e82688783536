//! Error types for the devflow engine.
//!
//! Two failure classes run through the engine. Expected domain failures are
//! not errors at all: a stage returns a `StageResult` with
//! `StageStatus::Failed`. Everything in this module describes the other
//! class, conditions a caller cannot recover from in place.

use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// The umbrella error type for devflow operations.
#[derive(Debug, Error)]
pub enum DevflowError {
    /// The engine could not be assembled.
    #[error("{0}")]
    Build(#[from] BuildError),

    /// Configuration could not be loaded or is invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A capability provider failed.
    #[error("{0}")]
    Agent(#[from] AgentError),

    /// The workspace rejected an operation.
    #[error("{0}")]
    Workspace(#[from] WorkspaceError),

    /// The iteration log could not be read or written.
    #[error("{0}")]
    IterationLog(#[from] IterationLogError),

    /// A stage raised an unexpected error.
    #[error("{0}")]
    Stage(#[from] StageError),
}

/// Errors raised by capability providers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentError {
    /// The agent does not serve the requested action.
    #[error("Unknown action: {action} for {agent}")]
    UnknownAction {
        /// The agent kind that received the request.
        agent: String,
        /// The action name.
        action: String,
    },

    /// The agent answered with a response of the wrong shape.
    #[error("Unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse {
        /// The response variant the caller needed.
        expected: String,
        /// The response variant actually received.
        actual: String,
    },

    /// The provider itself failed.
    #[error("Agent {agent} failed: {message}")]
    Failed {
        /// The agent kind.
        agent: String,
        /// Provider error message.
        message: String,
    },
}

impl AgentError {
    /// Creates an unknown action error.
    #[must_use]
    pub fn unknown_action(agent: impl Into<String>, action: impl Into<String>) -> Self {
        Self::UnknownAction {
            agent: agent.into(),
            action: action.into(),
        }
    }

    /// Creates an unexpected response error.
    #[must_use]
    pub fn unexpected_response(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a provider failure.
    #[must_use]
    pub fn failed(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            agent: agent.into(),
            message: message.into(),
        }
    }
}

/// Errors raised by a workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// The named artifact does not exist.
    #[error("File not found: {category}/{name}")]
    NotFound {
        /// Category name.
        category: String,
        /// Artifact name.
        name: String,
    },

    /// The artifact name escapes its category or is empty.
    #[error("Invalid artifact name: '{0}'")]
    InvalidName(String),

    /// The category is not one of the fixed workspace categories.
    #[error("Invalid category: {0}. Must be one of requirements, design, code, tests, reports, releases")]
    InvalidCategory(String),

    /// Underlying filesystem failure.
    #[error("Workspace IO error at {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// The IO error.
        #[source]
        source: std::io::Error,
    },
}

impl WorkspaceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised by the iteration log.
#[derive(Debug, Error)]
pub enum IterationLogError {
    /// Filesystem failure while reading or appending.
    #[error("Iteration log IO error at {path}: {source}")]
    Io {
        /// The log path.
        path: PathBuf,
        /// The IO error.
        #[source]
        source: std::io::Error,
    },

    /// A record could not be serialized.
    #[error("Iteration record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by the run context's generic store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContextError {
    /// The key is owned by the engine's stage bookkeeping.
    #[error("Reserved context key: '{0}' (keys ending in _result or _status are written by the engine)")]
    ReservedKey(String),
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Configuration file not found or unreadable: {path}: {source}")]
    Read {
        /// Config path.
        path: PathBuf,
        /// The IO error.
        #[source]
        source: std::io::Error,
    },

    /// The YAML could not be parsed.
    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A value is out of range.
    #[error("Invalid configuration value for '{key}': {message}")]
    Invalid {
        /// Dotted config key.
        key: String,
        /// What is wrong with it.
        message: String,
    },

    /// The tracing subscriber could not be installed.
    #[error("Failed to initialize tracing: {0}")]
    Telemetry(String),
}

/// Errors raised when assembling an engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BuildError {
    /// No stages were added.
    #[error("Workflow has no stages")]
    NoStages,

    /// Two stages share a name, so one would overwrite the other's result.
    #[error("Duplicate stage name: '{0}'")]
    DuplicateStage(String),
}

/// An unexpected, non-recoverable failure raised out of `Stage::execute`.
///
/// The engine invokes the stage's `on_failure` hook, records a
/// `stage_error` event and ends the run with status `error`.
#[derive(Debug, Error)]
pub enum StageError {
    /// A capability provider failed in a way the stage does not handle.
    #[error("{0}")]
    Agent(#[from] AgentError),

    /// The workspace could not persist or load an artifact.
    #[error("{0}")]
    Workspace(#[from] WorkspaceError),

    /// The iteration log could not be appended.
    #[error("{0}")]
    IterationLog(#[from] IterationLogError),

    /// The stage wrote to a key it does not own.
    #[error("{0}")]
    Context(#[from] ContextError),

    /// Any other unexpected condition.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StageError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns the classified type of the error.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Agent(AgentError::UnknownAction { .. }) => "UnknownAction",
            Self::Agent(AgentError::UnexpectedResponse { .. }) => "UnexpectedResponse",
            Self::Agent(AgentError::Failed { .. }) => "AgentError",
            Self::Workspace(WorkspaceError::NotFound { .. }) => "FileNotFound",
            Self::Workspace(_) => "WorkspaceError",
            Self::IterationLog(_) => "IterationLogError",
            Self::Context(_) => "ContextError",
            Self::Internal(_) => "InternalError",
        }
    }

    /// Converts to the payload recorded in `stage_error` and `error` events.
    #[must_use]
    pub fn to_event_data(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("error".to_string(), serde_json::json!(self.to_string()));
        map.insert("type".to_string(), serde_json::json!(self.kind()));
        map
    }
}

/// A reporter's own failure. Logged by the engine and otherwise ignored.
#[derive(Debug, Clone, Error)]
#[error("Reporter '{reporter}' failed: {message}")]
pub struct ReporterError {
    /// The reporter name.
    pub reporter: String,
    /// What went wrong.
    pub message: String,
}

impl ReporterError {
    /// Creates a new reporter error.
    #[must_use]
    pub fn new(reporter: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            reporter: reporter.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_error_messages() {
        let err = AgentError::unknown_action("qa", "implement");
        assert_eq!(err.to_string(), "Unknown action: implement for qa");

        let err = AgentError::unexpected_response("document", "files");
        assert!(err.to_string().contains("expected document"));
    }

    #[test]
    fn test_stage_error_kind() {
        let err = StageError::from(AgentError::failed("developer", "connection refused"));
        assert_eq!(err.kind(), "AgentError");

        let err = StageError::from(WorkspaceError::NotFound {
            category: "code".to_string(),
            name: "main.py".to_string(),
        });
        assert_eq!(err.kind(), "FileNotFound");

        assert_eq!(StageError::internal("boom").kind(), "InternalError");

        let err = StageError::from(ContextError::ReservedKey("coding_result".to_string()));
        assert_eq!(err.kind(), "ContextError");
    }

    #[test]
    fn test_stage_error_event_data() {
        let err = StageError::internal("disk on fire");
        let data = err.to_event_data();

        assert_eq!(data.get("error").unwrap(), "Internal error: disk on fire");
        assert_eq!(data.get("type").unwrap(), "InternalError");
    }

    #[test]
    fn test_build_error_display() {
        assert_eq!(BuildError::NoStages.to_string(), "Workflow has no stages");
        assert!(BuildError::DuplicateStage("coding".to_string())
            .to_string()
            .contains("coding"));
    }

    #[test]
    fn test_devflow_error_from() {
        let err: DevflowError = BuildError::NoStages.into();
        assert!(matches!(err, DevflowError::Build(_)));
    }
}
