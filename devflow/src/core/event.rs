//! Workflow events recorded in the run history.

use super::{StageKind, StageResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Stage name used for events that belong to the run rather than a stage.
pub const WORKFLOW_STAGE_NAME: &str = "workflow";

/// The type of a workflow event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEventType {
    /// A stage attempt is starting.
    StageStart,
    /// A stage attempt returned a result.
    StageEnd,
    /// A stage's precondition was not met.
    StageSkipped,
    /// An intervention chose to move past a failed stage.
    StageSkippedByUser,
    /// A stage raised an unexpected error.
    StageError,
    /// The intervention handler is being consulted.
    InterventionStart,
    /// The intervention handler returned a decision.
    InterventionEnd,
    /// An intervention requested abort.
    WorkflowAborted,
    /// A retry was requested but the iteration bound is exhausted.
    MaxIterationsReached,
    /// The run terminated with an error.
    Error,
}

impl WorkflowEventType {
    /// Returns the wire name of the event type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StageStart => "stage_start",
            Self::StageEnd => "stage_end",
            Self::StageSkipped => "stage_skipped",
            Self::StageSkippedByUser => "stage_skipped_by_user",
            Self::StageError => "stage_error",
            Self::InterventionStart => "intervention_start",
            Self::InterventionEnd => "intervention_end",
            Self::WorkflowAborted => "workflow_aborted",
            Self::MaxIterationsReached => "max_iterations_reached",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for WorkflowEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One occurrence in a run.
///
/// Events are append-only: once recorded in the history they are never
/// mutated or removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    /// The event type.
    pub event_type: WorkflowEventType,

    /// The stage the event belongs to, or `"workflow"`.
    pub stage_name: String,

    /// The event payload.
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,

    /// When the event occurred (ISO 8601).
    pub timestamp: String,
}

impl WorkflowEvent {
    /// Creates a new event with an empty payload.
    #[must_use]
    pub fn new(event_type: WorkflowEventType, stage_name: impl Into<String>) -> Self {
        Self {
            event_type,
            stage_name: stage_name.into(),
            data: HashMap::new(),
            timestamp: crate::utils::iso_timestamp(),
        }
    }

    /// Creates a new event with a payload.
    #[must_use]
    pub fn with_data(
        event_type: WorkflowEventType,
        stage_name: impl Into<String>,
        data: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            data,
            ..Self::new(event_type, stage_name)
        }
    }

    /// Adds a data field to the event.
    #[must_use]
    pub fn add_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Creates a `stage_start` event.
    #[must_use]
    pub fn stage_start(stage_name: &str, kind: StageKind, attempt: u32) -> Self {
        Self::new(WorkflowEventType::StageStart, stage_name)
            .add_data("kind", serde_json::json!(kind))
            .add_data("attempt", serde_json::json!(attempt))
    }

    /// Creates a `stage_end` event carrying the attempt's status, output and error.
    #[must_use]
    pub fn stage_end(stage_name: &str, result: &StageResult) -> Self {
        Self::new(WorkflowEventType::StageEnd, stage_name)
            .add_data("status", serde_json::json!(result.status))
            .add_data("output", serde_json::json!(result.output))
            .add_data("error", serde_json::json!(result.error))
    }

    /// Creates a `stage_skipped` event.
    #[must_use]
    pub fn stage_skipped(stage_name: &str, reason: &str) -> Self {
        Self::new(WorkflowEventType::StageSkipped, stage_name)
            .add_data("reason", serde_json::json!(reason))
    }

    /// Creates a `stage_skipped_by_user` event.
    #[must_use]
    pub fn stage_skipped_by_user(stage_name: &str) -> Self {
        Self::new(WorkflowEventType::StageSkippedByUser, stage_name)
    }

    /// Creates a `stage_error` event.
    #[must_use]
    pub fn stage_error(stage_name: &str, error: &crate::errors::StageError) -> Self {
        Self::with_data(WorkflowEventType::StageError, stage_name, error.to_event_data())
    }

    /// Creates an `intervention_start` event.
    #[must_use]
    pub fn intervention_start(stage_name: &str, reason: Option<&str>) -> Self {
        Self::new(WorkflowEventType::InterventionStart, stage_name)
            .add_data("reason", serde_json::json!(reason))
    }

    /// Creates an `intervention_end` event carrying the decision.
    #[must_use]
    pub fn intervention_end(stage_name: &str, decision: HashMap<String, serde_json::Value>) -> Self {
        Self::with_data(WorkflowEventType::InterventionEnd, stage_name, decision)
    }

    /// Creates a `workflow_aborted` event.
    #[must_use]
    pub fn workflow_aborted(stage_name: &str) -> Self {
        Self::new(WorkflowEventType::WorkflowAborted, stage_name)
            .add_data("reason", serde_json::json!("Aborted by intervention"))
    }

    /// Creates a `max_iterations_reached` event.
    #[must_use]
    pub fn max_iterations_reached(stage_name: &str, iterations: u32) -> Self {
        Self::new(WorkflowEventType::MaxIterationsReached, stage_name)
            .add_data("iterations", serde_json::json!(iterations))
    }

    /// Creates the terminal `error` event for a run.
    #[must_use]
    pub fn run_error(error: &crate::errors::StageError) -> Self {
        Self::with_data(WorkflowEventType::Error, WORKFLOW_STAGE_NAME, error.to_event_data())
    }

    /// Returns true if the event has the given type and stage.
    #[must_use]
    pub fn is(&self, event_type: WorkflowEventType, stage_name: &str) -> bool {
        self.event_type == event_type && self.stage_name == stage_name
    }
}
