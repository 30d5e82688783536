//! Recovery policy consulted when a stage reports an expected failure.

use crate::agents::AgentKind;
use crate::context::WorkflowContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;

/// What to do about a failed stage.
///
/// Several flags may be set at once; [`InterventionDecision::action`]
/// resolves them with the precedence abort, retry, skip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterventionDecision {
    /// Halt the run.
    #[serde(default)]
    pub abort: bool,
    /// Re-run the failed stage.
    #[serde(default)]
    pub retry: bool,
    /// Move on, leaving the failed result in place.
    #[serde(default)]
    pub skip: bool,
    /// Guidance delivered to agents before a retry.
    #[serde(default)]
    pub instructions: BTreeMap<AgentKind, String>,
}

/// A decision resolved by precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterventionAction {
    /// Halt the run.
    Abort,
    /// Re-run the stage.
    Retry,
    /// Record a user skip and continue.
    Skip,
    /// Continue without further action.
    Continue,
}

impl InterventionDecision {
    /// A decision that does nothing.
    #[must_use]
    pub fn proceed() -> Self {
        Self::default()
    }

    /// A decision requesting abort.
    #[must_use]
    pub fn abort() -> Self {
        Self {
            abort: true,
            ..Self::default()
        }
    }

    /// A decision requesting a retry.
    #[must_use]
    pub fn retry() -> Self {
        Self {
            retry: true,
            ..Self::default()
        }
    }

    /// A decision requesting a skip.
    #[must_use]
    pub fn skip() -> Self {
        Self {
            skip: true,
            ..Self::default()
        }
    }

    /// Also requests abort.
    #[must_use]
    pub fn and_abort(mut self) -> Self {
        self.abort = true;
        self
    }

    /// Also requests a retry.
    #[must_use]
    pub fn and_retry(mut self) -> Self {
        self.retry = true;
        self
    }

    /// Also requests a skip.
    #[must_use]
    pub fn and_skip(mut self) -> Self {
        self.skip = true;
        self
    }

    /// Adds guidance for an agent.
    #[must_use]
    pub fn with_instruction(mut self, agent: AgentKind, text: impl Into<String>) -> Self {
        self.instructions.insert(agent, text.into());
        self
    }

    /// Resolves the flags.
    #[must_use]
    pub fn action(&self) -> InterventionAction {
        if self.abort {
            InterventionAction::Abort
        } else if self.retry {
            InterventionAction::Retry
        } else if self.skip {
            InterventionAction::Skip
        } else {
            InterventionAction::Continue
        }
    }

    /// Converts to the payload of an `intervention_end` event.
    #[must_use]
    pub fn to_event_data(&self) -> HashMap<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map.into_iter().collect(),
            _ => HashMap::new(),
        }
    }
}

/// A recovery policy.
#[async_trait]
pub trait InterventionHandler: Send + Sync + Debug {
    /// Returns true if the handler wants to act on the current failure.
    ///
    /// The failed stage is `ctx.current_stage()`.
    async fn should_intervene(&self, ctx: &WorkflowContext) -> bool;

    /// Decides what to do about the current failure.
    async fn handle_intervention(&self, ctx: &WorkflowContext) -> InterventionDecision;
}

/// An unattended policy that always retries with fixed guidance.
///
/// The engine's retry bound still applies.
#[derive(Debug, Clone, Default)]
pub struct AutoRetryHandler {
    instructions: BTreeMap<AgentKind, String>,
}

impl AutoRetryHandler {
    /// Creates a handler with no guidance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds guidance sent to an agent before every retry.
    #[must_use]
    pub fn with_instruction(mut self, agent: AgentKind, text: impl Into<String>) -> Self {
        self.instructions.insert(agent, text.into());
        self
    }
}

#[async_trait]
impl InterventionHandler for AutoRetryHandler {
    async fn should_intervene(&self, _ctx: &WorkflowContext) -> bool {
        true
    }

    async fn handle_intervention(&self, ctx: &WorkflowContext) -> InterventionDecision {
        tracing::debug!(
            stage = ?ctx.current_stage(),
            iteration = ctx.iteration(),
            "Auto-retrying failed stage"
        );
        InterventionDecision {
            retry: true,
            instructions: self.instructions.clone(),
            ..InterventionDecision::default()
        }
    }
}
