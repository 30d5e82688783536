//! Scripted doubles for stages, agents, handlers and reporters.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::fmt;

use crate::agents::{Agent, AgentAction, AgentInfo, AgentKind, AgentResponse, InstructionWindow};
use crate::config::AgentSettings;
use crate::context::WorkflowContext;
use crate::core::{StageKind, StageResult, WorkflowEvent, WorkflowEventType};
use crate::errors::{AgentError, ReporterError, StageError};
use crate::intervention::{InterventionDecision, InterventionHandler};
use crate::reporters::Reporter;
use crate::stages::Stage;

/// Pops the next scripted item; the last one repeats forever.
fn next_scripted<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

#[derive(Debug, Clone)]
enum Step {
    Succeed,
    Fail(String),
    Raise(String),
}

type Effect = Box<dyn Fn(&mut WorkflowContext) + Send + Sync>;
type Precondition = Box<dyn Fn(&WorkflowContext) -> bool + Send + Sync>;

/// A stage that plays back a script of outcomes.
///
/// Each attempt consumes one step; the last step repeats. An empty script
/// always succeeds. Successful attempts output `{"attempt": n}`.
pub struct ScriptedStage {
    name: String,
    kind: StageKind,
    steps: Mutex<VecDeque<Step>>,
    effect: Option<Effect>,
    precondition: Option<Precondition>,
    calls: Mutex<u32>,
    failures: Mutex<Vec<String>>,
}

impl ScriptedStage {
    /// Creates a stage with an empty script.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: StageKind::General,
            steps: Mutex::new(VecDeque::new()),
            effect: None,
            precondition: None,
            calls: Mutex::new(0),
            failures: Mutex::new(Vec::new()),
        }
    }

    /// Creates a stage that always succeeds.
    #[must_use]
    pub fn succeeding(name: impl Into<String>) -> Self {
        Self::new(name)
    }

    /// Creates a stage that fails with `error` until scripted otherwise.
    #[must_use]
    pub fn failing(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(name).then_fail(error)
    }

    /// Creates a stage that raises `StageError::Internal`.
    #[must_use]
    pub fn raising(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name).then_raise(message)
    }

    /// Appends a successful attempt.
    #[must_use]
    pub fn then_succeed(mut self) -> Self {
        self.steps.get_mut().push_back(Step::Succeed);
        self
    }

    /// Appends a failed attempt.
    #[must_use]
    pub fn then_fail(mut self, error: impl Into<String>) -> Self {
        self.steps.get_mut().push_back(Step::Fail(error.into()));
        self
    }

    /// Appends an attempt that raises.
    #[must_use]
    pub fn then_raise(mut self, message: impl Into<String>) -> Self {
        self.steps.get_mut().push_back(Step::Raise(message.into()));
        self
    }

    /// Sets the stage kind.
    #[must_use]
    pub fn with_kind(mut self, kind: StageKind) -> Self {
        self.kind = kind;
        self
    }

    /// Runs `effect` against the context at the start of every attempt.
    #[must_use]
    pub fn with_effect<F>(mut self, effect: F) -> Self
    where
        F: Fn(&mut WorkflowContext) + Send + Sync + 'static,
    {
        self.effect = Some(Box::new(effect));
        self
    }

    /// Replaces the always-true precondition.
    #[must_use]
    pub fn with_precondition<F>(mut self, precondition: F) -> Self
    where
        F: Fn(&WorkflowContext) -> bool + Send + Sync + 'static,
    {
        self.precondition = Some(Box::new(precondition));
        self
    }

    /// Returns the number of attempts so far.
    #[must_use]
    pub fn calls(&self) -> u32 {
        *self.calls.lock()
    }

    /// Returns the errors passed to `on_failure`, in order.
    #[must_use]
    pub fn failures_seen(&self) -> Vec<String> {
        self.failures.lock().clone()
    }
}

impl fmt::Debug for ScriptedStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedStage")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("steps", &self.steps.lock())
            .field("calls", &self.calls())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        self.kind
    }

    fn can_execute(&self, ctx: &WorkflowContext) -> bool {
        self.precondition.as_ref().map_or(true, |check| check(ctx))
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> Result<StageResult, StageError> {
        let attempt = {
            let mut calls = self.calls.lock();
            *calls += 1;
            *calls
        };
        if let Some(effect) = &self.effect {
            effect(ctx);
        }

        let step = next_scripted(&mut *self.steps.lock()).unwrap_or(Step::Succeed);
        match step {
            Step::Succeed => Ok(StageResult::success_empty().with_output("attempt", json!(attempt))),
            Step::Fail(error) => Ok(StageResult::failed(error)),
            Step::Raise(message) => Err(StageError::internal(message)),
        }
    }

    async fn on_failure(&self, _ctx: &mut WorkflowContext, error: &StageError) {
        self.failures.lock().push(error.to_string());
    }
}

/// An agent that plays back scripted responses per action.
///
/// Responses queued for one action are returned in order and the last one
/// repeats. An action with no script fails with `UnknownAction`.
#[derive(Debug)]
pub struct ScriptedAgent {
    kind: AgentKind,
    scripts: Mutex<HashMap<String, VecDeque<Result<AgentResponse, AgentError>>>>,
    calls: Mutex<Vec<AgentAction>>,
    instructions_seen: Mutex<Vec<Vec<String>>>,
    instructions: InstructionWindow,
}

impl ScriptedAgent {
    /// Creates an agent with no scripted responses.
    #[must_use]
    pub fn new(kind: AgentKind) -> Self {
        Self {
            kind,
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            instructions_seen: Mutex::new(Vec::new()),
            instructions: InstructionWindow::default(),
        }
    }

    /// Sets the number of recent instructions honoured.
    #[must_use]
    pub fn with_instruction_window(mut self, capacity: usize) -> Self {
        self.instructions = InstructionWindow::new(capacity);
        self
    }

    /// Sizes the instruction window from `agents.instruction_window`.
    #[must_use]
    pub fn with_settings(mut self, settings: &AgentSettings) -> Self {
        self.instructions = InstructionWindow::from_settings(settings);
        self
    }

    /// Queues a response for `action`.
    #[must_use]
    pub fn respond(self, action: &str, response: AgentResponse) -> Self {
        self.script(action, Ok(response))
    }

    /// Queues a failure for `action`.
    #[must_use]
    pub fn fail(self, action: &str, error: AgentError) -> Self {
        self.script(action, Err(error))
    }

    fn script(mut self, action: &str, outcome: Result<AgentResponse, AgentError>) -> Self {
        self.scripts
            .get_mut()
            .entry(action.to_string())
            .or_default()
            .push_back(outcome);
        self
    }

    /// Returns every request received, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<AgentAction> {
        self.calls.lock().clone()
    }

    /// Returns the action names of every request received.
    #[must_use]
    pub fn call_names(&self) -> Vec<&'static str> {
        self.calls.lock().iter().map(AgentAction::name).collect()
    }

    /// Returns the instructions currently honoured.
    #[must_use]
    pub fn instructions(&self) -> Vec<String> {
        self.instructions.texts()
    }

    /// Returns, per request, the instructions that were active for it.
    #[must_use]
    pub fn instructions_seen(&self) -> Vec<Vec<String>> {
        self.instructions_seen.lock().clone()
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn kind(&self) -> AgentKind {
        self.kind
    }

    async fn process(&self, action: AgentAction) -> Result<AgentResponse, AgentError> {
        action.ensure_target(self.kind)?;
        let name = action.name();
        self.calls.lock().push(action);
        self.instructions_seen.lock().push(self.instructions.texts());

        let mut scripts = self.scripts.lock();
        scripts
            .get_mut(name)
            .and_then(|queue| next_scripted(queue))
            .unwrap_or_else(|| Err(AgentError::unknown_action(self.kind.as_str(), name)))
    }

    fn inject_instruction(&self, instruction: &str) {
        self.instructions.push(instruction);
    }

    fn info(&self) -> AgentInfo {
        AgentInfo {
            kind: self.kind,
            model: "scripted".to_string(),
            active_instructions: self.instructions.texts(),
        }
    }
}

/// An intervention handler that plays back a sequence of decisions.
///
/// The last decision repeats. With no decisions it always proceeds.
#[derive(Debug, Default)]
pub struct ScriptedHandler {
    intervene: bool,
    decisions: Mutex<VecDeque<InterventionDecision>>,
    consulted: Mutex<Vec<(Option<String>, u32)>>,
}

impl ScriptedHandler {
    /// Creates a handler returning `decisions` in order.
    #[must_use]
    pub fn new(decisions: impl IntoIterator<Item = InterventionDecision>) -> Self {
        Self {
            intervene: true,
            decisions: Mutex::new(decisions.into_iter().collect()),
            consulted: Mutex::new(Vec::new()),
        }
    }

    /// Creates a handler that always returns `decision`.
    #[must_use]
    pub fn always(decision: InterventionDecision) -> Self {
        Self::new([decision])
    }

    /// Creates a handler that never wants to intervene.
    #[must_use]
    pub fn declining() -> Self {
        Self::default()
    }

    /// Returns `(stage, iteration)` for every decision handed out.
    #[must_use]
    pub fn consultations(&self) -> Vec<(Option<String>, u32)> {
        self.consulted.lock().clone()
    }
}

#[async_trait]
impl InterventionHandler for ScriptedHandler {
    async fn should_intervene(&self, _ctx: &WorkflowContext) -> bool {
        self.intervene
    }

    async fn handle_intervention(&self, ctx: &WorkflowContext) -> InterventionDecision {
        self.consulted
            .lock()
            .push((ctx.current_stage().map(str::to_string), ctx.iteration()));
        next_scripted(&mut *self.decisions.lock()).unwrap_or_default()
    }
}

/// A reporter that keeps every event it sees.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<WorkflowEvent>>,
}

impl CollectingReporter {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the collected events.
    #[must_use]
    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events.lock().clone()
    }

    /// Returns the collected event types.
    #[must_use]
    pub fn event_types(&self) -> Vec<WorkflowEventType> {
        self.events.lock().iter().map(|e| e.event_type).collect()
    }
}

#[async_trait]
impl Reporter for CollectingReporter {
    fn name(&self) -> &str {
        "collecting"
    }

    async fn report(&self, event: &WorkflowEvent) -> Result<(), ReporterError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// A reporter that fails on every event.
#[derive(Debug, Default)]
pub struct FailingReporter {
    attempts: Mutex<usize>,
}

impl FailingReporter {
    /// Creates a failing reporter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how many events it was handed.
    #[must_use]
    pub fn attempts(&self) -> usize {
        *self.attempts.lock()
    }
}

#[async_trait]
impl Reporter for FailingReporter {
    fn name(&self) -> &str {
        "failing"
    }

    async fn report(&self, _event: &WorkflowEvent) -> Result<(), ReporterError> {
        *self.attempts.lock() += 1;
        Err(ReporterError::new(self.name(), "sink unavailable"))
    }
}
