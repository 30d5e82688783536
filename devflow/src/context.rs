//! The mutable state shared by the stages of one run.
//!
//! A context is created at the start of a run, owned exclusively by that
//! run and discarded when it ends. It is never persisted.

use crate::agents::{Agent, AgentKind};
use crate::config::WorkflowConfig;
use crate::core::{StageResult, StageStatus, WorkflowEvent};
use crate::diagnosis::Diagnosis;
use crate::errors::ContextError;
use crate::utils::{format_timestamp, Timestamp};
use crate::workspace::Workspace;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Key under which the run's initial input is stored.
pub const INITIAL_INPUT_KEY: &str = "initial_input";
/// Key under which the run's start time is stored.
pub const START_TIME_KEY: &str = "start_time";
/// Key under which the release stage stores the run's final output.
pub const FINAL_OUTPUT_KEY: &str = "final_output";

const RESULT_SUFFIX: &str = "_result";
const STATUS_SUFFIX: &str = "_status";

static NULL: Value = Value::Null;

fn is_reserved(key: &str) -> bool {
    key.ends_with(RESULT_SUFFIX) || key.ends_with(STATUS_SUFFIX)
}

/// Shared state for one run.
pub struct WorkflowContext {
    run_id: Uuid,
    started_at: Timestamp,
    data: HashMap<String, Value>,
    results: HashMap<String, StageResult>,
    agents: HashMap<AgentKind, Arc<dyn Agent>>,
    memory: Arc<dyn Workspace>,
    config: Arc<WorkflowConfig>,
    iteration: u32,
    history: Vec<WorkflowEvent>,
    aborted: bool,
    current_stage: Option<String>,
    last_diagnosis: Option<Diagnosis>,
}

impl WorkflowContext {
    /// Creates an empty context over a workspace and configuration.
    #[must_use]
    pub fn new(config: Arc<WorkflowConfig>, memory: Arc<dyn Workspace>) -> Self {
        let started_at = Utc::now();
        let mut data = HashMap::new();
        data.insert(INITIAL_INPUT_KEY.to_string(), Value::Object(serde_json::Map::new()));
        data.insert(
            START_TIME_KEY.to_string(),
            Value::String(format_timestamp(&started_at)),
        );
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            data,
            results: HashMap::new(),
            agents: HashMap::new(),
            memory,
            config,
            iteration: 0,
            history: Vec::new(),
            aborted: false,
            current_stage: None,
            last_diagnosis: None,
        }
    }

    /// Sets the run's initial input.
    #[must_use]
    pub fn with_input(mut self, input: Value) -> Self {
        self.data.insert(INITIAL_INPUT_KEY.to_string(), input);
        self
    }

    /// Registers an agent under its own kind, replacing any previous one.
    #[must_use]
    pub fn with_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agents.insert(agent.kind(), agent);
        self
    }

    /// Registers a set of agents.
    #[must_use]
    pub fn with_agents(mut self, agents: &HashMap<AgentKind, Arc<dyn Agent>>) -> Self {
        self.agents
            .extend(agents.iter().map(|(kind, agent)| (*kind, Arc::clone(agent))));
        self
    }

    /// Returns the run ID.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns when the run started.
    #[must_use]
    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }

    /// Returns the initial input.
    #[must_use]
    pub fn initial_input(&self) -> &Value {
        self.data.get(INITIAL_INPUT_KEY).unwrap_or(&NULL)
    }

    // ----- generic store -----

    /// Reads a value from the store.
    ///
    /// `<stage>_result` keys resolve to the stage's most recent result.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.data.get(key) {
            return Some(value.clone());
        }
        key.strip_suffix(RESULT_SUFFIX)
            .and_then(|stage| self.results.get(stage))
            .and_then(|result| serde_json::to_value(result).ok())
    }

    /// Reads a value from the store, falling back to `default`.
    #[must_use]
    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    /// Reads and deserializes a value from the store.
    #[must_use]
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| serde_json::from_value(v).ok())
    }

    /// Returns true if the store holds `key`.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Writes a value to the store.
    ///
    /// # Errors
    ///
    /// Returns `ContextError::ReservedKey` for keys ending in `_result` or
    /// `_status`; those are written only when the engine records a stage
    /// result.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Result<(), ContextError> {
        let key = key.into();
        if is_reserved(&key) {
            return Err(ContextError::ReservedKey(key));
        }
        self.data.insert(key, value);
        Ok(())
    }

    // ----- stage results -----

    /// Stores a stage's result, replacing that stage's previous result.
    pub(crate) fn record_result(&mut self, stage_name: &str, result: StageResult) {
        self.data.insert(
            format!("{stage_name}{STATUS_SUFFIX}"),
            Value::String(result.status.to_string()),
        );
        self.results.insert(stage_name.to_string(), result);
    }

    /// Returns a stage's most recent result.
    #[must_use]
    pub fn stage_result(&self, stage_name: &str) -> Option<&StageResult> {
        self.results.get(stage_name)
    }

    /// Returns true if the stage's most recent attempt succeeded.
    #[must_use]
    pub fn stage_succeeded(&self, stage_name: &str) -> bool {
        self.stage_result(stage_name)
            .is_some_and(|r| r.status == StageStatus::Success)
    }

    /// Returns every stored result.
    #[must_use]
    pub fn results(&self) -> &HashMap<String, StageResult> {
        &self.results
    }

    // ----- collaborators -----

    /// Returns the agent of the given kind, if registered.
    #[must_use]
    pub fn agent(&self, kind: AgentKind) -> Option<Arc<dyn Agent>> {
        self.agents.get(&kind).cloned()
    }

    /// Returns every registered agent.
    #[must_use]
    pub fn agents(&self) -> &HashMap<AgentKind, Arc<dyn Agent>> {
        &self.agents
    }

    /// Returns the workspace.
    #[must_use]
    pub fn memory(&self) -> Arc<dyn Workspace> {
        Arc::clone(&self.memory)
    }

    /// Returns the read-only configuration.
    #[must_use]
    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    // ----- history and counters -----

    /// Appends an event to the history.
    pub fn add_event(&mut self, event: WorkflowEvent) {
        self.history.push(event);
    }

    /// Returns the ordered history.
    #[must_use]
    pub fn history(&self) -> &[WorkflowEvent] {
        &self.history
    }

    /// Returns the run's retry counter.
    #[must_use]
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Increments the retry counter and returns the new value.
    pub(crate) fn advance_iteration(&mut self) -> u32 {
        self.iteration = self.iteration.saturating_add(1);
        self.iteration
    }

    /// Returns true once an intervention has requested abort.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub(crate) fn mark_aborted(&mut self) {
        self.aborted = true;
    }

    /// Returns the stage currently executing.
    #[must_use]
    pub fn current_stage(&self) -> Option<&str> {
        self.current_stage.as_deref()
    }

    pub(crate) fn set_current_stage(&mut self, stage_name: Option<&str>) {
        self.current_stage = stage_name.map(str::to_string);
    }

    /// Returns the most recent failure diagnosis of the verification stage.
    #[must_use]
    pub fn last_diagnosis(&self) -> Option<&Diagnosis> {
        self.last_diagnosis.as_ref()
    }

    /// Records the most recent failure diagnosis.
    pub fn set_last_diagnosis(&mut self, diagnosis: Diagnosis) {
        self.last_diagnosis = Some(diagnosis);
    }

    /// Returns the run's final output, if a stage produced one.
    #[must_use]
    pub fn final_output(&self) -> Option<&Value> {
        self.data.get(FINAL_OUTPUT_KEY)
    }
}

impl fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("run_id", &self.run_id)
            .field("iteration", &self.iteration)
            .field("current_stage", &self.current_stage)
            .field("results", &self.results.keys().collect::<Vec<_>>())
            .field("agents", &self.agents.keys().collect::<Vec<_>>())
            .field("history_len", &self.history.len())
            .field("aborted", &self.aborted)
            .finish_non_exhaustive()
    }
}
