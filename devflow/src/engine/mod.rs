//! The stage-sequencing engine.
//!
//! The engine runs its stages strictly in order against a fresh
//! [`WorkflowContext`]. A stage that returns a `FAILED` result triggers the
//! intervention protocol, which may retry the stage (bounded by
//! `workflow.max_iterations`), skip past it or abort the run. A stage that
//! returns `Err` ends the run with status `error`.
//!
//! Every event is appended to the run history before reporters see it, and
//! reporter failures never affect the run.
//!
//! Runs on one engine are serialized: a second `run` waits for the first to
//! finish, so the stop flag and the state snapshot always describe the run
//! in flight.

mod builder;
#[cfg(test)]
mod scenario_tests;

pub use builder::WorkflowBuilder;

use crate::agents::{Agent, AgentKind};
use crate::cancellation::StopFlag;
use crate::config::{IterationLimit, WorkflowConfig};
use crate::context::WorkflowContext;
use crate::core::{RunStatus, StageResult, WorkflowEvent};
use crate::errors::StageError;
use crate::intervention::{InterventionAction, InterventionHandler};
use crate::reporters::Reporter;
use crate::stages::Stage;
use crate::workspace::Workspace;
use parking_lot::RwLock;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Error message carried by an aborted run.
pub const ABORTED_MESSAGE: &str = "Workflow aborted by intervention";

/// The result of one run.
#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    /// The run ID.
    pub run_id: Uuid,
    /// Terminal state.
    pub status: RunStatus,
    /// The run's final output, set by the release stage.
    pub output: Option<Value>,
    /// Error message for `error` and `aborted` runs.
    pub error: Option<String>,
    /// Classified type of the error that ended an `error` run.
    pub error_kind: Option<String>,
    /// Every event of the run, in order.
    pub history: Vec<WorkflowEvent>,
    /// The most recent result of every stage that ran.
    pub results: HashMap<String, StageResult>,
    /// Retry decisions taken during the run.
    pub iterations: u32,
    /// Wall-clock run time.
    pub duration: Duration,
}

impl WorkflowOutcome {
    /// Returns true if the run ended with status `success`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    /// Returns the duration formatted as seconds, e.g. `12.34s`.
    #[must_use]
    pub fn duration_display(&self) -> String {
        format!("{:.2}s", self.duration.as_secs_f64())
    }
}

/// Snapshot of the engine for status displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineState {
    /// The stage currently executing, if any.
    pub current_stage: Option<String>,
    /// The retry counter of the most recent run.
    pub iteration: u32,
    /// The retry bound.
    #[serde(serialize_with = "serialize_limit")]
    pub max_iterations: IterationLimit,
    /// Whether diagnostic mode is on.
    pub debug_mode: bool,
    /// Events recorded in the most recent run.
    pub total_events: usize,
}

fn serialize_limit<S: Serializer>(limit: &IterationLimit, serializer: S) -> Result<S::Ok, S::Error> {
    match limit {
        IterationLimit::Bounded(max) => serializer.serialize_u32(*max),
        IterationLimit::Unbounded => serializer.serialize_str("unlimited"),
    }
}

#[derive(Debug, Default)]
struct Progress {
    current_stage: Option<String>,
    iteration: u32,
    total_events: usize,
}

enum FailureResolution {
    Retry,
    Settled,
}

/// Runs an ordered list of stages.
pub struct WorkflowEngine {
    stages: Vec<Arc<dyn Stage>>,
    reporters: Vec<Arc<dyn Reporter>>,
    intervention_handler: Option<Arc<dyn InterventionHandler>>,
    agents: HashMap<AgentKind, Arc<dyn Agent>>,
    memory: Arc<dyn Workspace>,
    config: Arc<WorkflowConfig>,
    stop: Arc<StopFlag>,
    progress: RwLock<Progress>,
    run_lock: tokio::sync::Mutex<()>,
}

impl WorkflowEngine {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> WorkflowBuilder {
        WorkflowBuilder::new()
    }

    /// Returns the stage names, in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Returns the configuration handed to every run.
    #[must_use]
    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Returns the engine-level retry bound.
    #[must_use]
    pub fn retry_limit(&self) -> IterationLimit {
        self.config.retry_limit()
    }

    /// Turns diagnostic mode on or off, lifting or restoring both
    /// iteration bounds.
    pub fn set_debug_mode(&mut self, enabled: bool) {
        Arc::make_mut(&mut self.config).debug.enabled = enabled;
        info!(enabled, "Diagnostic mode changed");
    }

    /// Returns the flag checked between verification iterations.
    #[must_use]
    pub fn stop_flag(&self) -> Arc<StopFlag> {
        Arc::clone(&self.stop)
    }

    /// Returns a snapshot for status displays.
    #[must_use]
    pub fn current_state(&self) -> EngineState {
        let progress = self.progress.read();
        EngineState {
            current_stage: progress.current_stage.clone(),
            iteration: progress.iteration,
            max_iterations: self.retry_limit(),
            debug_mode: self.config.debug.enabled,
            total_events: progress.total_events,
        }
    }

    /// Runs every stage against a fresh context.
    ///
    /// Waits for any run already in progress on this engine. A stop
    /// request is cleared when the run starts.
    pub async fn run(&self, initial_input: Value) -> WorkflowOutcome {
        let _running = self.run_lock.lock().await;
        let started = Instant::now();
        let mut ctx = WorkflowContext::new(Arc::clone(&self.config), Arc::clone(&self.memory))
            .with_agents(&self.agents)
            .with_input(initial_input);
        self.stop.reset();
        *self.progress.write() = Progress::default();

        let limit = self.retry_limit();
        info!(
            run_id = %ctx.run_id(),
            stages = self.stages.len(),
            max_iterations = %limit,
            "Starting workflow"
        );

        for stage in &self.stages {
            ctx.set_current_stage(Some(stage.name()));
            self.sync_progress(&ctx);

            if let Err(error) = self.execute_stage(stage.as_ref(), &mut ctx, limit).await {
                self.emit(&mut ctx, WorkflowEvent::run_error(&error)).await;
                return self.finish(ctx, RunStatus::Error, started, Some(&error));
            }

            if ctx.is_aborted() {
                return self.finish(ctx, RunStatus::Aborted, started, None);
            }
        }

        self.finish(ctx, RunStatus::Success, started, None)
    }

    async fn execute_stage(
        &self,
        stage: &dyn Stage,
        ctx: &mut WorkflowContext,
        limit: IterationLimit,
    ) -> Result<(), StageError> {
        let name = stage.name().to_string();

        if !stage.can_execute(ctx) {
            debug!(stage = %name, "Precondition not met");
            self.emit(ctx, WorkflowEvent::stage_skipped(&name, "Conditions not met"))
                .await;
            return Ok(());
        }

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            self.emit(ctx, WorkflowEvent::stage_start(&name, stage.kind(), attempt))
                .await;

            let result = match stage.execute(ctx).await {
                Ok(result) => result,
                Err(err) => {
                    error!(stage = %name, attempt, error = %err, kind = err.kind(), "Stage raised");
                    stage.on_failure(ctx, &err).await;
                    self.emit(ctx, WorkflowEvent::stage_error(&name, &err)).await;
                    return Err(err);
                }
            };

            let failed = result.is_failed();
            let end = WorkflowEvent::stage_end(&name, &result);
            ctx.record_result(&name, result);
            self.emit(ctx, end).await;

            if !failed {
                return Ok(());
            }
            match self.handle_stage_failure(&name, ctx, limit).await {
                FailureResolution::Retry => debug!(stage = %name, next_attempt = attempt + 1, "Retrying"),
                FailureResolution::Settled => return Ok(()),
            }
        }
    }

    async fn handle_stage_failure(
        &self,
        name: &str,
        ctx: &mut WorkflowContext,
        limit: IterationLimit,
    ) -> FailureResolution {
        let Some(handler) = &self.intervention_handler else {
            return FailureResolution::Settled;
        };
        if !handler.should_intervene(ctx).await {
            return FailureResolution::Settled;
        }

        let reason = ctx.stage_result(name).and_then(|r| r.error.clone());
        self.emit(ctx, WorkflowEvent::intervention_start(name, reason.as_deref()))
            .await;
        let decision = handler.handle_intervention(ctx).await;
        self.emit(ctx, WorkflowEvent::intervention_end(name, decision.to_event_data()))
            .await;

        match decision.action() {
            InterventionAction::Abort => {
                ctx.mark_aborted();
                self.emit(ctx, WorkflowEvent::workflow_aborted(name)).await;
                FailureResolution::Settled
            }
            InterventionAction::Retry => {
                let iteration = ctx.advance_iteration();
                self.sync_progress(ctx);
                if limit.allows(iteration) {
                    for (kind, instruction) in &decision.instructions {
                        match ctx.agent(*kind) {
                            Some(agent) => agent.inject_instruction(instruction),
                            None => warn!(agent = %kind, "Instruction for unregistered agent dropped"),
                        }
                    }
                    info!(stage = name, iteration, max_iterations = %limit, "Retry requested");
                    FailureResolution::Retry
                } else {
                    warn!(stage = name, iteration, "Max iterations reached");
                    self.emit(ctx, WorkflowEvent::max_iterations_reached(name, iteration))
                        .await;
                    FailureResolution::Settled
                }
            }
            InterventionAction::Skip => {
                self.emit(ctx, WorkflowEvent::stage_skipped_by_user(name)).await;
                FailureResolution::Settled
            }
            InterventionAction::Continue => FailureResolution::Settled,
        }
    }

    /// Records an event, then hands it to every reporter.
    async fn emit(&self, ctx: &mut WorkflowContext, event: WorkflowEvent) {
        ctx.add_event(event);
        if let Some(event) = ctx.history().last() {
            for reporter in &self.reporters {
                if let Err(e) = reporter.report(event).await {
                    warn!(
                        reporter = reporter.name(),
                        event_type = %event.event_type,
                        error = %e,
                        "Reporter failed"
                    );
                }
            }
        }
        self.sync_progress(ctx);
    }

    fn sync_progress(&self, ctx: &WorkflowContext) {
        let mut progress = self.progress.write();
        progress.current_stage = ctx.current_stage().map(str::to_string);
        progress.iteration = ctx.iteration();
        progress.total_events = ctx.history().len();
    }

    fn finish(
        &self,
        mut ctx: WorkflowContext,
        status: RunStatus,
        started: Instant,
        error: Option<&StageError>,
    ) -> WorkflowOutcome {
        ctx.set_current_stage(None);
        self.sync_progress(&ctx);

        let (output, error, error_kind) = match status {
            RunStatus::Success => (ctx.final_output().cloned(), None, None),
            RunStatus::Aborted => (None, Some(ABORTED_MESSAGE.to_string()), None),
            RunStatus::Error => (
                None,
                error.map(ToString::to_string),
                error.map(|e| e.kind().to_string()),
            ),
        };

        let outcome = WorkflowOutcome {
            run_id: ctx.run_id(),
            status,
            output,
            error,
            error_kind,
            results: ctx.results().clone(),
            iterations: ctx.iteration(),
            history: ctx.history().to_vec(),
            duration: started.elapsed(),
        };
        info!(
            run_id = %outcome.run_id,
            status = %outcome.status,
            iterations = outcome.iterations,
            duration = %outcome.duration_display(),
            "Workflow finished"
        );
        outcome
    }
}

impl fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("stages", &self.stage_names())
            .field("reporters", &self.reporters.len())
            .field("intervention_handler", &self.intervention_handler)
            .field("agents", &self.agents.keys().collect::<Vec<_>>())
            .field("memory", &self.memory)
            .field("max_iterations", &self.retry_limit())
            .finish_non_exhaustive()
    }
}
