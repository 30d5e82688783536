//! Engine builder with validation.

use super::{Progress, WorkflowEngine};
use crate::agents::{Agent, AgentKind};
use crate::cancellation::StopFlag;
use crate::config::WorkflowConfig;
use crate::diagnosis::AgentDiagnoser;
use crate::errors::BuildError;
use crate::intervention::InterventionHandler;
use crate::reporters::{LoggingReporter, Reporter};
use crate::stages::{
    ArchitectureDesignStage, CodingStage, PackagingStage, RequirementAnalysisStage, Stage,
    TestingStage,
};
use crate::workspace::{InMemoryWorkspace, Workspace};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Assembles a [`WorkflowEngine`].
pub struct WorkflowBuilder {
    stages: Vec<Arc<dyn Stage>>,
    reporters: Vec<Arc<dyn Reporter>>,
    intervention_handler: Option<Arc<dyn InterventionHandler>>,
    agents: HashMap<AgentKind, Arc<dyn Agent>>,
    memory: Option<Arc<dyn Workspace>>,
    config: WorkflowConfig,
    stop: Arc<StopFlag>,
}

impl Default for WorkflowBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowBuilder {
    /// Creates an empty builder with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            reporters: Vec::new(),
            intervention_handler: None,
            agents: HashMap::new(),
            memory: None,
            config: WorkflowConfig::default(),
            stop: Arc::new(StopFlag::new()),
        }
    }

    /// Creates a builder wired with the five standard stages, a
    /// diagnoser backed by the QA agent and a logging reporter.
    #[must_use]
    pub fn standard(
        config: WorkflowConfig,
        agents: impl IntoIterator<Item = Arc<dyn Agent>>,
        workspace: Arc<dyn Workspace>,
    ) -> Self {
        let mut builder = Self::new().with_config(config).workspace(workspace);
        for agent in agents {
            builder = builder.agent(agent);
        }

        let mut testing = TestingStage::new().with_stop_flag(Arc::clone(&builder.stop));
        if let Some(qa) = builder.agents.get(&AgentKind::Qa) {
            testing = testing.with_diagnoser(Arc::new(AgentDiagnoser::new(Arc::clone(qa))));
        }

        builder
            .stage(Arc::new(RequirementAnalysisStage::new()))
            .stage(Arc::new(ArchitectureDesignStage::new()))
            .stage(Arc::new(CodingStage::new()))
            .stage(Arc::new(testing))
            .stage(Arc::new(PackagingStage::new()))
            .reporter(Arc::new(LoggingReporter::new()))
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    /// Appends a stage.
    #[must_use]
    pub fn stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Appends a reporter.
    #[must_use]
    pub fn reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporters.push(reporter);
        self
    }

    /// Sets the intervention handler.
    #[must_use]
    pub fn intervention_handler(mut self, handler: Arc<dyn InterventionHandler>) -> Self {
        self.intervention_handler = Some(handler);
        self
    }

    /// Registers an agent under its kind.
    #[must_use]
    pub fn agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agents.insert(agent.kind(), agent);
        self
    }

    /// Sets the workspace. Defaults to an in-memory workspace.
    #[must_use]
    pub fn workspace(mut self, workspace: Arc<dyn Workspace>) -> Self {
        self.memory = Some(workspace);
        self
    }

    /// Sets `workflow.max_iterations`.
    #[must_use]
    pub fn max_iterations(mut self, max_iterations: u32) -> Self {
        self.config.workflow.max_iterations = max_iterations;
        self
    }

    /// Sets `debug.enabled`.
    #[must_use]
    pub fn debug_mode(mut self, enabled: bool) -> Self {
        self.config.debug.enabled = enabled;
        self
    }

    /// Validates and builds the engine.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::NoStages` if no stage was added, or
    /// `BuildError::DuplicateStage` if two stages share a name.
    pub fn build(self) -> Result<WorkflowEngine, BuildError> {
        if self.stages.is_empty() {
            return Err(BuildError::NoStages);
        }
        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.name()) {
                return Err(BuildError::DuplicateStage(stage.name().to_string()));
            }
        }

        tracing::debug!(
            stages = self.stages.len(),
            reporters = self.reporters.len(),
            has_handler = self.intervention_handler.is_some(),
            "Built workflow engine"
        );

        Ok(WorkflowEngine {
            stages: self.stages,
            reporters: self.reporters,
            intervention_handler: self.intervention_handler,
            agents: self.agents,
            memory: self
                .memory
                .unwrap_or_else(|| Arc::new(InMemoryWorkspace::new())),
            config: Arc::new(self.config),
            stop: self.stop,
            progress: RwLock::new(Progress::default()),
            run_lock: tokio::sync::Mutex::new(()),
        })
    }
}

impl fmt::Debug for WorkflowBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowBuilder")
            .field("stages", &self.stages.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("reporters", &self.reporters.len())
            .field("agents", &self.agents.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
