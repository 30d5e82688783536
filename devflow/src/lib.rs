//! # Devflow
//!
//! A stage-sequencing engine for automated "produce, verify, diagnose, fix"
//! development loops.
//!
//! Devflow provides:
//!
//! - **Ordered stage execution**: stages run strictly in sequence against a
//!   shared, run-scoped context
//! - **Intervention protocol**: a failed stage can be retried with
//!   corrective guidance, skipped, or the run aborted
//! - **Bounded retries**: outer intervention retries and the inner
//!   verify/fix loop are both bounded, except in diagnostic mode
//! - **Durable iteration log**: one JSON line per verify/fix iteration
//! - **Event history**: every occurrence is recorded and forwarded to
//!   reporters, whose failures never affect a run
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use devflow::prelude::*;
//!
//! let workspace = Arc::new(FsWorkspace::open("./workspace").await?);
//! let engine = WorkflowBuilder::standard(config, agents, workspace)
//!     .intervention_handler(Arc::new(AutoRetryHandler::new()))
//!     .build()?;
//!
//! let outcome = engine.run(json!({"requirement": "a calculator"})).await;
//! println!("{} in {}", outcome.status, outcome.duration_display());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod agents;
pub mod cancellation;
pub mod config;
pub mod context;
pub mod core;
pub mod diagnosis;
pub mod engine;
pub mod errors;
pub mod intervention;
pub mod iteration_log;
pub mod reporters;
pub mod stages;
pub mod telemetry;
pub mod testing;
pub mod utils;
pub mod workspace;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::agents::{
        Agent, AgentAction, AgentInfo, AgentKind, AgentResponse, FileSet, InstructionWindow,
        TestReport,
    };
    pub use crate::cancellation::StopFlag;
    pub use crate::config::{IterationLimit, WorkflowConfig};
    pub use crate::context::WorkflowContext;
    pub use crate::core::{
        RunStatus, StageKind, StageResult, StageStatus, WorkflowEvent, WorkflowEventType,
    };
    pub use crate::diagnosis::{AgentDiagnoser, Diagnoser, Diagnosis};
    pub use crate::engine::{EngineState, WorkflowBuilder, WorkflowEngine, WorkflowOutcome};
    pub use crate::errors::{
        AgentError, BuildError, ConfigError, ContextError, DevflowError, StageError,
        WorkspaceError,
    };
    pub use crate::intervention::{
        AutoRetryHandler, InterventionAction, InterventionDecision, InterventionHandler,
    };
    pub use crate::iteration_log::{IterationLog, IterationRecord};
    pub use crate::reporters::{ChannelReporter, LoggingReporter, Reporter};
    pub use crate::stages::{
        ArchitectureDesignStage, CodingStage, FnStage, PackagingStage, RequirementAnalysisStage,
        Stage, TestingStage,
    };
    pub use crate::workspace::{Category, FsWorkspace, InMemoryWorkspace, Workspace};
    pub use serde_json::json;
    pub use std::sync::Arc;
}
