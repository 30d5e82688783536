//! Stage trait and the standard stages.
//!
//! Stages are the units of work the engine sequences. The engine never
//! looks at a stage's identity; it only uses the contract below.

mod analysis;
mod build;
mod design;
mod release;
mod verify;

pub use analysis::RequirementAnalysisStage;
pub use build::CodingStage;
pub use design::ArchitectureDesignStage;
pub use release::PackagingStage;
pub use verify::TestingStage;

use crate::agents::FileSet;
use crate::context::WorkflowContext;
use crate::core::{StageKind, StageResult};
use crate::errors::{AgentError, StageError, WorkspaceError};
use crate::workspace::validate_name;
use async_trait::async_trait;
use std::fmt::Debug;

/// Name of the requirement analysis stage.
pub const REQUIREMENT_ANALYSIS: &str = "requirement_analysis";
/// Name of the architecture design stage.
pub const ARCHITECTURE_DESIGN: &str = "architecture_design";
/// Name of the coding stage.
pub const CODING: &str = "coding";
/// Name of the testing stage.
pub const TESTING: &str = "testing";
/// Name of the packaging stage.
pub const PACKAGING: &str = "packaging";

/// A unit of work in a run.
///
/// `execute` encodes expected failures as a `FAILED` result with `error`
/// set. Returning `Err` is reserved for conditions the run cannot recover
/// from; the engine then calls `on_failure` and ends the run with status
/// `error`.
///
/// A stage may be executed several times in one run when an intervention
/// requests a retry, so `execute` must re-read the context every time.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the stable name of the stage.
    fn name(&self) -> &str;

    /// Returns the kind of work the stage performs.
    fn kind(&self) -> StageKind {
        StageKind::General
    }

    /// Returns false to skip the stage.
    ///
    /// Must depend only on what is already in the context.
    fn can_execute(&self, ctx: &WorkflowContext) -> bool {
        let _ = ctx;
        true
    }

    /// Performs the work.
    async fn execute(&self, ctx: &mut WorkflowContext) -> Result<StageResult, StageError>;

    /// Called when `execute` returns `Err`, before the run ends.
    async fn on_failure(&self, ctx: &mut WorkflowContext, error: &StageError) {
        let _ = (ctx, error);
    }
}

/// A stage backed by a synchronous closure.
pub struct FnStage<F>
where
    F: Fn(&mut WorkflowContext) -> Result<StageResult, StageError> + Send + Sync,
{
    name: String,
    kind: StageKind,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&mut WorkflowContext) -> Result<StageResult, StageError> + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            kind: StageKind::General,
            func,
        }
    }

    /// Sets the stage kind.
    #[must_use]
    pub fn with_kind(mut self, kind: StageKind) -> Self {
        self.kind = kind;
        self
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&mut WorkflowContext) -> Result<StageResult, StageError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&mut WorkflowContext) -> Result<StageResult, StageError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        self.kind
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> Result<StageResult, StageError> {
        (self.func)(ctx)
    }
}

/// Converts an agent error into an expected stage failure.
pub(crate) fn agent_failure(error: &AgentError) -> StageResult {
    tracing::warn!(error = %error, "Agent request failed");
    StageResult::failed(error.to_string())
}

/// Fails the stage when an agent names an artifact outside its category.
///
/// Checked before anything is written, so a bad name never leaves a
/// partial set of files behind.
pub(crate) fn invalid_artifact(files: &FileSet) -> Option<StageResult> {
    let name = files.keys().find(|name| validate_name(name).is_err())?;
    tracing::warn!(name = %name, "Agent returned an invalid artifact name");
    Some(StageResult::failed(
        WorkspaceError::InvalidName(name.clone()).to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkflowConfig;
    use crate::workspace::InMemoryWorkspace;
    use serde_json::json;
    use std::sync::Arc;

    fn context() -> WorkflowContext {
        WorkflowContext::new(
            Arc::new(WorkflowConfig::default()),
            Arc::new(InMemoryWorkspace::new()),
        )
    }

    #[tokio::test]
    async fn test_fn_stage() {
        let stage = FnStage::new("double", |ctx: &mut WorkflowContext| {
            let n = ctx.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
            ctx.set("n", json!(n * 2))?;
            Ok(StageResult::success_empty())
        })
        .with_kind(StageKind::Build);

        let mut ctx = context();
        ctx.set("n", json!(21)).unwrap();

        assert_eq!(stage.name(), "double");
        assert_eq!(stage.kind(), StageKind::Build);
        assert!(stage.can_execute(&ctx));
        assert!(stage.execute(&mut ctx).await.unwrap().is_success());
        assert_eq!(ctx.get("n"), Some(json!(42)));
    }

    #[tokio::test]
    async fn test_fn_stage_error() {
        let stage = FnStage::new("broken", |_: &mut WorkflowContext| {
            Err(StageError::internal("boom"))
        });
        let mut ctx = context();

        let err = stage.execute(&mut ctx).await.unwrap_err();
        assert_eq!(err.kind(), "InternalError");
        stage.on_failure(&mut ctx, &err).await;
    }

    #[test]
    fn test_invalid_artifact_names() {
        let ok: FileSet = [("pkg/calc.py".to_string(), String::new())].into_iter().collect();
        assert!(invalid_artifact(&ok).is_none());

        let bad: FileSet = [
            ("calc.py".to_string(), String::new()),
            ("../escape.py".to_string(), String::new()),
        ]
        .into_iter()
        .collect();
        let result = invalid_artifact(&bad).unwrap();
        assert!(result.is_failed());
        assert_eq!(result.error.as_deref(), Some("Invalid artifact name: '../escape.py'"));
    }

    #[test]
    fn test_agent_failure_carries_message() {
        let result = agent_failure(&AgentError::failed("architect", "timeout"));
        assert!(result.is_failed());
        assert_eq!(result.error.as_deref(), Some("Agent architect failed: timeout"));
    }
}
