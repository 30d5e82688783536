//! Packaging stage.

use super::{agent_failure, Stage, PACKAGING, TESTING};
use crate::agents::{AgentAction, AgentKind, AgentResponse};
use crate::context::{WorkflowContext, FINAL_OUTPUT_KEY};
use crate::core::{StageKind, StageResult};
use crate::errors::StageError;
use crate::workspace::Category;
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

/// Packages the verified code. Only runs once the testing stage passed.
#[derive(Debug, Clone, Copy, Default)]
pub struct PackagingStage;

impl PackagingStage {
    /// Creates the stage.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Stage for PackagingStage {
    fn name(&self) -> &str {
        PACKAGING
    }

    fn kind(&self) -> StageKind {
        StageKind::Release
    }

    fn can_execute(&self, ctx: &WorkflowContext) -> bool {
        ctx.stage_succeeded(TESTING)
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> Result<StageResult, StageError> {
        let Some(qa) = ctx.agent(AgentKind::Qa) else {
            return Ok(StageResult::failed("QA agent not found"));
        };
        if !ctx.stage_succeeded(TESTING) {
            return Ok(StageResult::failed("Testing stage not passed"));
        }

        let code_dir = ctx.memory().location(Category::Code);
        let package_path = match qa
            .process(AgentAction::PackageRelease { code_dir })
            .await
            .and_then(AgentResponse::into_package)
        {
            Ok(path) => path,
            Err(e) => return Ok(agent_failure(&e)),
        };

        info!(package = %package_path, "Release packaged");
        ctx.set(FINAL_OUTPUT_KEY, json!(package_path))?;

        Ok(StageResult::success_empty().with_output("package_path", json!(package_path)))
    }
}
