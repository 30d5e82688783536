//! Requirement analysis stage.

use super::{agent_failure, Stage, REQUIREMENT_ANALYSIS};
use crate::agents::{AgentAction, AgentKind, AgentResponse};
use crate::context::WorkflowContext;
use crate::core::{StageKind, StageResult};
use crate::errors::StageError;
use crate::workspace::Category;
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

/// Artifact name of the requirement document.
pub const REQUIREMENT_DOC: &str = "requirement.md";

/// Turns `initial_input.requirement` into a requirement document.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequirementAnalysisStage;

impl RequirementAnalysisStage {
    /// Creates the stage.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Stage for RequirementAnalysisStage {
    fn name(&self) -> &str {
        REQUIREMENT_ANALYSIS
    }

    fn kind(&self) -> StageKind {
        StageKind::Analysis
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> Result<StageResult, StageError> {
        let Some(architect) = ctx.agent(AgentKind::Architect) else {
            return Ok(StageResult::failed("Architect agent not found"));
        };

        let requirement = ctx
            .initial_input()
            .get("requirement")
            .and_then(serde_json::Value::as_str)
            .filter(|r| !r.trim().is_empty())
            .map(str::to_string);
        let Some(requirement) = requirement else {
            return Ok(StageResult::failed("No requirement provided"));
        };

        let document = match architect
            .process(AgentAction::AnalyzeRequirement { requirement })
            .await
            .and_then(AgentResponse::into_document)
        {
            Ok(document) => document,
            Err(e) => return Ok(agent_failure(&e)),
        };

        let location = ctx
            .memory()
            .save(Category::Requirements, REQUIREMENT_DOC, &document)
            .await?;
        info!(location = %location, "Requirement document saved");

        Ok(StageResult::success_empty().with_output("document", json!(document)))
    }
}
