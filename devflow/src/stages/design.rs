//! Architecture design stage.

use super::{agent_failure, Stage, ARCHITECTURE_DESIGN, REQUIREMENT_ANALYSIS};
use crate::agents::{AgentAction, AgentKind, AgentResponse};
use crate::context::WorkflowContext;
use crate::core::{StageKind, StageResult};
use crate::errors::StageError;
use crate::workspace::Category;
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

/// Artifact name of the architecture document.
pub const ARCHITECTURE_DOC: &str = "architecture.md";

/// Turns the requirement document into an architecture document.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchitectureDesignStage;

impl ArchitectureDesignStage {
    /// Creates the stage.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Stage for ArchitectureDesignStage {
    fn name(&self) -> &str {
        ARCHITECTURE_DESIGN
    }

    fn kind(&self) -> StageKind {
        StageKind::Design
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> Result<StageResult, StageError> {
        let Some(architect) = ctx.agent(AgentKind::Architect) else {
            return Ok(StageResult::failed("Architect agent not found"));
        };

        let requirement_doc = ctx
            .stage_result(REQUIREMENT_ANALYSIS)
            .filter(|r| r.is_success())
            .and_then(|r| r.get_str("document"))
            .map(str::to_string);
        let Some(requirement_doc) = requirement_doc else {
            return Ok(StageResult::failed("Requirement analysis not completed"));
        };

        let document = match architect
            .process(AgentAction::DesignArchitecture { requirement_doc })
            .await
            .and_then(AgentResponse::into_document)
        {
            Ok(document) => document,
            Err(e) => return Ok(agent_failure(&e)),
        };

        let location = ctx
            .memory()
            .save(Category::Design, ARCHITECTURE_DOC, &document)
            .await?;
        info!(location = %location, "Architecture document saved");

        Ok(StageResult::success_empty().with_output("document", json!(document)))
    }
}
