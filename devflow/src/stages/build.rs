//! Coding stage.

use super::{agent_failure, invalid_artifact, Stage, ARCHITECTURE_DESIGN, CODING};
use crate::agents::{AgentAction, AgentKind, AgentResponse, FileSet};
use crate::context::WorkflowContext;
use crate::core::{StageKind, StageResult};
use crate::errors::StageError;
use crate::workspace::{Category, Workspace};
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

/// Produces code and checks from the architecture document.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodingStage;

impl CodingStage {
    /// Creates the stage.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

async fn save_all(
    memory: &dyn Workspace,
    category: Category,
    files: &FileSet,
) -> Result<(), StageError> {
    for (name, content) in files {
        memory.save(category, name, content).await?;
    }
    info!(category = %category, count = files.len(), "Files saved");
    Ok(())
}

#[async_trait]
impl Stage for CodingStage {
    fn name(&self) -> &str {
        CODING
    }

    fn kind(&self) -> StageKind {
        StageKind::Build
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> Result<StageResult, StageError> {
        let Some(developer) = ctx.agent(AgentKind::Developer) else {
            return Ok(StageResult::failed("Developer agent not found"));
        };

        let architecture_doc = ctx
            .stage_result(ARCHITECTURE_DESIGN)
            .filter(|r| r.is_success())
            .and_then(|r| r.get_str("document"))
            .map(str::to_string);
        let Some(architecture_doc) = architecture_doc else {
            return Ok(StageResult::failed("Architecture design not completed"));
        };

        let memory = ctx.memory();

        let code_files = match developer
            .process(AgentAction::Implement { architecture_doc })
            .await
            .and_then(AgentResponse::into_files)
        {
            Ok(files) => files,
            Err(e) => return Ok(agent_failure(&e)),
        };
        if let Some(failed) = invalid_artifact(&code_files) {
            return Ok(failed);
        }
        save_all(memory.as_ref(), Category::Code, &code_files).await?;

        let test_files = match developer
            .process(AgentAction::WriteTests {
                code_files: code_files.clone(),
            })
            .await
            .and_then(AgentResponse::into_files)
        {
            Ok(files) => files,
            Err(e) => return Ok(agent_failure(&e)),
        };
        if let Some(failed) = invalid_artifact(&test_files) {
            return Ok(failed);
        }
        save_all(memory.as_ref(), Category::Tests, &test_files).await?;

        Ok(StageResult::success_empty()
            .with_output("code_files", json!(code_files))
            .with_output("test_files", json!(test_files)))
    }
}
