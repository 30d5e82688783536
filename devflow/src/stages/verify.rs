//! Testing stage with its own verify, diagnose and fix loop.
//!
//! Each inner iteration runs the checks; on failure it diagnoses the
//! report, asks the developer agent for fixes and writes the fixed files
//! back to the code category. One [`IterationRecord`] is appended to the
//! iteration log per inner iteration, including iterations that end the
//! stage early. Record numbers continue from the highest number already
//! in the log.
//!
//! This loop is bounded separately from the engine's intervention retries.

use super::{invalid_artifact, Stage, CODING, TESTING};
use crate::agents::{AgentAction, AgentKind, AgentResponse, TestReport};
use crate::cancellation::StopFlag;
use crate::config::IterationLimit;
use crate::context::WorkflowContext;
use crate::core::{StageKind, StageResult};
use crate::diagnosis::{Diagnoser, Diagnosis};
use crate::errors::{AgentError, StageError};
use crate::iteration_log::{IterationLog, IterationRecord};
use crate::workspace::Category;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Runs the checks and drives the fix loop until they pass.
pub struct TestingStage {
    diagnoser: Option<Arc<dyn Diagnoser>>,
    limit: Option<IterationLimit>,
    log: Option<IterationLog>,
    stop: Arc<StopFlag>,
}

impl Default for TestingStage {
    fn default() -> Self {
        Self::new()
    }
}

impl TestingStage {
    /// Creates a stage with no diagnoser, the configured bound and the
    /// workspace's default iteration log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            diagnoser: None,
            limit: None,
            log: None,
            stop: Arc::new(StopFlag::new()),
        }
    }

    /// Sets the failure diagnoser.
    #[must_use]
    pub fn with_diagnoser(mut self, diagnoser: Arc<dyn Diagnoser>) -> Self {
        self.diagnoser = Some(diagnoser);
        self
    }

    /// Overrides `workflow.verification_max_iterations`.
    #[must_use]
    pub fn with_limit(mut self, limit: IterationLimit) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Writes iteration records to the given log.
    #[must_use]
    pub fn with_log(mut self, log: IterationLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Shares a stop flag with the caller.
    #[must_use]
    pub fn with_stop_flag(mut self, stop: Arc<StopFlag>) -> Self {
        self.stop = stop;
        self
    }

    /// Returns the stop flag checked between inner iterations.
    #[must_use]
    pub fn stop_flag(&self) -> Arc<StopFlag> {
        Arc::clone(&self.stop)
    }

    async fn diagnose(&self, report: &TestReport) -> Diagnosis {
        let Some(diagnoser) = &self.diagnoser else {
            return Diagnosis::unknown(report);
        };
        match diagnoser.diagnose(report).await {
            Ok(diagnosis) => diagnosis,
            Err(e) => {
                warn!(error = %e, "Diagnosis failed, using generic classification");
                Diagnosis::unknown(report)
            }
        }
    }

    async fn record(
        log: Option<&IterationLog>,
        record: IterationRecord,
    ) -> Result<(), StageError> {
        if let Some(log) = log {
            log.append(&record).await?;
        }
        Ok(())
    }
}

impl fmt::Debug for TestingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestingStage")
            .field("has_diagnoser", &self.diagnoser.is_some())
            .field("limit", &self.limit)
            .field("log", &self.log)
            .field("stop", &self.stop)
            .finish()
    }
}

fn report_output(report: &TestReport) -> HashMap<String, Value> {
    match serde_json::to_value(report) {
        Ok(Value::Object(map)) => map.into_iter().collect(),
        _ => HashMap::new(),
    }
}

fn testing_error(error: &AgentError, iteration: u32) -> StageResult {
    StageResult::failed(format!("Testing error: {error}")).with_metadata("iterations", json!(iteration))
}

#[async_trait]
impl Stage for TestingStage {
    fn name(&self) -> &str {
        TESTING
    }

    fn kind(&self) -> StageKind {
        StageKind::Verify
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> Result<StageResult, StageError> {
        let (Some(qa), Some(developer)) = (ctx.agent(AgentKind::Qa), ctx.agent(AgentKind::Developer))
        else {
            return Ok(StageResult::failed("QA or Developer agent not found"));
        };
        if !ctx.stage_succeeded(CODING) {
            return Ok(StageResult::failed("Coding stage not completed"));
        }

        let limit = self
            .limit
            .unwrap_or_else(|| ctx.config().verification_limit());
        let memory = ctx.memory();
        let log = self
            .log
            .clone()
            .or_else(|| memory.root().map(IterationLog::in_workspace));
        let numbered_from = match &log {
            Some(log) => log.last_iteration().await?,
            None => 0,
        };

        let mut attempts: u32 = 0;
        let mut last_report: Option<TestReport> = None;
        let mut stopped = false;

        loop {
            if self.stop.is_requested() {
                info!(attempts, reason = ?self.stop.reason(), "Verification loop stopped");
                stopped = true;
                break;
            }
            if !limit.allows(attempts) {
                break;
            }
            attempts += 1;
            let iteration = numbered_from + attempts;
            debug!(iteration, attempts, limit = %limit, "Running checks");

            let report = match qa
                .process(AgentAction::RunTests {
                    code_dir: memory.location(Category::Code),
                    test_dir: memory.location(Category::Tests),
                })
                .await
                .and_then(AgentResponse::into_test_report)
            {
                Ok(report) => report,
                Err(e) => {
                    Self::record(log.as_ref(), IterationRecord::from_runner_error(iteration, &e))
                        .await?;
                    return Ok(testing_error(&e, attempts));
                }
            };

            if report.passed {
                Self::record(log.as_ref(), IterationRecord::from_report(iteration, &report)).await?;
                info!(iteration, total = report.total, "Checks passed");
                return Ok(StageResult::success(report_output(&report))
                    .with_metadata("iterations", json!(attempts)));
            }

            info!(
                iteration,
                total = report.total,
                failed = report.failed,
                "Checks failed, diagnosing"
            );
            let diagnosis = self.diagnose(&report).await;
            ctx.set_last_diagnosis(diagnosis.clone());

            let fixed = developer
                .process(AgentAction::FixIssues {
                    test_report: report.clone(),
                    diagnosis: diagnosis.clone(),
                })
                .await
                .and_then(AgentResponse::into_files);
            let unapplied = IterationRecord::from_report(iteration, &report).with_analysis(diagnosis);
            let fixed = match fixed {
                Ok(files) => files,
                Err(e) => {
                    Self::record(log.as_ref(), unapplied).await?;
                    return Ok(testing_error(&e, attempts));
                }
            };
            if let Some(failed) = invalid_artifact(&fixed) {
                Self::record(log.as_ref(), unapplied).await?;
                return Ok(failed.with_metadata("iterations", json!(attempts)));
            }

            let mut fixed_names = Vec::with_capacity(fixed.len());
            for (name, content) in &fixed {
                memory.save(Category::Code, name, content).await?;
                fixed_names.push(name.clone());
            }
            debug!(iteration, files = ?fixed_names, "Applied fixes");

            Self::record(log.as_ref(), unapplied.with_fixed_files(fixed_names)).await?;
            last_report = Some(report);
        }

        let error = if stopped {
            format!("Testing stopped after {attempts} iterations")
        } else {
            format!("Tests failed after {attempts} iterations")
        };
        warn!(attempts, stopped, "Verification loop ended without passing");

        let output = last_report.as_ref().map(report_output).unwrap_or_default();
        let mut result = StageResult::failed(error)
            .with_metadata("iterations", json!(attempts))
            .with_metadata("stopped", json!(stopped));
        result.output = output;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkflowConfig;
    use crate::diagnosis::MockDiagnoser;
    use crate::testing::ScriptedAgent;
    use crate::workspace::{FsWorkspace, InMemoryWorkspace, Workspace};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn fixes(name: &str, content: &str) -> AgentResponse {
        AgentResponse::Files(BTreeMap::from([(name.to_string(), content.to_string())]))
    }

    fn context(
        workspace: Arc<dyn Workspace>,
        qa: ScriptedAgent,
        developer: ScriptedAgent,
    ) -> WorkflowContext {
        let mut ctx = WorkflowContext::new(Arc::new(WorkflowConfig::default()), workspace)
            .with_agent(Arc::new(qa))
            .with_agent(Arc::new(developer));
        ctx.record_result(CODING, StageResult::success_empty());
        ctx
    }

    #[tokio::test]
    async fn test_passes_first_time() {
        let qa = ScriptedAgent::new(AgentKind::Qa)
            .respond("run_tests", AgentResponse::TestReport(TestReport::passing(4)));
        let developer = ScriptedAgent::new(AgentKind::Developer);
        let mut ctx = context(Arc::new(InMemoryWorkspace::new()), qa, developer);

        let result = TestingStage::new().execute(&mut ctx).await.unwrap();

        assert!(result.is_success());
        assert_eq!(result.get("total"), Some(&json!(4)));
        assert_eq!(result.metadata.get("iterations"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_fix_loop_until_pass_writes_one_record_per_iteration() {
        let dir = TempDir::new().unwrap();
        let workspace = Arc::new(FsWorkspace::open(dir.path()).await.unwrap());
        let qa = ScriptedAgent::new(AgentKind::Qa)
            .respond("run_tests", AgentResponse::TestReport(TestReport::failing(3, 2, "E assert")))
            .respond("run_tests", AgentResponse::TestReport(TestReport::failing(3, 1, "E assert")))
            .respond("run_tests", AgentResponse::TestReport(TestReport::passing(3)));
        let developer =
            ScriptedAgent::new(AgentKind::Developer).respond("fix_issues", fixes("calc.py", "fixed"));
        let mut ctx = context(workspace.clone(), qa, developer);

        let result = TestingStage::new()
            .with_limit(IterationLimit::Bounded(5))
            .execute(&mut ctx)
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.metadata.get("iterations"), Some(&json!(3)));
        assert_eq!(workspace.load(Category::Code, "calc.py").await.unwrap(), "fixed");

        let records = IterationLog::in_workspace(dir.path()).read_all().await.unwrap();
        assert_eq!(records.iter().map(|r| r.iteration).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(records[0].fixed_files, vec!["calc.py"]);
        assert!(records[0].analysis.as_ref().unwrap().is_unknown());
        assert!(records[2].test_passed);
        assert!(records[2].analysis.is_none());
    }

    #[tokio::test]
    async fn test_bound_exhausted() {
        let qa = ScriptedAgent::new(AgentKind::Qa)
            .respond("run_tests", AgentResponse::TestReport(TestReport::failing(2, 2, "boom")));
        let developer =
            ScriptedAgent::new(AgentKind::Developer).respond("fix_issues", fixes("a.py", "x"));
        let mut ctx = context(Arc::new(InMemoryWorkspace::new()), qa, developer);

        let result = TestingStage::new()
            .with_limit(IterationLimit::Bounded(2))
            .execute(&mut ctx)
            .await
            .unwrap();

        assert!(result.is_failed());
        assert_eq!(result.error.as_deref(), Some("Tests failed after 2 iterations"));
        assert_eq!(result.get("failed"), Some(&json!(2)));
        assert!(ctx.last_diagnosis().is_some());
    }

    #[tokio::test]
    async fn test_uses_configured_verification_bound() {
        let qa = ScriptedAgent::new(AgentKind::Qa)
            .respond("run_tests", AgentResponse::TestReport(TestReport::failing(1, 1, "")));
        let developer =
            ScriptedAgent::new(AgentKind::Developer).respond("fix_issues", fixes("a.py", "x"));
        let config = WorkflowConfig::from_yaml_str(
            "workflow:\n  max_iterations: 5\n  verification_max_iterations: 1\n",
        )
        .unwrap();
        let mut ctx = WorkflowContext::new(Arc::new(config), Arc::new(InMemoryWorkspace::new()))
            .with_agent(Arc::new(qa))
            .with_agent(Arc::new(developer));
        ctx.record_result(CODING, StageResult::success_empty());

        let result = TestingStage::new().execute(&mut ctx).await.unwrap();
        assert_eq!(result.metadata.get("iterations"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_diagnoser_failure_degrades_to_unknown() {
        let mut diagnoser = MockDiagnoser::new();
        diagnoser
            .expect_diagnose()
            .times(1)
            .returning(|_| Err(AgentError::failed("qa", "model offline")));

        let qa = ScriptedAgent::new(AgentKind::Qa)
            .respond("run_tests", AgentResponse::TestReport(TestReport::failing(1, 1, "trace")))
            .respond("run_tests", AgentResponse::TestReport(TestReport::passing(1)));
        let developer =
            ScriptedAgent::new(AgentKind::Developer).respond("fix_issues", fixes("a.py", "x"));
        let mut ctx = context(Arc::new(InMemoryWorkspace::new()), qa, developer);

        let result = TestingStage::new()
            .with_diagnoser(Arc::new(diagnoser))
            .execute(&mut ctx)
            .await
            .unwrap();

        assert!(result.is_success());
        let diagnosis = ctx.last_diagnosis().unwrap();
        assert!(diagnosis.is_unknown());
        assert_eq!(diagnosis.root_cause, "trace");
    }

    #[tokio::test]
    async fn test_diagnosis_is_forwarded_to_fix_request() {
        let mut diagnoser = MockDiagnoser::new();
        diagnoser
            .expect_diagnose()
            .returning(|_| Ok(Diagnosis::new("ImportError", "missing module")));

        let qa = ScriptedAgent::new(AgentKind::Qa)
            .respond("run_tests", AgentResponse::TestReport(TestReport::failing(1, 1, "")))
            .respond("run_tests", AgentResponse::TestReport(TestReport::passing(1)));
        let developer = Arc::new(
            ScriptedAgent::new(AgentKind::Developer).respond("fix_issues", fixes("a.py", "x")),
        );
        let mut ctx = WorkflowContext::new(
            Arc::new(WorkflowConfig::default()),
            Arc::new(InMemoryWorkspace::new()),
        )
        .with_agent(Arc::new(qa))
        .with_agent(developer.clone());
        ctx.record_result(CODING, StageResult::success_empty());

        TestingStage::new()
            .with_diagnoser(Arc::new(diagnoser))
            .execute(&mut ctx)
            .await
            .unwrap();

        let calls = developer.calls();
        assert_eq!(calls.len(), 1);
        let AgentAction::FixIssues { diagnosis, .. } = &calls[0] else {
            panic!("expected fix_issues, got {:?}", calls[0]);
        };
        assert_eq!(diagnosis.error_type, "ImportError");
    }

    #[tokio::test]
    async fn test_stop_flag_checked_between_iterations() {
        let stage = TestingStage::new().with_limit(IterationLimit::Unbounded);
        let flag = stage.stop_flag();

        let mut diagnoser = MockDiagnoser::new();
        diagnoser.expect_diagnose().times(1).returning(move |report| {
            flag.request("operator");
            Ok(Diagnosis::unknown(report))
        });
        let stage = stage.with_diagnoser(Arc::new(diagnoser));

        let qa = ScriptedAgent::new(AgentKind::Qa)
            .respond("run_tests", AgentResponse::TestReport(TestReport::failing(1, 1, "")));
        let developer =
            ScriptedAgent::new(AgentKind::Developer).respond("fix_issues", fixes("a.py", "x"));
        let mut ctx = context(Arc::new(InMemoryWorkspace::new()), qa, developer);

        let result = stage.execute(&mut ctx).await.unwrap();

        assert!(result.is_failed());
        assert_eq!(result.error.as_deref(), Some("Testing stopped after 1 iterations"));
        assert_eq!(result.metadata.get("stopped"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_requires_coding_success() {
        let mut ctx = WorkflowContext::new(
            Arc::new(WorkflowConfig::default()),
            Arc::new(InMemoryWorkspace::new()),
        )
        .with_agent(Arc::new(ScriptedAgent::new(AgentKind::Qa)))
        .with_agent(Arc::new(ScriptedAgent::new(AgentKind::Developer)));

        let result = TestingStage::new().execute(&mut ctx).await.unwrap();
        assert_eq!(result.error.as_deref(), Some("Coding stage not completed"));
    }

    #[tokio::test]
    async fn test_runner_error_is_expected_failure() {
        let qa = ScriptedAgent::new(AgentKind::Qa)
            .fail("run_tests", AgentError::failed("qa", "pytest not installed"));
        let developer = ScriptedAgent::new(AgentKind::Developer);
        let mut ctx = context(Arc::new(InMemoryWorkspace::new()), qa, developer);

        let result = TestingStage::new().execute(&mut ctx).await.unwrap();
        assert!(result.error.unwrap().starts_with("Testing error:"));
    }

    #[tokio::test]
    async fn test_runner_error_is_logged_as_an_iteration() {
        let dir = TempDir::new().unwrap();
        let workspace = Arc::new(FsWorkspace::open(dir.path()).await.unwrap());
        let qa = ScriptedAgent::new(AgentKind::Qa)
            .fail("run_tests", AgentError::failed("qa", "pytest not installed"));
        let mut ctx = context(workspace, qa, ScriptedAgent::new(AgentKind::Developer));

        let result = TestingStage::new().execute(&mut ctx).await.unwrap();
        assert!(result.is_failed());

        let records = IterationLog::in_workspace(dir.path()).read_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records[0].test_passed);
        assert_eq!(
            records[0].test_output.as_deref(),
            Some("Agent qa failed: pytest not installed")
        );
    }

    #[tokio::test]
    async fn test_escaping_fix_name_is_expected_failure() {
        let dir = TempDir::new().unwrap();
        let workspace = Arc::new(FsWorkspace::open(dir.path()).await.unwrap());
        let qa = ScriptedAgent::new(AgentKind::Qa)
            .respond("run_tests", AgentResponse::TestReport(TestReport::failing(1, 1, "boom")));
        let developer = ScriptedAgent::new(AgentKind::Developer)
            .respond("fix_issues", fixes("../escape.py", "x"));
        let mut ctx = context(workspace, qa, developer);

        let result = TestingStage::new().execute(&mut ctx).await.unwrap();

        assert!(result.is_failed());
        assert_eq!(result.error.as_deref(), Some("Invalid artifact name: '../escape.py'"));
        assert_eq!(result.metadata.get("iterations"), Some(&json!(1)));
        assert!(!dir.path().join("escape.py").exists());

        let records = IterationLog::in_workspace(dir.path()).read_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].analysis.is_some());
        assert!(records[0].fixed_files.is_empty());
    }

    #[tokio::test]
    async fn test_numbering_continues_across_executions() {
        let dir = TempDir::new().unwrap();
        let workspace: Arc<dyn Workspace> = Arc::new(FsWorkspace::open(dir.path()).await.unwrap());
        let stage = TestingStage::new().with_limit(IterationLimit::Bounded(2));

        for _ in 0..2 {
            let qa = ScriptedAgent::new(AgentKind::Qa)
                .respond("run_tests", AgentResponse::TestReport(TestReport::failing(1, 1, "")));
            let developer =
                ScriptedAgent::new(AgentKind::Developer).respond("fix_issues", fixes("a.py", "x"));
            let mut ctx = context(Arc::clone(&workspace), qa, developer);

            let result = stage.execute(&mut ctx).await.unwrap();
            assert_eq!(result.error.as_deref(), Some("Tests failed after 2 iterations"));
        }

        let records = IterationLog::in_workspace(dir.path()).read_all().await.unwrap();
        assert_eq!(records.iter().map(|r| r.iteration).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    }
}
