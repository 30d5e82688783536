//! Multi-module scenarios for the engine: sequencing, the intervention
//! protocol, reporter isolation and the standard five-stage workflow.

use super::*;
use crate::agents::{AgentResponse, FileSet, TestReport};
use crate::core::{StageStatus, WorkflowEventType};
use crate::diagnosis::Diagnosis;
use crate::intervention::{AutoRetryHandler, InterventionDecision};
use crate::iteration_log::IterationLog;
use crate::stages::{CODING, PACKAGING, TESTING};
use crate::testing::{
    assert_event_count, assert_event_sequence, assert_starts_closed, count_events,
    CollectingReporter, FailingReporter, ScriptedAgent, ScriptedHandler, ScriptedStage,
};
use crate::workspace::{Category, FsWorkspace, InMemoryWorkspace};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

use crate::core::WorkflowEventType::{
    InterventionEnd, InterventionStart, MaxIterationsReached, StageEnd, StageError as StageErrorEvent,
    StageSkipped, StageSkippedByUser, StageStart, WorkflowAborted,
};

fn engine_with(stages: Vec<ScriptedStage>) -> WorkflowBuilder {
    stages
        .into_iter()
        .fold(WorkflowEngine::builder(), |builder, stage| builder.stage(Arc::new(stage)))
}

#[tokio::test]
async fn all_succeeding_stages_emit_one_pair_each_in_order() {
    let engine = engine_with(vec![
        ScriptedStage::succeeding("a"),
        ScriptedStage::succeeding("b"),
        ScriptedStage::succeeding("c"),
    ])
    .build()
    .unwrap();

    let outcome = engine.run(json!({"requirement": "x"})).await;

    assert_eq!(outcome.status, RunStatus::Success);
    assert_eq!(outcome.iterations, 0);
    assert_event_sequence(
        &outcome.history,
        &[
            (StageStart, "a"),
            (StageEnd, "a"),
            (StageStart, "b"),
            (StageEnd, "b"),
            (StageStart, "c"),
            (StageEnd, "c"),
        ],
    );
    assert_eq!(outcome.history[0].data.get("attempt"), Some(&json!(1)));
}

#[tokio::test]
async fn precondition_false_skips_without_result() {
    let engine = engine_with(vec![
        ScriptedStage::succeeding("a"),
        ScriptedStage::succeeding("b").with_precondition(|_| false),
        ScriptedStage::succeeding("c"),
    ])
    .build()
    .unwrap();

    let outcome = engine.run(json!({})).await;

    assert!(outcome.is_success());
    assert_event_count(&outcome.history, StageStart, "b", 0);
    assert_event_count(&outcome.history, StageEnd, "b", 0);
    assert_event_count(&outcome.history, StageSkipped, "b", 1);
    assert!(!outcome.results.contains_key("b"));
    assert!(outcome.results.contains_key("c"));
}

#[tokio::test]
async fn precondition_sees_earlier_results() {
    let engine = engine_with(vec![
        ScriptedStage::failing("a", "broken"),
        ScriptedStage::succeeding("b").with_precondition(|ctx| ctx.stage_succeeded("a")),
    ])
    .build()
    .unwrap();

    let outcome = engine.run(json!({})).await;

    assert!(outcome.is_success());
    assert_event_count(&outcome.history, StageSkipped, "b", 1);
    assert_eq!(outcome.results["a"].status, StageStatus::Failed);
}

#[tokio::test]
async fn always_retry_is_bounded_by_max_iterations() {
    for max in [1_u32, 2, 4] {
        let stage = Arc::new(ScriptedStage::failing("b", "still broken"));
        let engine = WorkflowEngine::builder()
            .stage(stage.clone())
            .intervention_handler(Arc::new(AutoRetryHandler::new()))
            .max_iterations(max)
            .build()
            .unwrap();

        let outcome = engine.run(json!({})).await;

        assert!(stage.calls() <= max + 1);
        assert_eq!(stage.calls(), max);
        assert_event_count(&outcome.history, MaxIterationsReached, "b", 1);
        assert_eq!(outcome.iterations, max);
        assert_starts_closed(&outcome.history);
    }
}

#[tokio::test]
async fn max_iterations_event_carries_count() {
    let engine = WorkflowEngine::builder()
        .stage(Arc::new(ScriptedStage::failing("b", "x")))
        .intervention_handler(Arc::new(AutoRetryHandler::new()))
        .max_iterations(2)
        .build()
        .unwrap();

    let outcome = engine.run(json!({})).await;
    let event = outcome
        .history
        .iter()
        .find(|e| e.event_type == MaxIterationsReached)
        .unwrap();
    assert_eq!(event.data.get("iterations"), Some(&json!(2)));
}

#[tokio::test]
async fn abort_wins_over_retry() {
    let stage = Arc::new(ScriptedStage::failing("b", "x"));
    let later = Arc::new(ScriptedStage::succeeding("c"));
    let engine = WorkflowEngine::builder()
        .stage(Arc::new(ScriptedStage::succeeding("a")))
        .stage(stage.clone())
        .stage(later.clone())
        .intervention_handler(Arc::new(ScriptedHandler::always(
            InterventionDecision::retry().and_abort(),
        )))
        .build()
        .unwrap();

    let outcome = engine.run(json!({})).await;

    assert_eq!(outcome.status, RunStatus::Aborted);
    assert_eq!(outcome.error.as_deref(), Some(ABORTED_MESSAGE));
    assert_eq!(stage.calls(), 1);
    assert_eq!(later.calls(), 0);
    assert_eq!(outcome.iterations, 0);
    assert_event_count(&outcome.history, WorkflowAborted, "b", 1);
    assert_eq!(outcome.history.last().unwrap().event_type, WorkflowAborted);
}

#[tokio::test]
async fn skip_keeps_failed_result_and_continues() {
    let later = Arc::new(ScriptedStage::succeeding("c"));
    let engine = WorkflowEngine::builder()
        .stage(Arc::new(ScriptedStage::failing("b", "x")))
        .stage(later.clone())
        .intervention_handler(Arc::new(ScriptedHandler::always(InterventionDecision::skip())))
        .build()
        .unwrap();

    let outcome = engine.run(json!({})).await;

    assert!(outcome.is_success());
    assert_eq!(later.calls(), 1);
    assert_eq!(outcome.results["b"].error.as_deref(), Some("x"));
    assert_event_sequence(
        &outcome.history,
        &[
            (StageStart, "b"),
            (StageEnd, "b"),
            (InterventionStart, "b"),
            (InterventionEnd, "b"),
            (StageSkippedByUser, "b"),
            (StageStart, "c"),
            (StageEnd, "c"),
        ],
    );
}

#[tokio::test]
async fn declining_handler_is_never_asked() {
    let handler = Arc::new(ScriptedHandler::declining());
    let engine = WorkflowEngine::builder()
        .stage(Arc::new(ScriptedStage::failing("b", "x")))
        .intervention_handler(handler.clone())
        .build()
        .unwrap();

    let outcome = engine.run(json!({})).await;

    assert!(outcome.is_success());
    assert!(handler.consultations().is_empty());
    assert_event_count(&outcome.history, InterventionStart, "b", 0);
}

#[tokio::test]
async fn failing_reporter_does_not_change_outcome() {
    let stages = || {
        vec![
            ScriptedStage::succeeding("a"),
            ScriptedStage::failing("b", "x").then_succeed(),
            ScriptedStage::raising("c", "disk gone"),
        ]
    };
    let handler = || Arc::new(AutoRetryHandler::new());

    let quiet = engine_with(stages())
        .intervention_handler(handler())
        .build()
        .unwrap()
        .run(json!({}))
        .await;

    let failing = Arc::new(FailingReporter::new());
    let noisy = engine_with(stages())
        .intervention_handler(handler())
        .reporter(failing.clone())
        .build()
        .unwrap()
        .run(json!({}))
        .await;

    assert_eq!(noisy.status, quiet.status);
    assert_eq!(noisy.error, quiet.error);
    assert_eq!(noisy.history.len(), quiet.history.len());
    assert_eq!(failing.attempts(), noisy.history.len());
}

#[tokio::test]
async fn stage_fails_twice_then_succeeds_under_retry() {
    let b = Arc::new(ScriptedStage::failing("b", "flaky").then_fail("flaky").then_succeed());
    let reporter = Arc::new(CollectingReporter::new());
    let engine = WorkflowEngine::builder()
        .stage(Arc::new(ScriptedStage::succeeding("a")))
        .stage(b.clone())
        .stage(Arc::new(ScriptedStage::succeeding("c")))
        .intervention_handler(Arc::new(AutoRetryHandler::new()))
        .reporter(reporter.clone())
        .max_iterations(3)
        .build()
        .unwrap();

    let outcome = engine.run(json!({})).await;

    assert_eq!(outcome.status, RunStatus::Success);
    assert_eq!(b.calls(), 3);
    assert_eq!(outcome.results["b"].get("attempt"), Some(&json!(3)));
    assert_eq!(outcome.iterations, 2);
    for (stage, pairs) in [("a", 1), ("b", 3), ("c", 1)] {
        assert_event_count(&outcome.history, StageStart, stage, pairs);
        assert_event_count(&outcome.history, StageEnd, stage, pairs);
    }
    assert_event_count(&outcome.history, MaxIterationsReached, "b", 0);
    assert_starts_closed(&outcome.history);
    assert_eq!(reporter.events(), outcome.history);
}

#[tokio::test]
async fn failure_without_handler_still_runs_later_stages() {
    let engine = engine_with(vec![
        ScriptedStage::succeeding("a"),
        ScriptedStage::failing("b", "always"),
        ScriptedStage::succeeding("c"),
    ])
    .build()
    .unwrap();

    let outcome = engine.run(json!({})).await;

    assert_eq!(outcome.status, RunStatus::Success);
    assert_event_count(&outcome.history, StageEnd, "b", 1);
    let end = outcome.history.iter().find(|e| e.is(StageEnd, "b")).unwrap();
    assert_eq!(end.data.get("status"), Some(&json!("failed")));
    assert_event_count(&outcome.history, StageEnd, "c", 1);
}

#[tokio::test]
async fn raised_error_ends_run_with_error() {
    let raising = Arc::new(ScriptedStage::raising("b", "disk gone"));
    let later = Arc::new(ScriptedStage::succeeding("c"));
    let handler = Arc::new(ScriptedHandler::always(InterventionDecision::retry()));
    let engine = WorkflowEngine::builder()
        .stage(Arc::new(ScriptedStage::succeeding("a")))
        .stage(raising.clone())
        .stage(later.clone())
        .intervention_handler(handler.clone())
        .build()
        .unwrap();

    let outcome = engine.run(json!({})).await;

    assert_eq!(outcome.status, RunStatus::Error);
    assert_eq!(outcome.error_kind.as_deref(), Some("InternalError"));
    assert!(outcome.error.as_deref().unwrap().contains("disk gone"));
    assert_eq!(raising.failures_seen().len(), 1);
    assert!(handler.consultations().is_empty());
    assert_eq!(later.calls(), 0);
    assert!(!outcome.results.contains_key("b"));

    let tail: Vec<_> = outcome.history.iter().rev().take(2).collect();
    assert_eq!(tail[0].event_type, WorkflowEventType::Error);
    assert_eq!(tail[0].stage_name, crate::core::WORKFLOW_STAGE_NAME);
    assert_eq!(tail[1].event_type, StageErrorEvent);
    assert_starts_closed(&outcome.history);
}

#[tokio::test]
async fn retry_instructions_reach_agents_before_next_attempt() {
    let developer = Arc::new(ScriptedAgent::new(AgentKind::Developer));
    let handler = ScriptedHandler::new([
        InterventionDecision::retry()
            .with_instruction(AgentKind::Developer, "check for None")
            .with_instruction(AgentKind::Qa, "nobody listens"),
        InterventionDecision::proceed(),
    ]);
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let observed = Arc::clone(&seen);
    let stage = ScriptedStage::failing("coding", "bad").with_effect(move |ctx| {
        let active = ctx
            .agent(AgentKind::Developer)
            .map(|agent| agent.info().active_instructions)
            .unwrap_or_default();
        observed.lock().push(active);
    });
    let engine = WorkflowEngine::builder()
        .stage(Arc::new(stage))
        .agent(developer.clone())
        .intervention_handler(Arc::new(handler))
        .build()
        .unwrap();

    let outcome = engine.run(json!({})).await;

    assert_eq!(
        *seen.lock(),
        vec![Vec::<String>::new(), vec!["check for None".to_string()]]
    );
    assert_eq!(developer.instructions(), vec!["check for None"]);
    assert_eq!(outcome.iterations, 1);
    let end = outcome
        .history
        .iter()
        .find(|e| e.event_type == InterventionEnd)
        .unwrap();
    assert_eq!(end.data["instructions"]["developer"], json!("check for None"));
}

#[tokio::test]
async fn debug_mode_retries_past_configured_bound() {
    let b = Arc::new(
        ScriptedStage::failing("b", "x")
            .then_fail("x")
            .then_fail("x")
            .then_fail("x")
            .then_succeed(),
    );
    let engine = WorkflowEngine::builder()
        .stage(b.clone())
        .intervention_handler(Arc::new(AutoRetryHandler::new()))
        .max_iterations(1)
        .debug_mode(true)
        .build()
        .unwrap();

    let outcome = engine.run(json!({})).await;

    assert!(outcome.is_success());
    assert_eq!(b.calls(), 5);
    assert_eq!(engine.current_state().max_iterations, IterationLimit::Unbounded);
}

#[tokio::test]
async fn history_only_grows_and_runs_are_isolated() {
    let engine = engine_with(vec![ScriptedStage::succeeding("a").with_effect(|ctx| {
        assert!(ctx.get("marker").is_none());
        ctx.set("marker", json!(true)).unwrap();
    })])
    .build()
    .unwrap();

    let first = engine.run(json!({})).await;
    let second = engine.run(json!({})).await;

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.history.len(), second.history.len());
    for window in first.history.windows(2) {
        assert!(window[0].timestamp <= window[1].timestamp);
    }
}

fn files(name: &str, content: &str) -> AgentResponse {
    AgentResponse::Files(FileSet::from([(name.to_string(), content.to_string())]))
}

fn standard_agents(failures_before_pass: u32) -> (Arc<ScriptedAgent>, Arc<ScriptedAgent>, Arc<ScriptedAgent>) {
    let architect = ScriptedAgent::new(AgentKind::Architect)
        .respond("analyze_requirement", AgentResponse::Document("# Requirement".to_string()))
        .respond("design_architecture", AgentResponse::Document("# Architecture".to_string()));
    let developer = ScriptedAgent::new(AgentKind::Developer)
        .with_settings(&WorkflowConfig::default().agents)
        .respond("implement", files("calc.py", "def add(a, b): return a - b"))
        .respond("write_tests", files("test_calc.py", "def test_add(): assert add(1, 2) == 3"))
        .respond("fix_issues", files("calc.py", "def add(a, b): return a + b"));

    let mut qa = ScriptedAgent::new(AgentKind::Qa);
    for _ in 0..failures_before_pass {
        qa = qa.respond(
            "run_tests",
            AgentResponse::TestReport(
                TestReport::failing(1, 1, "E assert -1 == 3").with_error(Some("test_add"), "assert"),
            ),
        );
    }
    let qa = qa
        .respond("run_tests", AgentResponse::TestReport(TestReport::passing(1)))
        .respond(
            "analyze_failure",
            AgentResponse::Diagnosis(
                Diagnosis::new("AssertionError", "add subtracts").with_location("calc.py:1"),
            ),
        )
        .respond("package_release", AgentResponse::Package("releases/calc.zip".to_string()));

    (Arc::new(architect), Arc::new(developer), Arc::new(qa))
}

#[tokio::test]
async fn standard_workflow_end_to_end() {
    let dir = TempDir::new().unwrap();
    let workspace = Arc::new(FsWorkspace::open(dir.path()).await.unwrap());
    let (architect, developer, qa) = standard_agents(2);
    let agents: Vec<Arc<dyn Agent>> = vec![architect, developer.clone(), qa.clone()];
    let reporter = Arc::new(CollectingReporter::new());

    let engine = WorkflowBuilder::standard(WorkflowConfig::default(), agents, workspace.clone())
        .reporter(reporter.clone())
        .build()
        .unwrap();
    let outcome = engine.run(json!({"requirement": "add two numbers"})).await;

    assert_eq!(outcome.status, RunStatus::Success, "history: {:?}", outcome.history);
    assert_eq!(outcome.output, Some(json!("releases/calc.zip")));
    assert_eq!(outcome.results[TESTING].metadata.get("iterations"), Some(&json!(3)));
    assert_eq!(outcome.results[PACKAGING].get_str("package_path"), Some("releases/calc.zip"));
    assert_eq!(
        workspace.load(Category::Code, "calc.py").await.unwrap(),
        "def add(a, b): return a + b"
    );
    assert_eq!(qa.call_names().iter().filter(|n| **n == "analyze_failure").count(), 2);
    assert_eq!(
        developer.call_names(),
        vec!["implement", "write_tests", "fix_issues", "fix_issues"]
    );

    let log = IterationLog::in_workspace(dir.path());
    let first_read = log.read_all().await.unwrap();
    let second_read = log.read_all().await.unwrap();
    assert_eq!(first_read, second_read);
    assert_eq!(first_read.iter().map(|r| r.iteration).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(
        first_read[0].analysis.as_ref().map(|d| d.error_type.as_str()),
        Some("AssertionError")
    );
    assert!(first_read[2].test_passed);

    for stage in engine.stage_names() {
        assert_eq!(count_events(&outcome.history, StageStart, stage), 1);
    }
    assert_eq!(reporter.events(), outcome.history);
}

#[tokio::test]
async fn packaging_is_skipped_when_testing_exhausts_its_bound() {
    let (architect, developer, qa) = standard_agents(10);
    let agents: Vec<Arc<dyn Agent>> = vec![architect, developer, qa.clone()];
    let config = WorkflowConfig::from_yaml_str(
        "workflow:\n  max_iterations: 3\n  verification_max_iterations: 2\n",
    )
    .unwrap();

    let engine =
        WorkflowBuilder::standard(config, agents, Arc::new(InMemoryWorkspace::new()))
            .build()
            .unwrap();
    let outcome = engine.run(json!({"requirement": "add two numbers"})).await;

    assert_eq!(outcome.status, RunStatus::Success);
    assert_eq!(outcome.output, None);
    assert_eq!(
        outcome.results[TESTING].error.as_deref(),
        Some("Tests failed after 2 iterations")
    );
    assert!(outcome.results[CODING].is_success());
    assert_event_count(&outcome.history, StageSkipped, PACKAGING, 1);
    assert!(!qa.call_names().contains(&"package_release"));
}

#[tokio::test]
async fn outer_retries_keep_log_numbers_increasing() {
    let dir = TempDir::new().unwrap();
    let workspace = Arc::new(FsWorkspace::open(dir.path()).await.unwrap());
    let (architect, developer, qa) = standard_agents(10);
    let agents: Vec<Arc<dyn Agent>> = vec![architect, developer, qa];
    let config = WorkflowConfig::from_yaml_str(
        "workflow:\n  max_iterations: 3\n  verification_max_iterations: 2\n",
    )
    .unwrap();

    let engine = WorkflowBuilder::standard(config, agents, workspace)
        .intervention_handler(Arc::new(AutoRetryHandler::new()))
        .build()
        .unwrap();
    let outcome = engine.run(json!({"requirement": "add two numbers"})).await;

    assert_event_count(&outcome.history, StageStart, TESTING, 3);
    assert_event_count(&outcome.history, MaxIterationsReached, TESTING, 1);

    let log = IterationLog::in_workspace(dir.path());
    let numbers: Vec<u32> = log.read_all().await.unwrap().iter().map(|r| r.iteration).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(log.find(2).await.unwrap().unwrap().iteration, 2);
}

#[tokio::test]
async fn escaping_fix_name_fails_testing_without_ending_run() {
    let dir = TempDir::new().unwrap();
    let workspace = Arc::new(FsWorkspace::open(dir.path()).await.unwrap());
    let (architect, _, qa) = standard_agents(1);
    let developer = Arc::new(
        ScriptedAgent::new(AgentKind::Developer)
            .respond("implement", files("calc.py", "def add(a, b): return a - b"))
            .respond("write_tests", files("test_calc.py", "def test_add(): ..."))
            .respond("fix_issues", files("../escape.py", "import os")),
    );
    let agents: Vec<Arc<dyn Agent>> = vec![architect, developer, qa];

    let engine = WorkflowBuilder::standard(WorkflowConfig::default(), agents, workspace)
        .build()
        .unwrap();
    let outcome = engine.run(json!({"requirement": "add two numbers"})).await;

    assert_eq!(outcome.status, RunStatus::Success, "history: {:?}", outcome.history);
    assert_eq!(outcome.error_kind, None);
    assert_eq!(
        outcome.results[TESTING].error.as_deref(),
        Some("Invalid artifact name: '../escape.py'")
    );
    assert_event_count(&outcome.history, StageErrorEvent, TESTING, 0);
    assert_event_count(&outcome.history, StageSkipped, PACKAGING, 1);
    assert!(!dir.path().join("escape.py").exists());
}

#[tokio::test]
async fn missing_requirement_fails_first_stage_only() {
    let (architect, developer, qa) = standard_agents(0);
    let agents: Vec<Arc<dyn Agent>> = vec![architect, developer, qa];
    let engine = WorkflowBuilder::standard(
        WorkflowConfig::default(),
        agents,
        Arc::new(InMemoryWorkspace::new()),
    )
    .build()
    .unwrap();

    let outcome = engine.run(json!({})).await;

    assert_eq!(
        outcome.results["requirement_analysis"].error.as_deref(),
        Some("No requirement provided")
    );
    assert_event_count(&outcome.history, StageSkipped, PACKAGING, 1);
}
