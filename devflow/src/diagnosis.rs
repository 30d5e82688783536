//! Failure diagnosis for the verify/fix loop.
//!
//! Diagnosis is advisory. A [`Diagnoser`] may fail or answer with garbage;
//! callers degrade to [`Diagnosis::unknown`] instead of failing the loop.

use crate::agents::{Agent, AgentAction, AgentResponse, TestReport};
use crate::errors::AgentError;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

static JSON_OBJECT: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?s)\{.*\}").ok());

/// Characters of raw output kept as the root cause of an unknown failure.
pub const UNKNOWN_ROOT_CAUSE_CHARS: usize = 500;

/// Error type recorded when no classification is available.
pub const UNKNOWN_ERROR_TYPE: &str = "unknown";

/// A structured classification of a failing check run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    /// Failure category (syntax, import, logic, configuration, ...).
    #[serde(default = "unknown_error_type")]
    pub error_type: String,

    /// Suspected location, usually `file:line`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// Explanation of the failure.
    #[serde(default)]
    pub root_cause: String,

    /// Remediation hints.
    #[serde(default)]
    pub fix_suggestions: Vec<String>,

    /// `high`, `medium` or `low`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,

    /// The raw runner output, kept on degraded diagnoses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,

    /// Any other fields the diagnoser produced.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

fn unknown_error_type() -> String {
    UNKNOWN_ERROR_TYPE.to_string()
}

impl Diagnosis {
    /// Creates a diagnosis with the given type and root cause.
    #[must_use]
    pub fn new(error_type: impl Into<String>, root_cause: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            location: None,
            root_cause: root_cause.into(),
            fix_suggestions: Vec::new(),
            priority: None,
            raw_output: None,
            extra: HashMap::new(),
        }
    }

    /// The generic classification used when diagnosis is unavailable.
    #[must_use]
    pub fn unknown(report: &TestReport) -> Self {
        Self {
            fix_suggestions: vec![
                "Check the error messages in the test output".to_string(),
                "Make sure the code is syntactically valid".to_string(),
            ],
            raw_output: Some(report.output.clone()),
            ..Self::new(
                UNKNOWN_ERROR_TYPE,
                crate::utils::truncate_chars(&report.output, UNKNOWN_ROOT_CAUSE_CHARS),
            )
        }
    }

    /// Sets the suspected location.
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Adds a remediation hint.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.fix_suggestions.push(suggestion.into());
        self
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    /// Returns true for the generic fallback classification.
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.error_type == UNKNOWN_ERROR_TYPE
    }

    /// Extracts the first JSON object embedded in free text.
    ///
    /// Model answers often wrap the object in prose or code fences; anything
    /// outside the outermost braces is ignored.
    #[must_use]
    pub fn from_text(text: &str) -> Option<Self> {
        let candidate = JSON_OBJECT.as_ref()?.find(text)?;
        serde_json::from_str(candidate.as_str()).ok()
    }
}

/// Converts a failing check report into a [`Diagnosis`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Diagnoser: Send + Sync {
    /// Classifies a failing report.
    ///
    /// # Errors
    ///
    /// Returns `AgentError` when no classification could be produced.
    async fn diagnose(&self, report: &TestReport) -> Result<Diagnosis, AgentError>;
}

/// A [`Diagnoser`] backed by the QA agent's `analyze_failure` action.
#[derive(Debug, Clone)]
pub struct AgentDiagnoser {
    agent: Arc<dyn Agent>,
}

impl AgentDiagnoser {
    /// Creates a diagnoser over the given agent.
    #[must_use]
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl Diagnoser for AgentDiagnoser {
    async fn diagnose(&self, report: &TestReport) -> Result<Diagnosis, AgentError> {
        let response = self
            .agent
            .process(AgentAction::AnalyzeFailure {
                test_report: report.clone(),
            })
            .await?;

        let mut diagnosis = match response {
            AgentResponse::Diagnosis(diagnosis) => diagnosis,
            AgentResponse::Document(text) => Diagnosis::from_text(&text)
                .ok_or_else(|| AgentError::unexpected_response("diagnosis", "document without JSON"))?,
            other => return Err(AgentError::unexpected_response("diagnosis", other.variant())),
        };
        if diagnosis.raw_output.is_none() && diagnosis.is_unknown() {
            diagnosis.raw_output = Some(report.output.clone());
        }
        Ok(diagnosis)
    }
}
