//! Capability providers.
//!
//! Stages never talk to a generative backend directly. They send an
//! [`AgentAction`] to an [`Agent`] and receive an [`AgentResponse`]. Each
//! action names the agent kind that serves it, so dispatch is an exhaustive
//! match rather than a string lookup.

mod instructions;

pub use instructions::{Instruction, InstructionWindow, DEFAULT_INSTRUCTION_WINDOW};

use crate::diagnosis::Diagnosis;
use crate::errors::AgentError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Artifact name to content.
pub type FileSet = BTreeMap<String, String>;

/// The fixed set of capability providers a run can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Requirement analysis and architecture design.
    Architect,
    /// Implementation, check authoring and fixes.
    Developer,
    /// Running checks, failure analysis and packaging.
    Qa,
}

impl AgentKind {
    /// All kinds, in a stable order.
    pub const ALL: [Self; 3] = [Self::Architect, Self::Developer, Self::Qa];

    /// Returns the wire name of the kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Architect => "architect",
            Self::Developer => "developer",
            Self::Qa => "qa",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "architect" => Ok(Self::Architect),
            "developer" => Ok(Self::Developer),
            "qa" => Ok(Self::Qa),
            other => Err(AgentError::failed(other, "unknown agent kind")),
        }
    }
}

/// A request sent to a capability provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AgentAction {
    /// Turn a raw requirement into a requirement document.
    AnalyzeRequirement {
        /// The user's requirement text.
        requirement: String,
    },
    /// Turn a requirement document into an architecture document.
    DesignArchitecture {
        /// The requirement document.
        requirement_doc: String,
    },
    /// Produce code files from an architecture document.
    Implement {
        /// The architecture document.
        architecture_doc: String,
    },
    /// Produce check files for the given code.
    WriteTests {
        /// The code under test.
        code_files: FileSet,
    },
    /// Produce fixed code files for a failing check run.
    FixIssues {
        /// The failing report.
        test_report: TestReport,
        /// The structured classification of the failure.
        diagnosis: Diagnosis,
    },
    /// Execute the checks and score them.
    RunTests {
        /// Directory holding the code.
        code_dir: PathBuf,
        /// Directory holding the checks.
        test_dir: PathBuf,
    },
    /// Classify a failing check run.
    AnalyzeFailure {
        /// The failing report.
        test_report: TestReport,
    },
    /// Package the verified code.
    PackageRelease {
        /// Directory holding the code.
        code_dir: PathBuf,
    },
}

impl AgentAction {
    /// Returns the wire name of the action.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::AnalyzeRequirement { .. } => "analyze_requirement",
            Self::DesignArchitecture { .. } => "design_architecture",
            Self::Implement { .. } => "implement",
            Self::WriteTests { .. } => "write_tests",
            Self::FixIssues { .. } => "fix_issues",
            Self::RunTests { .. } => "run_tests",
            Self::AnalyzeFailure { .. } => "analyze_failure",
            Self::PackageRelease { .. } => "package_release",
        }
    }

    /// Returns the agent kind that serves this action.
    #[must_use]
    pub fn target(&self) -> AgentKind {
        match self {
            Self::AnalyzeRequirement { .. } | Self::DesignArchitecture { .. } => {
                AgentKind::Architect
            }
            Self::Implement { .. } | Self::WriteTests { .. } | Self::FixIssues { .. } => {
                AgentKind::Developer
            }
            Self::RunTests { .. } | Self::AnalyzeFailure { .. } | Self::PackageRelease { .. } => {
                AgentKind::Qa
            }
        }
    }

    /// Returns an `UnknownAction` error unless `agent` serves this action.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::UnknownAction` on a kind mismatch.
    pub fn ensure_target(&self, agent: AgentKind) -> Result<(), AgentError> {
        if self.target() == agent {
            Ok(())
        } else {
            Err(AgentError::unknown_action(agent.as_str(), self.name()))
        }
    }
}

/// One failing check.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FailureDetail {
    /// The check identifier, if the runner reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<String>,
    /// The failure message.
    pub message: String,
}

/// The scored result of one check run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TestReport {
    /// Whether every check passed.
    pub passed: bool,
    /// Number of checks run.
    #[serde(default)]
    pub total: u32,
    /// Number of failing checks.
    #[serde(default)]
    pub failed: u32,
    /// Raw runner output.
    #[serde(default)]
    pub output: String,
    /// Per-check failures.
    #[serde(default)]
    pub errors: Vec<FailureDetail>,
}

impl TestReport {
    /// Creates a passing report.
    #[must_use]
    pub fn passing(total: u32) -> Self {
        Self {
            passed: true,
            total,
            ..Self::default()
        }
    }

    /// Creates a failing report.
    #[must_use]
    pub fn failing(total: u32, failed: u32, output: impl Into<String>) -> Self {
        Self {
            passed: false,
            total,
            failed,
            output: output.into(),
            errors: Vec::new(),
        }
    }

    /// Adds a per-check failure.
    #[must_use]
    pub fn with_error(mut self, test: Option<&str>, message: impl Into<String>) -> Self {
        self.errors.push(FailureDetail {
            test: test.map(str::to_string),
            message: message.into(),
        });
        self
    }
}

/// A capability provider's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AgentResponse {
    /// A markdown document.
    Document(String),
    /// A set of named files.
    Files(FileSet),
    /// A scored check run.
    TestReport(TestReport),
    /// A failure classification.
    Diagnosis(Diagnosis),
    /// The location of a release package.
    Package(String),
}

impl AgentResponse {
    /// Returns the variant name.
    #[must_use]
    pub fn variant(&self) -> &'static str {
        match self {
            Self::Document(_) => "document",
            Self::Files(_) => "files",
            Self::TestReport(_) => "test_report",
            Self::Diagnosis(_) => "diagnosis",
            Self::Package(_) => "package",
        }
    }

    /// Extracts a document.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::UnexpectedResponse` for any other variant.
    pub fn into_document(self) -> Result<String, AgentError> {
        match self {
            Self::Document(doc) => Ok(doc),
            other => Err(AgentError::unexpected_response("document", other.variant())),
        }
    }

    /// Extracts a file set.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::UnexpectedResponse` for any other variant.
    pub fn into_files(self) -> Result<FileSet, AgentError> {
        match self {
            Self::Files(files) => Ok(files),
            other => Err(AgentError::unexpected_response("files", other.variant())),
        }
    }

    /// Extracts a check report.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::UnexpectedResponse` for any other variant.
    pub fn into_test_report(self) -> Result<TestReport, AgentError> {
        match self {
            Self::TestReport(report) => Ok(report),
            other => Err(AgentError::unexpected_response("test_report", other.variant())),
        }
    }

    /// Extracts a package location.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::UnexpectedResponse` for any other variant.
    pub fn into_package(self) -> Result<String, AgentError> {
        match self {
            Self::Package(path) => Ok(path),
            other => Err(AgentError::unexpected_response("package", other.variant())),
        }
    }
}

/// Descriptive information about an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    /// The agent's kind.
    pub kind: AgentKind,
    /// Backend model or implementation name.
    pub model: String,
    /// Instructions the agent currently honours, oldest first.
    pub active_instructions: Vec<String>,
}

/// A capability provider.
///
/// `inject_instruction` may be called at any time, including between the
/// attempts of a retried stage; it influences only a bounded window of later
/// `process` calls.
#[async_trait]
pub trait Agent: Send + Sync + fmt::Debug {
    /// Returns the kind of the agent.
    fn kind(&self) -> AgentKind;

    /// Handles one request.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::UnknownAction` for an action this agent does not
    /// serve, or `AgentError::Failed` if the backend fails.
    async fn process(&self, action: AgentAction) -> Result<AgentResponse, AgentError>;

    /// Records corrective guidance for later requests.
    fn inject_instruction(&self, instruction: &str);

    /// Returns descriptive information about the agent.
    fn info(&self) -> AgentInfo;
}
