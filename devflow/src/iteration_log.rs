//! Append-only log of verify/fix iterations.
//!
//! One JSON object per line. The field names and shapes of
//! [`IterationRecord`] are a durable wire format read by external tools;
//! do not rename them.

use crate::agents::TestReport;
use crate::diagnosis::Diagnosis;
use crate::errors::{AgentError, IterationLogError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// File name of the log inside the workspace's reports category.
pub const ITERATION_LOG_FILE: &str = "iteration_log.jsonl";

/// Check counts for one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TestStats {
    /// Checks run.
    #[serde(default)]
    pub total: u32,
    /// Checks failing.
    #[serde(default)]
    pub failed: u32,
}

/// One verify/fix iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 1-based iteration number, increasing across the whole log.
    pub iteration: u32,
    /// When the record was written (ISO 8601).
    pub timestamp: String,
    /// Whether the checks passed.
    pub test_passed: bool,
    /// Check counts.
    #[serde(default)]
    pub test_stats: TestStats,
    /// The failure classification; `null` on passing iterations.
    #[serde(default)]
    pub analysis: Option<Diagnosis>,
    /// Artifacts rewritten by the fix step.
    #[serde(default)]
    pub fixed_files: Vec<String>,
    /// Raw runner output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_output: Option<String>,
}

impl IterationRecord {
    /// Creates a record from a check report, stamped now.
    #[must_use]
    pub fn from_report(iteration: u32, report: &TestReport) -> Self {
        Self {
            iteration,
            timestamp: crate::utils::iso_timestamp(),
            test_passed: report.passed,
            test_stats: TestStats {
                total: report.total,
                failed: report.failed,
            },
            analysis: None,
            fixed_files: Vec::new(),
            test_output: (!report.output.is_empty()).then(|| report.output.clone()),
        }
    }

    /// Creates a failing record for an iteration whose checks could not
    /// be run at all. The runner error is kept as the raw output.
    #[must_use]
    pub fn from_runner_error(iteration: u32, error: &AgentError) -> Self {
        Self {
            iteration,
            timestamp: crate::utils::iso_timestamp(),
            test_passed: false,
            test_stats: TestStats::default(),
            analysis: None,
            fixed_files: Vec::new(),
            test_output: Some(error.to_string()),
        }
    }

    /// Attaches the diagnosis.
    #[must_use]
    pub fn with_analysis(mut self, analysis: Diagnosis) -> Self {
        self.analysis = Some(analysis);
        self
    }

    /// Attaches the names of fixed artifacts.
    #[must_use]
    pub fn with_fixed_files(mut self, fixed_files: Vec<String>) -> Self {
        self.fixed_files = fixed_files;
        self
    }
}

/// Handle on a newline-delimited iteration log file.
#[derive(Debug, Clone)]
pub struct IterationLog {
    path: PathBuf,
}

impl IterationLog {
    /// Creates a handle on the given file. Nothing is touched until the
    /// first append.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The default log location inside a workspace root.
    #[must_use]
    pub fn in_workspace(root: &Path) -> Self {
        Self::new(
            root.join(crate::workspace::Category::Reports.as_str())
                .join(ITERATION_LOG_FILE),
        )
    }

    /// Returns the file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record as a single line.
    ///
    /// # Errors
    ///
    /// Returns `IterationLogError` if the record cannot be serialized or written.
    pub async fn append(&self, record: &IterationRecord) -> Result<(), IterationLogError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| self.io_error(source))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|source| self.io_error(source))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|source| self.io_error(source))?;
        file.flush().await.map_err(|source| self.io_error(source))?;

        debug!(
            path = %self.path.display(),
            iteration = record.iteration,
            passed = record.test_passed,
            "Appended iteration record"
        );
        Ok(())
    }

    /// Reads every record in file order.
    ///
    /// A missing file reads as empty. Lines that do not parse are skipped.
    ///
    /// # Errors
    ///
    /// Returns `IterationLogError::Io` if the file exists but cannot be read.
    pub async fn read_all(&self) -> Result<Vec<IterationRecord>, IterationLogError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(self.io_error(source)),
        };
        Ok(parse_records(&content))
    }

    /// Returns the last record, if any.
    ///
    /// # Errors
    ///
    /// Returns `IterationLogError::Io` if the file cannot be read.
    pub async fn latest(&self) -> Result<Option<IterationRecord>, IterationLogError> {
        Ok(self.read_all().await?.pop())
    }

    /// Returns the highest iteration number in the log, or 0 when empty.
    ///
    /// New records continue from here so numbers stay unique across stage
    /// retries and runs sharing a workspace.
    ///
    /// # Errors
    ///
    /// Returns `IterationLogError::Io` if the file cannot be read.
    pub async fn last_iteration(&self) -> Result<u32, IterationLogError> {
        Ok(self
            .read_all()
            .await?
            .iter()
            .map(|r| r.iteration)
            .max()
            .unwrap_or(0))
    }

    /// Returns the record with the given iteration number.
    ///
    /// Logs written by older tools may repeat a number; the most recent
    /// record wins.
    ///
    /// # Errors
    ///
    /// Returns `IterationLogError::Io` if the file cannot be read.
    pub async fn find(&self, iteration: u32) -> Result<Option<IterationRecord>, IterationLogError> {
        Ok(find_latest(self.read_all().await?, iteration))
    }

    fn io_error(&self, source: std::io::Error) -> IterationLogError {
        IterationLogError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

fn find_latest(records: Vec<IterationRecord>, iteration: u32) -> Option<IterationRecord> {
    records.into_iter().rev().find(|r| r.iteration == iteration)
}

/// Parses newline-delimited records, skipping blank and malformed lines.
#[must_use]
pub fn parse_records(content: &str) -> Vec<IterationRecord> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(idx, line)| match serde_json::from_str(line) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(line = idx + 1, error = %e, "Skipping malformed iteration record");
                None
            }
        })
        .collect()
}
