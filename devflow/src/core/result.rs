//! Stage result type.

use super::StageStatus;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The outcome of one stage attempt.
///
/// Produced once per attempt and never mutated after it is handed to the
/// engine; the builder-style methods consume `self`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// The attempt's status.
    pub status: StageStatus,

    /// Output data read by later stages.
    #[serde(default)]
    pub output: HashMap<String, serde_json::Value>,

    /// Human-readable error for failed attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Additional metadata (iteration counts, timings).
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl StageResult {
    /// Creates a successful result with output data.
    #[must_use]
    pub fn success(output: HashMap<String, serde_json::Value>) -> Self {
        Self {
            status: StageStatus::Success,
            output,
            error: None,
            metadata: HashMap::new(),
        }
    }

    /// Creates a successful result with no output.
    #[must_use]
    pub fn success_empty() -> Self {
        Self::success(HashMap::new())
    }

    /// Creates an expected failure.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Failed,
            output: HashMap::new(),
            error: Some(error.into()),
            metadata: HashMap::new(),
        }
    }

    /// Adds an output value.
    #[must_use]
    pub fn with_output(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.output.insert(key.into(), value);
        self
    }

    /// Adds a metadata value.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Returns true if the attempt succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == StageStatus::Success
    }

    /// Returns true if the attempt reported an expected failure.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status == StageStatus::Failed
    }

    /// Gets an output value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.output.get(key)
    }

    /// Gets an output value as a string slice.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.output.get(key).and_then(serde_json::Value::as_str)
    }
}
