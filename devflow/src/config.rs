//! Workflow configuration loaded from YAML.
//!
//! Every section is optional; a missing key falls back to its default so an
//! empty file is a valid configuration.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Upper bound on an iteration counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationLimit {
    /// At most this many iterations.
    Bounded(u32),
    /// No bound (diagnostic mode).
    Unbounded,
}

impl IterationLimit {
    /// Resolves a configured bound, lifting it in diagnostic mode.
    #[must_use]
    pub fn resolve(max_iterations: u32, debug_mode: bool) -> Self {
        if debug_mode {
            Self::Unbounded
        } else {
            Self::Bounded(max_iterations)
        }
    }

    /// Returns true if another iteration may run after `completed` ones.
    #[must_use]
    pub fn allows(&self, completed: u32) -> bool {
        match self {
            Self::Bounded(max) => completed < *max,
            Self::Unbounded => true,
        }
    }

    /// Returns true if there is no bound.
    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        matches!(self, Self::Unbounded)
    }
}

impl Default for IterationLimit {
    fn default() -> Self {
        Self::Bounded(default_max_iterations())
    }
}

impl fmt::Display for IterationLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bounded(max) => write!(f, "{max}"),
            Self::Unbounded => write!(f, "unlimited"),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowConfig {
    /// Project layout.
    #[serde(default)]
    pub project: ProjectConfig,
    /// Iteration bounds.
    #[serde(default)]
    pub workflow: WorkflowSettings,
    /// Diagnostic mode.
    #[serde(default)]
    pub debug: DebugConfig,
    /// Capability provider settings.
    #[serde(default)]
    pub agents: AgentSettings,
    /// Tracing output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Project layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Workspace root directory.
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
        }
    }
}

/// Iteration bounds for the two retry mechanisms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// Bound on engine-level intervention retries per run.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Bound on verify/fix cycles inside the verification stage.
    /// Defaults to `max_iterations`.
    #[serde(default)]
    pub verification_max_iterations: Option<u32>,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            verification_max_iterations: None,
        }
    }
}

/// Diagnostic mode switch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugConfig {
    /// When true, both iteration bounds are lifted.
    #[serde(default)]
    pub enabled: bool,
}

/// Capability provider settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSettings {
    /// How many recent injected instructions an agent should honour.
    #[serde(default = "default_instruction_window")]
    pub instruction_window: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            instruction_window: default_instruction_window(),
        }
    }
}

/// Tracing output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_workspace() -> PathBuf {
    PathBuf::from("./workspace")
}

fn default_max_iterations() -> u32 {
    3
}

fn default_instruction_window() -> usize {
    crate::agents::DEFAULT_INSTRUCTION_WINDOW
}

fn default_log_level() -> String {
    "info".to_string()
}

impl WorkflowConfig {
    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read, parsed or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parses and validates a YAML document.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the YAML is malformed or a value is invalid.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agents.instruction_window == 0 {
            return Err(ConfigError::Invalid {
                key: "agents.instruction_window".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        let verification = self
            .workflow
            .verification_max_iterations
            .unwrap_or(self.workflow.max_iterations);
        if verification == 0 {
            return Err(ConfigError::Invalid {
                key: "workflow.verification_max_iterations".to_string(),
                message: "must be at least 1; the checks run at least once \
                          (it defaults to workflow.max_iterations)"
                    .to_string(),
            });
        }
        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "logging.level".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Returns the engine-level retry bound.
    #[must_use]
    pub fn retry_limit(&self) -> IterationLimit {
        IterationLimit::resolve(self.workflow.max_iterations, self.debug.enabled)
    }

    /// Returns the verify/fix loop bound.
    #[must_use]
    pub fn verification_limit(&self) -> IterationLimit {
        let max = self
            .workflow
            .verification_max_iterations
            .unwrap_or(self.workflow.max_iterations);
        IterationLimit::resolve(max, self.debug.enabled)
    }

    /// Serializes the resolved configuration back to YAML.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` if serialization fails.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}
