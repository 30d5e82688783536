//! Observers of workflow events.
//!
//! Every event the engine records is also handed to each reporter. A
//! reporter's own failure is logged by the engine and otherwise ignored.

mod channel;

pub use channel::ChannelReporter;

use crate::core::{WorkflowEvent, WorkflowEventType};
use crate::errors::ReporterError;
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

/// Trait for event observers.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Returns a name used in warnings.
    fn name(&self) -> &str;

    /// Handles one event.
    async fn report(&self, event: &WorkflowEvent) -> Result<(), ReporterError>;
}

/// A reporter that mirrors events into `tracing`.
#[derive(Debug, Clone, Default)]
pub struct LoggingReporter {
    verbose: bool,
}

impl LoggingReporter {
    /// Creates a reporter that logs stage outputs only at debug level.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a reporter that also logs stage outputs at info level.
    #[must_use]
    pub fn verbose() -> Self {
        Self { verbose: true }
    }

    fn log_event(&self, event: &WorkflowEvent) {
        let stage = event.stage_name.as_str();
        let field = |key: &str| {
            event
                .data
                .get(key)
                .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
                .unwrap_or_else(|| "unknown".to_string())
        };

        match event.event_type {
            WorkflowEventType::StageStart => info!(stage, "Starting"),
            WorkflowEventType::StageEnd => {
                let status = field("status");
                if status == "success" {
                    info!(stage, "Completed successfully");
                } else {
                    warn!(stage, status = %status, error = %field("error"), "Stage failed");
                }
                if let Some(output) = event.data.get("output") {
                    if self.verbose {
                        info!(stage, output = %output, "Stage output");
                    } else {
                        debug!(stage, output = %output, "Stage output");
                    }
                }
            }
            WorkflowEventType::StageSkipped => info!(stage, reason = %field("reason"), "Skipped"),
            WorkflowEventType::StageSkippedByUser => info!(stage, "Skipped by intervention"),
            WorkflowEventType::StageError => error!(stage, error = %field("error"), "Stage error"),
            WorkflowEventType::InterventionStart => {
                info!(stage, reason = %field("reason"), "Intervention requested");
            }
            WorkflowEventType::InterventionEnd => info!(stage, "Intervention completed"),
            WorkflowEventType::WorkflowAborted => warn!(stage, "Workflow aborted"),
            WorkflowEventType::MaxIterationsReached => {
                warn!(stage, iterations = %field("iterations"), "Max iterations reached");
            }
            WorkflowEventType::Error => error!(error = %field("error"), "Workflow error"),
        }
    }
}

#[async_trait]
impl Reporter for LoggingReporter {
    fn name(&self) -> &str {
        "logging"
    }

    async fn report(&self, event: &WorkflowEvent) -> Result<(), ReporterError> {
        self.log_event(event);
        Ok(())
    }
}
