//! Core value types for devflow.
//!
//! This module contains the immutable records the engine produces:
//! - Stage status, stage kind and run status enums
//! - The per-attempt stage result
//! - Workflow events recorded in the run history

mod event;
mod result;
mod status;

pub use event::{WorkflowEvent, WorkflowEventType, WORKFLOW_STAGE_NAME};
pub use result::StageResult;
pub use status::{RunStatus, StageKind, StageStatus};
