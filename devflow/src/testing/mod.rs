//! Testing utilities for devflow workflows.
//!
//! This module provides:
//! - Scripted stages, agents and intervention handlers
//! - Reporters that collect events or always fail
//! - Assertions over a run history

mod assertions;
mod mocks;

pub use assertions::{
    assert_event_count, assert_event_sequence, assert_starts_closed, count_events, event_trace,
};
pub use mocks::{
    CollectingReporter, FailingReporter, ScriptedAgent, ScriptedHandler, ScriptedStage,
};
