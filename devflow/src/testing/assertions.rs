//! Assertions over a run history.

use crate::core::{WorkflowEvent, WorkflowEventType};

/// Counts events of `event_type` recorded for `stage_name`.
#[must_use]
pub fn count_events(history: &[WorkflowEvent], event_type: WorkflowEventType, stage_name: &str) -> usize {
    history.iter().filter(|e| e.is(event_type, stage_name)).count()
}

/// Returns `(event_type, stage_name)` for every event, in order.
#[must_use]
pub fn event_trace(history: &[WorkflowEvent]) -> Vec<(WorkflowEventType, &str)> {
    history
        .iter()
        .map(|e| (e.event_type, e.stage_name.as_str()))
        .collect()
}

/// Asserts the number of events of a type for a stage.
pub fn assert_event_count(
    history: &[WorkflowEvent],
    event_type: WorkflowEventType,
    stage_name: &str,
    expected: usize,
) {
    let actual = count_events(history, event_type, stage_name);
    assert_eq!(
        actual, expected,
        "Expected {expected} {event_type} events for '{stage_name}', got {actual}. Trace: {:?}",
        event_trace(history)
    );
}

/// Asserts the exact event sequence.
pub fn assert_event_sequence(history: &[WorkflowEvent], expected: &[(WorkflowEventType, &str)]) {
    assert_eq!(event_trace(history), expected, "Unexpected event sequence");
}

/// Asserts that every `stage_start` is closed by a `stage_end` or
/// `stage_error` of the same stage before anything else starts.
pub fn assert_starts_closed(history: &[WorkflowEvent]) {
    let mut open: Option<&str> = None;
    for event in history {
        match event.event_type {
            WorkflowEventType::StageStart => {
                assert!(
                    open.is_none(),
                    "Stage '{}' started while '{}' was still open",
                    event.stage_name,
                    open.unwrap_or_default()
                );
                open = Some(event.stage_name.as_str());
            }
            WorkflowEventType::StageEnd | WorkflowEventType::StageError => {
                assert_eq!(
                    open,
                    Some(event.stage_name.as_str()),
                    "{} for '{}' without a matching start",
                    event.event_type,
                    event.stage_name
                );
                open = None;
            }
            _ => {}
        }
    }
    assert!(open.is_none(), "Stage '{}' never closed", open.unwrap_or_default());
}
