//! Bounded window of injected instructions.

use crate::config::AgentSettings;
use crate::utils::Timestamp;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Number of recent instructions an agent honours unless configured otherwise.
pub const DEFAULT_INSTRUCTION_WINDOW: usize = 3;

/// One injected instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// The guidance text.
    pub text: String,
    /// When it was injected.
    pub injected_at: Timestamp,
}

/// Keeps the most recent injected instructions for an agent.
///
/// Interior mutability lets `Agent::inject_instruction` take `&self`.
/// Instructions beyond the window are dropped oldest first.
#[derive(Debug)]
pub struct InstructionWindow {
    capacity: usize,
    entries: Mutex<VecDeque<Instruction>>,
}

impl Default for InstructionWindow {
    fn default() -> Self {
        Self::new(DEFAULT_INSTRUCTION_WINDOW)
    }
}

impl InstructionWindow {
    /// Creates a window holding at most `capacity` instructions (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Creates a window sized by `agents.instruction_window`.
    #[must_use]
    pub fn from_settings(settings: &AgentSettings) -> Self {
        Self::new(settings.instruction_window)
    }

    /// Returns the window size.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records an instruction, evicting the oldest if the window is full.
    pub fn push(&self, text: impl Into<String>) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            if let Some(dropped) = entries.pop_front() {
                tracing::debug!(dropped = %dropped.text, "Instruction window full, dropping oldest");
            }
        }
        entries.push_back(Instruction {
            text: text.into(),
            injected_at: Utc::now(),
        });
    }

    /// Returns the honoured instructions, oldest first.
    #[must_use]
    pub fn recent(&self) -> Vec<Instruction> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Returns the honoured instruction texts, oldest first.
    #[must_use]
    pub fn texts(&self) -> Vec<String> {
        self.entries.lock().iter().map(|i| i.text.clone()).collect()
    }

    /// Returns the number of honoured instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if no instruction is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drops every instruction.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Prefixes `prompt` with the honoured instructions.
    ///
    /// Returns `prompt` unchanged when the window is empty.
    #[must_use]
    pub fn apply(&self, prompt: &str) -> String {
        let entries = self.entries.lock();
        if entries.is_empty() {
            return prompt.to_string();
        }
        let preamble = entries
            .iter()
            .enumerate()
            .map(|(i, inst)| format!("[Supervisor instruction {}]: {}", i + 1, inst.text))
            .collect::<Vec<_>>()
            .join("\n\n");
        format!("{preamble}\n\n{prompt}")
    }
}
