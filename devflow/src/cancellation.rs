//! Cooperative stop requests.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// A flag asking a long-running loop to stop at its next check point.
///
/// Requests are idempotent; the first reason wins. Nothing in flight is
/// interrupted.
#[derive(Debug, Default)]
pub struct StopFlag {
    requested: AtomicBool,
    reason: RwLock<Option<String>>,
}

impl StopFlag {
    /// Creates a cleared flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop.
    pub fn request(&self, reason: impl Into<String>) {
        if self
            .requested
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let reason = reason.into();
            info!(reason = %reason, "Stop requested");
            *self.reason.write() = Some(reason);
        }
    }

    /// Returns true once a stop has been requested.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Returns the first stop reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// Clears the flag so the next run starts fresh.
    pub fn reset(&self) {
        *self.reason.write() = None;
        self.requested.store(false, Ordering::SeqCst);
    }
}
