//! Reporter that forwards events into a channel.

use super::Reporter;
use crate::core::WorkflowEvent;
use crate::errors::ReporterError;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Forwards events into a bounded `tokio` channel, for UIs that consume
/// events on another task.
///
/// The engine must never wait on a slow consumer, so a full channel is
/// reported as a failure and the event is dropped for this reporter only.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    sender: mpsc::Sender<WorkflowEvent>,
}

impl ChannelReporter {
    /// Creates a reporter and the receiving half of its channel.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<WorkflowEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Wraps an existing sender.
    #[must_use]
    pub fn from_sender(sender: mpsc::Sender<WorkflowEvent>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl Reporter for ChannelReporter {
    fn name(&self) -> &str {
        "channel"
    }

    async fn report(&self, event: &WorkflowEvent) -> Result<(), ReporterError> {
        self.sender.try_send(event.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ReporterError::new(self.name(), "channel full"),
            mpsc::error::TrySendError::Closed(_) => {
                ReporterError::new(self.name(), "receiver dropped")
            }
        })
    }
}
