//! Job lifecycle events.

use crate::jobs::Secret;
use tokio::sync::broadcast;

/// Events emitted as jobs move through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// A pending job was registered and its watcher started.
    Created {
        /// Job secret.
        secret: Secret,
    },

    /// The payment was observed.
    Verified {
        /// Job secret.
        secret: Secret,
    },

    /// The report is ready.
    Completed {
        /// Job secret.
        secret: Secret,
        /// Report size in bytes.
        bytes: usize,
    },

    /// The job failed.
    Failed {
        /// Job secret.
        secret: Secret,
        /// Failure reason as shown to clients.
        reason: String,
    },
}

impl JobEvent {
    /// Secret of the job the event is about.
    #[must_use]
    pub fn secret(&self) -> &Secret {
        match self {
            Self::Created { secret }
            | Self::Verified { secret }
            | Self::Completed { secret, .. }
            | Self::Failed { secret, .. } => secret,
        }
    }
}

/// Channel for receiving job events.
pub type JobEventsChannel = broadcast::Receiver<JobEvent>;

/// Sender for job events.
pub type JobEventsSender = broadcast::Sender<JobEvent>;

/// Create a new event channel pair.
#[must_use]
pub fn create_event_channel() -> (JobEventsSender, JobEventsChannel) {
    broadcast::channel(256)
}
