//! Payment-gated report jobs.
//!
//! A job is created `pending` when a client asks for a report, becomes
//! `verified` once the payment oracle has seen a transfer carrying the job's
//! secret, and ends `completed` (report attached) or `failed` (reason attached).
//!
//! ```text
//!   create_job
//!       │
//!       ▼
//!   ┌─────────┐  payment seen   ┌──────────┐  query ok   ┌───────────┐
//!   │ pending │ ──────────────► │ verified │ ──────────► │ completed │
//!   └────┬────┘                 └────┬─────┘             └───────────┘
//!        │ timeout / cancelled       │ query failed
//!        ▼                           ▼
//!   ┌─────────────────────────────────────┐
//!   │               failed                │
//!   └─────────────────────────────────────┘
//! ```
//!
//! Each job is owned by exactly one [`JobWatcher`], spawned and tracked by the
//! [`WatcherSupervisor`]. Readers only ever see whole-record snapshots.

mod request;
mod secret;
mod store;
mod supervisor;
mod watcher;

pub use request::{parse_report_date, ReportRequest};
pub use secret::{Secret, SecretGenerator, MIN_SECRET_BYTES};
pub use store::{fail_if_active, JobStore, MemoryJobStore};
pub use supervisor::WatcherSupervisor;
pub use watcher::{JobWatcher, WatcherConfig};

use crate::error::{Error, Result};
use crate::report::Report;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Coarse job status, without payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for the payment to show up on chain.
    Pending,
    /// Payment observed, report query running.
    Verified,
    /// Report available.
    Completed,
    /// Terminal failure.
    Failed,
}

impl JobStatus {
    /// Returns true if no further transition can happen.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Verified | Self::Failed)
                | (Self::Verified, Self::Completed | Self::Failed)
        )
    }

    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a job ended in `failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The poll window elapsed without a qualifying payment.
    PaymentTimeout,
    /// The payment oracle was still failing when the poll window elapsed.
    OracleUnavailable(String),
    /// The report query failed after the payment was verified.
    Report(String),
    /// The watcher was stopped by a shutdown.
    Cancelled,
    /// The watcher died unexpectedly.
    Internal(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PaymentTimeout => f.write_str("Payment not found within required timeframe"),
            Self::OracleUnavailable(detail) => write!(
                f,
                "Processing error: payment could not be checked before the deadline ({detail})"
            ),
            Self::Report(detail) => write!(f, "Report generation failed: {detail}"),
            Self::Cancelled => f.write_str("Payment watch cancelled: service shutting down"),
            Self::Internal(_) => f.write_str("Processing error: internal failure"),
        }
    }
}

/// Job state with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    /// Waiting for payment.
    Pending,
    /// Payment observed.
    Verified,
    /// Report ready.
    Completed {
        /// The finished report.
        report: Report,
    },
    /// Terminal failure.
    Failed {
        /// Human readable cause.
        reason: FailureReason,
    },
}

impl JobState {
    /// Status of this state.
    #[must_use]
    pub const fn status(&self) -> JobStatus {
        match self {
            Self::Pending => JobStatus::Pending,
            Self::Verified => JobStatus::Verified,
            Self::Completed { .. } => JobStatus::Completed,
            Self::Failed { .. } => JobStatus::Failed,
        }
    }
}

/// A report job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    secret: Secret,
    request: ReportRequest,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    state: JobState,
}

impl Job {
    /// Create a new pending job stamped with the current time.
    #[must_use]
    pub fn new(secret: Secret, request: ReportRequest) -> Self {
        let now = Utc::now();
        Self {
            secret,
            request,
            created_at: now,
            updated_at: now,
            state: JobState::Pending,
        }
    }

    /// The job's secret (also the expected payment memo).
    #[must_use]
    pub fn secret(&self) -> &Secret {
        &self.secret
    }

    /// Request parameters.
    #[must_use]
    pub fn request(&self) -> &ReportRequest {
        &self.request
    }

    /// Creation time; payments older than this never qualify.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Time of the last transition.
    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &JobState {
        &self.state
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.state.status()
    }

    /// Build the record that results from moving this job to `next`.
    ///
    /// The job itself is left untouched; callers publish the returned record
    /// with [`JobStore::compare_and_swap`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] if the state machine forbids it.
    pub fn advance(&self, next: JobState) -> Result<Self> {
        let from = self.status();
        let to = next.status();
        if !from.can_transition_to(to) {
            return Err(Error::InvalidTransition { from, to });
        }

        Ok(Self {
            secret: self.secret.clone(),
            request: self.request.clone(),
            created_at: self.created_at,
            updated_at: Utc::now().max(self.updated_at),
            state: next,
        })
    }

    /// Download name of the finished report.
    #[must_use]
    pub fn report_filename(&self) -> String {
        format!(
            "psq-{}-{}.csv",
            sanitize_filename_part(self.request.domain()),
            self.request.date().format("%Y-%m-%d")
        )
    }
}

/// Keep filenames safe inside a quoted `Content-Disposition` header.
fn sanitize_filename_part(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// What a status query returns: a projection of one job snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobView {
    /// Waiting for payment.
    Pending,
    /// Payment verified, report running.
    Verified,
    /// Report ready for download.
    Completed {
        /// Suggested download filename.
        filename: String,
        /// Report payload.
        report: Report,
    },
    /// The job failed.
    Failed {
        /// Human readable cause.
        reason: String,
    },
}

impl JobView {
    /// Status the view was taken in.
    #[must_use]
    pub const fn status(&self) -> JobStatus {
        match self {
            Self::Pending => JobStatus::Pending,
            Self::Verified => JobStatus::Verified,
            Self::Completed { .. } => JobStatus::Completed,
            Self::Failed { .. } => JobStatus::Failed,
        }
    }

    /// Progress message for non-terminal views.
    #[must_use]
    pub const fn progress_message(&self) -> Option<&'static str> {
        match self {
            Self::Pending => Some("Waiting for payment verification"),
            Self::Verified => Some("Payment verified, executing query"),
            Self::Completed { .. } | Self::Failed { .. } => None,
        }
    }
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        match job.state() {
            JobState::Pending => Self::Pending,
            JobState::Verified => Self::Verified,
            JobState::Completed { report } => Self::Completed {
                filename: job.report_filename(),
                report: report.clone(),
            },
            JobState::Failed { reason } => Self::Failed {
                reason: reason.to_string(),
            },
        }
    }
}
