//! Job registry.
//!
//! All writes are whole-record replacements guarded by a compare-and-swap on
//! the job status, so readers never see a half-updated job.

use crate::error::{Error, Result};
use crate::jobs::{FailureReason, Job, JobState, JobStatus, Secret};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Storage for report jobs, keyed by secret.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateSecret`] if the secret is already present and
    /// [`Error::Capacity`] if `max_outstanding` non-terminal jobs already exist.
    async fn insert(&self, job: Job, max_outstanding: usize) -> Result<()>;

    /// Snapshot of the job for `secret`, if any.
    async fn get(&self, secret: &Secret) -> Result<Option<Job>>;

    /// Replace the stored job with `next` if it is still in `expected` status
    /// and the state machine allows the move.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown secrets and
    /// [`Error::InvalidTransition`] when the precondition does not hold.
    async fn compare_and_swap(&self, expected: JobStatus, next: Job) -> Result<Job>;

    /// Number of pending or verified jobs.
    async fn outstanding(&self) -> Result<usize>;

    /// Drop terminal jobs last updated before `cutoff`. Returns how many.
    async fn evict_terminal(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// In-memory job store.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Secret, Job>>,
}

impl MemoryJobStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored jobs, terminal ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: Job, max_outstanding: usize) -> Result<()> {
        let mut jobs = self.jobs.write();

        if jobs.contains_key(job.secret()) {
            return Err(Error::DuplicateSecret);
        }

        let outstanding = jobs.values().filter(|j| !j.status().is_terminal()).count();
        if outstanding >= max_outstanding {
            return Err(Error::Capacity);
        }

        jobs.insert(job.secret().clone(), job);
        Ok(())
    }

    async fn get(&self, secret: &Secret) -> Result<Option<Job>> {
        Ok(self.jobs.read().get(secret).cloned())
    }

    async fn compare_and_swap(&self, expected: JobStatus, next: Job) -> Result<Job> {
        let mut jobs = self.jobs.write();
        let current = jobs.get_mut(next.secret()).ok_or(Error::NotFound)?;

        let from = current.status();
        let to = next.status();
        if from != expected || !from.can_transition_to(to) {
            return Err(Error::InvalidTransition { from, to });
        }

        *current = next;
        Ok(current.clone())
    }

    async fn outstanding(&self) -> Result<usize> {
        Ok(self
            .jobs
            .read()
            .values()
            .filter(|j| !j.status().is_terminal())
            .count())
    }

    async fn evict_terminal(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut jobs = self.jobs.write();
        let before = jobs.len();
        jobs.retain(|_, job| !(job.status().is_terminal() && job.updated_at() < cutoff));
        let evicted = before - jobs.len();

        if evicted > 0 {
            debug!("Evicted {} expired jobs, {} remain", evicted, jobs.len());
        }
        Ok(evicted)
    }
}

/// Mark a job failed unless it already reached a terminal state.
///
/// Used when the watcher owning the job can no longer finish it. Returns the
/// failed record if this call made the transition, `None` if the job is gone
/// or already terminal.
///
/// # Errors
///
/// Propagates store errors other than a lost race with a concurrent transition.
pub async fn fail_if_active(
    store: &Arc<dyn JobStore>,
    secret: &Secret,
    reason: FailureReason,
) -> Result<Option<Job>> {
    let Some(job) = store.get(secret).await? else {
        return Ok(None);
    };
    if job.status().is_terminal() {
        return Ok(None);
    }

    let failed = job.advance(JobState::Failed { reason })?;
    match store.compare_and_swap(job.status(), failed).await {
        Ok(job) => Ok(Some(job)),
        Err(Error::InvalidTransition { from, .. }) => {
            warn!("Job {} moved to {} while being failed", secret.short(), from);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
