//! Request and status services.
//!
//! These are the two operations clients have: ask for a report (and get a
//! secret back) and look up a job by its secret. The HTTP layer is a thin
//! shell around them.

use crate::error::{Error, Result};
use crate::event::{JobEvent, JobEventsSender};
use crate::jobs::{
    fail_if_active, FailureReason, Job, JobStore, JobView, ReportRequest, Secret,
    SecretGenerator, WatcherSupervisor,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Secrets drawn before giving up on a collision.
const SECRET_ATTEMPTS: usize = 3;

/// Accepts report requests.
#[derive(Clone)]
pub struct RequestService {
    store: Arc<dyn JobStore>,
    supervisor: Arc<WatcherSupervisor>,
    secrets: SecretGenerator,
    max_outstanding: usize,
    events: JobEventsSender,
}

impl RequestService {
    /// Create a request service.
    #[must_use]
    pub fn new(
        store: Arc<dyn JobStore>,
        supervisor: Arc<WatcherSupervisor>,
        secrets: SecretGenerator,
        max_outstanding: usize,
        events: JobEventsSender,
    ) -> Self {
        Self {
            store,
            supervisor,
            secrets,
            max_outstanding,
            events,
        }
    }

    /// Register a pending job and start watching for its payment.
    ///
    /// Returns as soon as the job is stored; the payment watch runs in the
    /// background.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] if a field is missing or malformed. Nothing is
    ///   stored in that case.
    /// - [`Error::Capacity`] if too many jobs are outstanding.
    /// - [`Error::ShuttingDown`] once the gateway has begun shutting down.
    pub async fn create_job(
        &self,
        domain: &str,
        date: &str,
        payor_address: &str,
    ) -> Result<Secret> {
        let request = ReportRequest::new(domain, date, payor_address)?;

        if self.supervisor.is_shutting_down() {
            return Err(Error::ShuttingDown);
        }

        let job = self.insert_fresh(request).await?;
        let secret = job.secret().clone();
        info!(
            "Created job {} for {} on {}",
            secret.short(),
            job.request().domain(),
            job.request().date()
        );
        let _ = self.events.send(JobEvent::Created {
            secret: secret.clone(),
        });

        if let Err(e) = self.supervisor.spawn(job) {
            // Shutdown began after the job was stored.
            fail_if_active(&self.store, &secret, FailureReason::Cancelled).await?;
            return Err(e);
        }
        Ok(secret)
    }

    async fn insert_fresh(&self, request: ReportRequest) -> Result<Job> {
        for _ in 0..SECRET_ATTEMPTS {
            let job = Job::new(self.secrets.generate(), request.clone());
            match self.store.insert(job.clone(), self.max_outstanding).await {
                Ok(()) => return Ok(job),
                Err(Error::DuplicateSecret) => {
                    warn!("Secret collision, drawing a new one");
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::Internal(format!(
            "no unique secret after {SECRET_ATTEMPTS} attempts"
        )))
    }
}

/// Answers status queries.
#[derive(Clone)]
pub struct StatusService {
    store: Arc<dyn JobStore>,
}

impl StatusService {
    /// Create a status service.
    #[must_use]
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Current view of the job for `secret`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown (or evicted) secrets.
    pub async fn get_status(&self, secret: &Secret) -> Result<JobView> {
        let job = self.store.get(secret).await?.ok_or(Error::NotFound)?;
        Ok(JobView::from(&job))
    }

    /// Number of pending or verified jobs.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn outstanding(&self) -> Result<usize> {
        self.store.outstanding().await
    }
}
