//! Per-job payment watcher.
//!
//! A watcher owns one pending job. It polls the payment oracle until a
//! qualifying payment shows up or the poll window closes, then runs the report
//! query. Every state change is published to the store before the next step
//! starts, so clients see `verified` while the query is still running.

use crate::config::PaymentConfig;
use crate::error::{Error, Result};
use crate::event::{JobEvent, JobEventsSender};
use crate::jobs::{FailureReason, Job, JobState, JobStatus, JobStore};
use crate::payment::{PaymentOracle, PaymentQuery};
use crate::report::QueryExecutor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Payment terms and timing a watcher enforces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherConfig {
    /// Receiving account.
    pub payee: String,
    /// Minimum amount in `denom`.
    pub min_amount: u64,
    /// Denomination.
    pub denom: String,
    /// Delay between polls.
    pub poll_interval: Duration,
    /// Length of the poll window.
    pub timeout: Duration,
}

impl From<&PaymentConfig> for WatcherConfig {
    fn from(config: &PaymentConfig) -> Self {
        Self {
            payee: config.payee.clone(),
            min_amount: config.min_amount,
            denom: config.denom.clone(),
            poll_interval: config.poll_interval(),
            timeout: config.timeout(),
        }
    }
}

/// Drives one job from `pending` to a terminal state.
#[derive(Clone)]
pub struct JobWatcher {
    store: Arc<dyn JobStore>,
    oracle: Arc<dyn PaymentOracle>,
    executor: Arc<dyn QueryExecutor>,
    config: Arc<WatcherConfig>,
    events: JobEventsSender,
    shutdown: watch::Receiver<bool>,
}

impl JobWatcher {
    /// Create a watcher. `shutdown` flipping to `true` cancels it.
    #[must_use]
    pub fn new(
        store: Arc<dyn JobStore>,
        oracle: Arc<dyn PaymentOracle>,
        executor: Arc<dyn QueryExecutor>,
        config: Arc<WatcherConfig>,
        events: JobEventsSender,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            oracle,
            executor,
            config,
            events,
            shutdown,
        }
    }

    /// Watch `job` until it is completed or failed.
    ///
    /// Returns the terminal status that was recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects a transition, which means
    /// something other than this watcher modified the job.
    pub async fn watch(self, job: Job) -> Result<JobStatus> {
        let mut shutdown = self.shutdown.clone();

        if let Some(reason) = self.await_payment(&job, &mut shutdown).await {
            return self.fail(&job, reason).await;
        }

        let verified = job.advance(JobState::Verified)?;
        let verified = self
            .store
            .compare_and_swap(JobStatus::Pending, verified)
            .await?;
        info!("Payment verified for job {}", job.secret().short());
        let _ = self.events.send(JobEvent::Verified {
            secret: job.secret().clone(),
        });

        let outcome = tokio::select! {
            result = self.executor.run_report(verified.request()) => Some(result),
            () = cancelled(&mut shutdown) => None,
        };

        match outcome {
            Some(Ok(report)) => {
                let bytes = report.len();
                let completed = verified.advance(JobState::Completed { report })?;
                self.store
                    .compare_and_swap(JobStatus::Verified, completed)
                    .await?;
                info!("Job {} completed ({} bytes)", job.secret().short(), bytes);
                let _ = self.events.send(JobEvent::Completed {
                    secret: job.secret().clone(),
                    bytes,
                });
                Ok(JobStatus::Completed)
            }
            Some(Err(e)) => {
                let detail = match e {
                    Error::Executor(message) => message,
                    other => other.to_string(),
                };
                self.fail(&verified, FailureReason::Report(detail)).await
            }
            None => self.fail(&verified, FailureReason::Cancelled).await,
        }
    }

    /// Poll until paid. Returns `None` once a qualifying payment is seen,
    /// otherwise the reason the job has to fail.
    async fn await_payment(
        &self,
        job: &Job,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<FailureReason> {
        let query = PaymentQuery {
            payee: self.config.payee.clone(),
            payor: job.request().payor_address().to_string(),
            min_amount: self.config.min_amount,
            denom: self.config.denom.clone(),
            memo: job.secret().as_str().to_string(),
            since: job.created_at(),
        };

        let deadline = Instant::now() + self.config.timeout;
        let mut last_error: Option<String> = None;
        let mut answered = false;
        let mut attempt: u32 = 0;

        loop {
            if Instant::now() >= deadline {
                return Some(match last_error {
                    Some(detail) => FailureReason::OracleUnavailable(detail),
                    None => FailureReason::PaymentTimeout,
                });
            }
            attempt += 1;

            let poll = tokio::select! {
                result = tokio::time::timeout_at(deadline, self.oracle.has_qualifying_payment(&query)) => result,
                () = cancelled(shutdown) => return Some(FailureReason::Cancelled),
            };

            match poll {
                Ok(Ok(true)) => return None,
                Ok(Ok(false)) => {
                    answered = true;
                    last_error = None;
                    debug!(
                        "No payment yet for job {} (attempt {})",
                        job.secret().short(),
                        attempt
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        "Payment check failed for job {} (attempt {}): {}",
                        job.secret().short(),
                        attempt,
                        e
                    );
                    last_error = Some(e.to_string());
                }
                Err(_) => {
                    debug!(
                        "Abandoned payment check for job {} at the deadline",
                        job.secret().short()
                    );
                    if !answered && last_error.is_none() {
                        last_error = Some("oracle did not answer before the deadline".to_string());
                    }
                }
            }

            let wake = (Instant::now() + self.config.poll_interval).min(deadline);
            tokio::select! {
                () = tokio::time::sleep_until(wake) => {}
                () = cancelled(shutdown) => return Some(FailureReason::Cancelled),
            }
        }
    }

    async fn fail(&self, job: &Job, reason: FailureReason) -> Result<JobStatus> {
        let message = reason.to_string();
        let failed = job.advance(JobState::Failed { reason })?;
        self.store.compare_and_swap(job.status(), failed).await?;

        info!("Job {} failed: {}", job.secret().short(), message);
        let _ = self.events.send(JobEvent::Failed {
            secret: job.secret().clone(),
            reason: message,
        });
        Ok(JobStatus::Failed)
    }
}

/// Resolves once shutdown is signalled. Never resolves if the sender is gone.
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
