//! Watcher task supervision.
//!
//! Every job gets one [`JobWatcher`] task. The supervisor keeps an abort
//! handle per running watcher and a monitor task that waits for the watcher to
//! end. If a watcher returns an error, panics or is aborted, the monitor marks
//! its job failed so no job is left pending with nobody watching it.

use crate::error::{Error, Result};
use crate::event::{JobEvent, JobEventsSender};
use crate::jobs::{
    fail_if_active, FailureReason, Job, JobStatus, JobStore, JobWatcher, Secret, WatcherConfig,
};
use crate::payment::PaymentOracle;
use crate::report::QueryExecutor;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinError};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Running watchers, keyed by job secret.
struct ActiveWatchers {
    handles: Mutex<HashMap<Secret, AbortHandle>>,
    count: watch::Sender<usize>,
}

impl ActiveWatchers {
    fn insert(&self, secret: Secret, handle: AbortHandle) {
        let mut handles = self.handles.lock();
        handles.insert(secret, handle);
        self.count.send_replace(handles.len());
    }

    fn remove(&self, secret: &Secret) {
        let mut handles = self.handles.lock();
        handles.remove(secret);
        self.count.send_replace(handles.len());
    }

    fn abort_all(&self) -> usize {
        let handles = self.handles.lock();
        for handle in handles.values() {
            handle.abort();
        }
        handles.len()
    }
}

/// Spawns and tracks job watchers.
pub struct WatcherSupervisor {
    store: Arc<dyn JobStore>,
    oracle: Arc<dyn PaymentOracle>,
    executor: Arc<dyn QueryExecutor>,
    config: Arc<WatcherConfig>,
    events: JobEventsSender,
    shutdown_tx: watch::Sender<bool>,
    active: Arc<ActiveWatchers>,
}

impl WatcherSupervisor {
    /// Create a supervisor. No watchers run until [`Self::spawn`] is called.
    #[must_use]
    pub fn new(
        store: Arc<dyn JobStore>,
        oracle: Arc<dyn PaymentOracle>,
        executor: Arc<dyn QueryExecutor>,
        config: WatcherConfig,
        events: JobEventsSender,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let (count, _) = watch::channel(0);

        Self {
            store,
            oracle,
            executor,
            config: Arc::new(config),
            events,
            shutdown_tx,
            active: Arc::new(ActiveWatchers {
                handles: Mutex::new(HashMap::new()),
                count,
            }),
        }
    }

    /// Start watching `job` in the background.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] once [`Self::shutdown`] has been called.
    pub fn spawn(&self, job: Job) -> Result<()> {
        if self.is_shutting_down() {
            return Err(Error::ShuttingDown);
        }

        let secret = job.secret().clone();
        let watcher = JobWatcher::new(
            Arc::clone(&self.store),
            Arc::clone(&self.oracle),
            Arc::clone(&self.executor),
            Arc::clone(&self.config),
            self.events.clone(),
            self.shutdown_tx.subscribe(),
        );

        let span = info_span!("watcher", job = %secret.short());
        let handle = tokio::spawn(watcher.watch(job).instrument(span));

        // Registered before the monitor exists, so the monitor's removal
        // always comes after this insert.
        self.active.insert(secret.clone(), handle.abort_handle());

        let active = Arc::clone(&self.active);
        let store = Arc::clone(&self.store);
        let events = self.events.clone();
        tokio::spawn(async move {
            let outcome = handle.await;
            if let Some(reason) = failure_for(&secret, outcome) {
                let message = reason.to_string();
                match fail_if_active(&store, &secret, reason).await {
                    Ok(Some(_)) => {
                        let _ = events.send(JobEvent::Failed {
                            secret: secret.clone(),
                            reason: message,
                        });
                    }
                    Ok(None) => {}
                    Err(e) => error!("Could not fail job {}: {}", secret.short(), e),
                }
            }
            active.remove(&secret);
        });

        Ok(())
    }

    /// Number of watchers currently running.
    #[must_use]
    pub fn active(&self) -> usize {
        *self.active.count.borrow()
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Cancel all watchers.
    ///
    /// Signals every watcher, waits up to `grace` for them to record their
    /// cancellation, then aborts whatever is still running. Returns the number
    /// of watchers that had to be aborted.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        self.shutdown_tx.send_replace(true);
        let running = self.active();
        if running > 0 {
            info!("Cancelling {} job watchers", running);
        }

        let mut count = self.active.count.subscribe();
        if matches!(
            tokio::time::timeout(grace, count.wait_for(|n| *n == 0)).await,
            Ok(Ok(_))
        ) {
            return 0;
        }

        let aborted = self.active.abort_all();
        warn!("Aborted {} job watchers after {:?} grace period", aborted, grace);

        // Monitors record the aborts.
        if !matches!(
            tokio::time::timeout(grace, count.wait_for(|n| *n == 0)).await,
            Ok(Ok(_))
        ) {
            error!("{} job watchers still registered after abort", self.active());
        }
        aborted
    }
}

/// Failure to record for a watcher that ended, if it did not record one itself.
fn failure_for(
    secret: &Secret,
    outcome: std::result::Result<Result<JobStatus>, JoinError>,
) -> Option<FailureReason> {
    match outcome {
        Ok(Ok(status)) => {
            debug!("Watcher for job {} finished ({})", secret.short(), status);
            None
        }
        Ok(Err(e)) => {
            error!("Watcher for job {} failed: {}", secret.short(), e);
            Some(FailureReason::Internal(e.to_string()))
        }
        Err(e) if e.is_cancelled() => {
            warn!("Watcher for job {} was aborted", secret.short());
            Some(FailureReason::Cancelled)
        }
        Err(e) => {
            error!("Watcher for job {} panicked: {}", secret.short(), e);
            Some(FailureReason::Internal(e.to_string()))
        }
    }
}
