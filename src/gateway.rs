//! Gateway wiring: store, supervisor, services, retention sweeper and HTTP server.

use crate::api::{self, AppState};
use crate::config::GatewayConfig;
use crate::error::{Error, Result};
use crate::event::{create_event_channel, JobEventsChannel, JobEventsSender};
use crate::jobs::{JobStore, MemoryJobStore, SecretGenerator, WatcherConfig, WatcherSupervisor};
use crate::payment::{PaymentOracle, PocketPaymentOracle};
use crate::report::{BigQueryExecutor, QueryExecutor};
use crate::service::{RequestService, StatusService};
use axum::Router;
use chrono::{TimeDelta, Utc};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Builder for constructing a gateway.
///
/// The payment oracle, report executor and job store default to the Pocket
/// REST oracle, the `bq` executor and the in-memory store.
pub struct GatewayBuilder {
    config: GatewayConfig,
    oracle: Option<Arc<dyn PaymentOracle>>,
    executor: Option<Arc<dyn QueryExecutor>>,
    store: Option<Arc<dyn JobStore>>,
}

impl GatewayBuilder {
    /// Create a new gateway builder with the given configuration.
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            oracle: None,
            executor: None,
            store: None,
        }
    }

    /// Use a custom payment oracle.
    #[must_use]
    pub fn with_oracle(mut self, oracle: Arc<dyn PaymentOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Use a custom report executor.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn QueryExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Use a custom job store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Validate the configuration and assemble the gateway.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid or a default
    /// collaborator cannot be created.
    pub fn build(self) -> Result<Gateway> {
        self.config.validate()?;
        info!(
            "Building psq-gateway (chain: {}, payee: {}, price: {}{})",
            self.config.chain.env.chain_id(),
            self.config.payment.payee,
            self.config.payment.min_amount,
            self.config.payment.denom
        );

        let store: Arc<dyn JobStore> = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryJobStore::new()),
        };
        let oracle: Arc<dyn PaymentOracle> = match self.oracle {
            Some(oracle) => oracle,
            None => Arc::new(PocketPaymentOracle::new(&self.config.chain)?),
        };
        let executor: Arc<dyn QueryExecutor> = match self.executor {
            Some(executor) => executor,
            None => Arc::new(BigQueryExecutor::new(&self.config.report)?),
        };

        let secrets = SecretGenerator::new(self.config.jobs.secret_bytes)?;
        let retention = TimeDelta::from_std(self.config.jobs.retention())
            .map_err(|e| Error::Config(format!("jobs.retention_secs out of range: {e}")))?;

        let (events_tx, _) = create_event_channel();
        let (shutdown_tx, _) = watch::channel(false);

        let supervisor = Arc::new(WatcherSupervisor::new(
            Arc::clone(&store),
            oracle,
            executor,
            WatcherConfig::from(&self.config.payment),
            events_tx.clone(),
        ));
        let requests = RequestService::new(
            Arc::clone(&store),
            Arc::clone(&supervisor),
            secrets,
            self.config.jobs.max_outstanding,
            events_tx.clone(),
        );
        let status = StatusService::new(Arc::clone(&store));

        Ok(Gateway {
            config: self.config,
            store,
            supervisor,
            requests,
            status,
            events_tx,
            shutdown_tx,
            retention,
        })
    }
}

/// An assembled gateway.
pub struct Gateway {
    config: GatewayConfig,
    store: Arc<dyn JobStore>,
    supervisor: Arc<WatcherSupervisor>,
    requests: RequestService,
    status: StatusService,
    events_tx: JobEventsSender,
    shutdown_tx: watch::Sender<bool>,
    retention: TimeDelta,
}

impl Gateway {
    /// Configuration the gateway was built with.
    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// The HTTP API, bound to this gateway's services.
    #[must_use]
    pub fn router(&self) -> Router {
        api::router(AppState::new(
            self.requests.clone(),
            self.status.clone(),
            self.config.payment.instructions(),
        ))
    }

    /// Request service.
    #[must_use]
    pub fn requests(&self) -> &RequestService {
        &self.requests
    }

    /// Status service.
    #[must_use]
    pub fn status(&self) -> &StatusService {
        &self.status
    }

    /// Watcher supervisor.
    #[must_use]
    pub fn supervisor(&self) -> &WatcherSupervisor {
        &self.supervisor
    }

    /// Subscribe to job events.
    #[must_use]
    pub fn subscribe_events(&self) -> JobEventsChannel {
        self.events_tx.subscribe()
    }

    /// Evict terminal jobs older than the retention window once.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn sweep_once(&self) -> Result<usize> {
        evict_expired(&self.store, self.retention).await
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound or the server fails.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.server.listen_addr).await?;
        self.serve(listener).await
    }

    /// Serve on `listener` until [`Self::shutdown`] is called or Ctrl-C is
    /// received, then cancel all watchers.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!("psq-gateway listening on {}", listener.local_addr()?);

        let sweeper = self.spawn_sweeper();

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let signal = async move {
            tokio::select! {
                () = shutdown_requested(&mut shutdown_rx) => {
                    info!("Shutdown signal received");
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl-C received, initiating shutdown");
                }
            }
        };

        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(signal)
            .await;

        // Stops the sweeper and refuses new jobs, whatever ended the server.
        self.shutdown();
        let aborted = self
            .supervisor
            .shutdown(self.config.jobs.shutdown_grace())
            .await;
        if aborted > 0 {
            warn!("{} watchers had to be aborted", aborted);
        }
        if let Err(e) = sweeper.await {
            warn!("Retention sweeper ended abnormally: {}", e);
        }

        served?;
        info!("psq-gateway shutdown complete");
        Ok(())
    }

    /// Request the gateway to shut down.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    fn spawn_sweeper(&self) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let retention = self.retention;
        let interval = self.config.jobs.sweep_interval();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    () = tokio::time::sleep(interval) => {
                        if let Err(e) = evict_expired(&store, retention).await {
                            warn!("Retention sweep failed: {}", e);
                        }
                    }
                }
            }
            debug!("Retention sweeper stopped");
        })
    }
}

async fn evict_expired(store: &Arc<dyn JobStore>, retention: TimeDelta) -> Result<usize> {
    let Some(cutoff) = Utc::now().checked_sub_signed(retention) else {
        return Ok(0);
    };
    let evicted = store.evict_terminal(cutoff).await?;
    if evicted > 0 {
        info!("Evicted {} finished jobs", evicted);
    }
    Ok(evicted)
}

async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    if shutdown_rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
