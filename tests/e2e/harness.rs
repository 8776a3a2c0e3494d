//! Test harness that assembles a gateway around scripted collaborators.
//!
//! [`ScriptedOracle`] pays exactly the secrets a test marks as paid and can be
//! told to fail its next calls. [`ScriptedExecutor`] returns a fixed report
//! and can be held back with a gate, so tests can observe `verified` while
//! the query is still running.

use async_trait::async_trait;
use axum_test::TestServer;
use parking_lot::Mutex;
use psq_gateway::jobs::ReportRequest;
use psq_gateway::{
    Error, Gateway, GatewayBuilder, GatewayConfig, JobStatus, JobView, PaymentOracle,
    PaymentQuery, QueryExecutor, Report, Result, Secret,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Report body the scripted executor returns.
pub const TEST_CSV: &str = "date,domain,relays,err_cnt,success_rate,avg_latency_ms,p95_latency_ms,p99_latency_ms\n\
2024-06-01,node.example.com,1000,12,0.988,41.5,120.0,250.0\n";

/// Payment oracle driven by the test.
#[derive(Default)]
pub struct ScriptedOracle {
    paid: Mutex<HashSet<String>>,
    failures_left: AtomicUsize,
    queries: Mutex<Vec<PaymentQuery>>,
}

impl ScriptedOracle {
    /// Mark the payment for `secret` as arrived.
    pub fn pay(&self, secret: &Secret) {
        self.paid.lock().insert(secret.as_str().to_string());
    }

    /// Fail the next `n` calls with an oracle error.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Every query received so far.
    pub fn queries(&self) -> Vec<PaymentQuery> {
        self.queries.lock().clone()
    }

    /// Number of calls received for `secret`.
    pub fn calls_for(&self, secret: &Secret) -> usize {
        self.queries
            .lock()
            .iter()
            .filter(|q| q.memo == secret.as_str())
            .count()
    }
}

#[async_trait]
impl PaymentOracle for ScriptedOracle {
    async fn has_qualifying_payment(&self, query: &PaymentQuery) -> Result<bool> {
        self.queries.lock().push(query.clone());

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Oracle("rpc endpoint unreachable".to_string()));
        }
        Ok(self.paid.lock().contains(&query.memo))
    }
}

/// Report executor driven by the test.
pub struct ScriptedExecutor {
    gated: AtomicBool,
    gate: Semaphore,
    failure: Mutex<Option<String>>,
    runs: Mutex<Vec<ReportRequest>>,
}

impl Default for ScriptedExecutor {
    fn default() -> Self {
        Self {
            gated: AtomicBool::new(false),
            gate: Semaphore::new(0),
            failure: Mutex::new(None),
            runs: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedExecutor {
    /// Hold every run until [`Self::release`] is called.
    pub fn hold(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    /// Let one held run finish.
    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    /// Make every run fail with `message`.
    pub fn fail_with(&self, message: &str) {
        *self.failure.lock() = Some(message.to_string());
    }

    /// Requests the executor has started.
    pub fn runs(&self) -> Vec<ReportRequest> {
        self.runs.lock().clone()
    }
}

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    async fn run_report(&self, request: &ReportRequest) -> Result<Report> {
        self.runs.lock().push(request.clone());

        if self.gated.load(Ordering::SeqCst) {
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| Error::Executor(e.to_string()))?;
            permit.forget();
        }

        let failure = self.failure.lock().clone();
        match failure {
            Some(message) => Err(Error::Executor(message)),
            None => Report::from_csv(TEST_CSV),
        }
    }
}

/// A gateway wired to scripted collaborators.
pub struct TestGateway {
    /// The gateway under test.
    pub gateway: Gateway,
    /// Its payment oracle.
    pub oracle: Arc<ScriptedOracle>,
    /// Its report executor.
    pub executor: Arc<ScriptedExecutor>,
}

impl TestGateway {
    /// Gateway with default payment terms.
    pub fn start() -> Self {
        Self::with_config(GatewayConfig::default())
    }

    /// Gateway with custom configuration.
    pub fn with_config(config: GatewayConfig) -> Self {
        let oracle = Arc::new(ScriptedOracle::default());
        let executor = Arc::new(ScriptedExecutor::default());
        let gateway = GatewayBuilder::new(config)
            .with_oracle(Arc::clone(&oracle) as Arc<dyn PaymentOracle>)
            .with_executor(Arc::clone(&executor) as Arc<dyn QueryExecutor>)
            .build()
            .expect("Failed to build gateway");

        Self {
            gateway,
            oracle,
            executor,
        }
    }

    /// In-process HTTP client for the gateway's router.
    pub fn server(&self) -> TestServer {
        TestServer::new(self.gateway.router()).expect("Failed to create test server")
    }

    /// Submit a request for the sample node and day.
    pub async fn create_sample_job(&self) -> Secret {
        self.gateway
            .requests()
            .create_job("node.example.com", "2024-06-01", "pokt1payor")
            .await
            .expect("Failed to create job")
    }

    /// Poll the status service until the job reaches `status`.
    ///
    /// Panics if it has not done so within `within`.
    pub async fn wait_for_status(
        &self,
        secret: &Secret,
        status: JobStatus,
        within: Duration,
    ) -> JobView {
        let poll = async {
            loop {
                let view = self
                    .gateway
                    .status()
                    .get_status(secret)
                    .await
                    .expect("job should exist");
                if view.status() == status {
                    return view;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };

        match tokio::time::timeout(within, poll).await {
            Ok(view) => view,
            Err(_) => panic!("job {secret} did not reach {status} within {within:?}"),
        }
    }
}
