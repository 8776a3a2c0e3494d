//! Job pipeline tests: payment watching, report execution and shutdown.
//!
//! Most of these run on a paused clock so the 150 second payment window
//! elapses instantly.

use super::{TestGateway, TEST_CSV};
use psq_gateway::{Error, JobEvent, JobStatus, JobView};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_test::assert_ok;

/// Longer than the default payment window.
const WINDOW: Duration = Duration::from_secs(200);

#[tokio::test(start_paused = true)]
async fn test_unpaid_job_times_out() {
    let harness = TestGateway::start();
    let secret = harness.create_sample_job().await;

    let view = harness
        .wait_for_status(&secret, JobStatus::Failed, WINDOW)
        .await;
    assert_eq!(
        view,
        JobView::Failed {
            reason: "Payment not found within required timeframe".to_string()
        }
    );

    // One poll every 5s across the 150s window.
    let calls = harness.oracle.calls_for(&secret);
    assert!((30..=31).contains(&calls), "unexpected poll count {calls}");
    assert!(harness.executor.runs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_late_payment_completes_job() {
    let harness = TestGateway::start();
    let secret = harness.create_sample_job().await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(
        assert_ok!(harness.gateway.status().get_status(&secret).await).status(),
        JobStatus::Pending
    );
    assert!(harness.executor.runs().is_empty());

    harness.oracle.pay(&secret);
    let view = harness
        .wait_for_status(&secret, JobStatus::Completed, Duration::from_secs(10))
        .await;

    match view {
        JobView::Completed { filename, report } => {
            assert_eq!(filename, "psq-node.example.com-2024-06-01.csv");
            assert_eq!(report.as_bytes(), TEST_CSV.as_bytes());
        }
        other => panic!("unexpected view {other:?}"),
    }

    let runs = harness.executor.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].domain(), "node.example.com");
    assert_eq!(runs[0].date().to_string(), "2024-06-01");
}

#[tokio::test(start_paused = true)]
async fn test_payment_query_matches_job() {
    let harness = TestGateway::start();
    let secret = harness.create_sample_job().await;
    let job_created = chrono::Utc::now();

    tokio::time::sleep(Duration::from_secs(1)).await;

    let queries = harness.oracle.queries();
    let query = queries.first().expect("oracle was polled");
    assert_eq!(query.memo, secret.as_str());
    assert_eq!(query.payor, "pokt1payor");
    assert_eq!(query.payee, "pokt1lf0kekv9zcv9v3wy4v6jx2wh7v4665s8e0sl9s");
    assert_eq!(query.min_amount, 20_000_000);
    assert_eq!(query.denom, "upokt");
    assert!(query.since <= job_created);
}

#[tokio::test(start_paused = true)]
async fn test_transient_oracle_errors_are_retried() {
    let harness = TestGateway::start();
    harness.oracle.fail_next(3);
    let secret = harness.create_sample_job().await;
    harness.oracle.pay(&secret);

    harness
        .wait_for_status(&secret, JobStatus::Completed, WINDOW)
        .await;
    assert_eq!(harness.oracle.calls_for(&secret), 4);
}

#[tokio::test(start_paused = true)]
async fn test_oracle_outage_fails_job_at_deadline() {
    let harness = TestGateway::start();
    harness.oracle.fail_next(usize::MAX);
    let secret = harness.create_sample_job().await;
    harness.oracle.pay(&secret);

    let view = harness
        .wait_for_status(&secret, JobStatus::Failed, WINDOW)
        .await;
    let JobView::Failed { reason } = view else {
        panic!("expected a failed view");
    };
    assert!(reason.starts_with("Processing error"), "reason: {reason}");
    assert!(reason.contains("rpc endpoint unreachable"), "reason: {reason}");
    assert!(harness.executor.runs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_jobs_are_independent() {
    let harness = TestGateway::start();
    let paid = harness.create_sample_job().await;
    let unpaid = harness.create_sample_job().await;
    assert_ne!(paid, unpaid);

    harness.oracle.pay(&paid);
    harness
        .wait_for_status(&paid, JobStatus::Completed, Duration::from_secs(10))
        .await;
    assert_eq!(
        assert_ok!(harness.gateway.status().get_status(&unpaid).await).status(),
        JobStatus::Pending
    );

    harness
        .wait_for_status(&unpaid, JobStatus::Failed, WINDOW)
        .await;
    assert_eq!(
        assert_ok!(harness.gateway.status().get_status(&paid).await).status(),
        JobStatus::Completed
    );
}

#[tokio::test(start_paused = true)]
async fn test_events_follow_job_lifecycle() {
    let harness = TestGateway::start();
    let mut events = harness.gateway.subscribe_events();

    let secret = harness.create_sample_job().await;
    harness.oracle.pay(&secret);
    harness
        .wait_for_status(&secret, JobStatus::Completed, Duration::from_secs(10))
        .await;

    assert_eq!(
        assert_ok!(events.try_recv()),
        JobEvent::Created {
            secret: secret.clone()
        }
    );
    assert_eq!(
        assert_ok!(events.try_recv()),
        JobEvent::Verified {
            secret: secret.clone()
        }
    );
    assert_eq!(
        assert_ok!(events.try_recv()),
        JobEvent::Completed {
            secret,
            bytes: TEST_CSV.len()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_reads_see_the_same_state() {
    let harness = TestGateway::start();
    harness.executor.hold();
    let secret = harness.create_sample_job().await;
    harness.oracle.pay(&secret);
    harness
        .wait_for_status(&secret, JobStatus::Verified, Duration::from_secs(10))
        .await;

    let mut readers = JoinSet::new();
    for _ in 0..16 {
        let status = harness.gateway.status().clone();
        let secret = secret.clone();
        readers.spawn(async move { status.get_status(&secret).await });
    }
    while let Some(joined) = readers.join_next().await {
        let view = assert_ok!(assert_ok!(joined));
        assert_eq!(view, JobView::Verified);
    }

    harness.executor.release();
    harness
        .wait_for_status(&secret, JobStatus::Completed, Duration::from_secs(10))
        .await;
}

#[tokio::test]
async fn test_shutdown_cancels_outstanding_jobs() {
    let harness = Arc::new(TestGateway::start());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = {
        let harness = Arc::clone(&harness);
        tokio::spawn(async move { harness.gateway.serve(listener).await })
    };

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/requests"))
        .json(&json!({
            "domain": "node.example.com",
            "date": "2024-06-01",
            "payorAddress": "pokt1payor",
        }))
        .send()
        .await
        .expect("request sent");
    assert!(response.status().is_success());
    let body: Value = response.json().await.expect("json body");
    let secret = psq_gateway::Secret::from(body["secret"].as_str().expect("secret string"));

    harness.gateway.shutdown();
    assert_ok!(server.await.expect("server task"));

    let view = assert_ok!(harness.gateway.status().get_status(&secret).await);
    assert_eq!(
        view,
        JobView::Failed {
            reason: "Payment watch cancelled: service shutting down".to_string()
        }
    );
    assert_eq!(harness.gateway.supervisor().active(), 0);

    let err = harness
        .gateway
        .requests()
        .create_job("node.example.com", "2024-06-01", "pokt1payor")
        .await
        .expect_err("closed for new jobs");
    assert!(matches!(err, Error::ShuttingDown));
}
