//! Report queries through the BigQuery command-line tool.

use crate::config::ReportConfig;
use crate::error::{Error, Result};
use crate::jobs::ReportRequest;
use crate::report::{QueryExecutor, Report};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Longest stderr excerpt carried into a failure reason.
const STDERR_EXCERPT_CHARS: usize = 500;

/// Runs the relay quality query with `bq query`.
///
/// Domain and day are bound as named query parameters, so request input never
/// becomes part of the SQL text.
#[derive(Debug, Clone)]
pub struct BigQueryExecutor {
    binary: PathBuf,
    relay_table: String,
    timeout: Duration,
}

impl BigQueryExecutor {
    /// Create an executor from the report configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the relay table is not a plain
    /// `project.dataset.table` (or `dataset.table`) identifier.
    pub fn new(config: &ReportConfig) -> Result<Self> {
        validate_table(&config.relay_table)?;
        Ok(Self {
            binary: config.bq_binary.clone(),
            relay_table: config.relay_table.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    /// SQL text of the report query.
    #[must_use]
    pub fn sql(&self) -> String {
        format!(
            r#"SELECT
  r.pokt_node_domain AS domain,
  r.date AS day,
  r.chain_id,
  COUNT(*) AS relays,
  COUNTIF(r.is_error AND r.error_type IS NOT NULL AND r.error_type <> "user") AS err_cnt,
  1 - COUNTIF(r.is_error AND r.error_type IS NOT NULL AND r.error_type <> "user") / COUNT(*) AS success_rate,
  AVG(r.relay_roundtrip_time) AS avg_total_latency,
  APPROX_QUANTILES(r.relay_roundtrip_time, 100)[OFFSET(95)] AS p95_latency,
  APPROX_QUANTILES(r.relay_roundtrip_time, 100)[OFFSET(99)] AS p99_latency
FROM `{}` r
WHERE CAST(r.date AS STRING) = @day
  AND r.pokt_node_domain = @domain
GROUP BY r.pokt_node_domain, r.date, r.chain_id
ORDER BY r.date, r.chain_id"#,
            self.relay_table
        )
    }

    /// Arguments passed to the `bq` binary for `request`.
    #[must_use]
    pub fn command_args(&self, request: &ReportRequest) -> Vec<String> {
        vec![
            "query".to_string(),
            "--use_legacy_sql=false".to_string(),
            "--format=csv".to_string(),
            format!("--parameter=domain:STRING:{}", request.domain()),
            format!("--parameter=day:STRING:{}", request.date().format("%Y-%m-%d")),
            self.sql(),
        ]
    }
}

#[async_trait]
impl QueryExecutor for BigQueryExecutor {
    async fn run_report(&self, request: &ReportRequest) -> Result<Report> {
        info!(
            "Running relay report for {} on {}",
            request.domain(),
            request.date()
        );

        let child = Command::new(&self.binary)
            .args(self.command_args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Executor(format!("failed to start {}: {e}", self.binary.display()))
            })?;

        // Dropping the child on timeout kills the process.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                Error::Executor(format!(
                    "query timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| Error::Executor(format!("failed to read query output: {e}")))?;

        if !output.status.success() {
            let detail = if output.stderr.is_empty() {
                excerpt(&output.stdout)
            } else {
                excerpt(&output.stderr)
            };
            return Err(Error::Executor(format!(
                "bq exited with {}: {detail}",
                output.status
            )));
        }

        debug!("bq returned {} bytes", output.stdout.len());
        Report::from_csv(output.stdout)
    }
}

fn validate_table(table: &str) -> Result<()> {
    let parts: Vec<&str> = table.split('.').collect();
    let well_formed = (2..=3).contains(&parts.len())
        && parts.iter().all(|part| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
        });

    if well_formed {
        Ok(())
    } else {
        Err(Error::Config(format!("invalid relay table name: {table}")))
    }
}

fn excerpt(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    if text.chars().count() <= STDERR_EXCERPT_CHARS {
        text.to_string()
    } else {
        let cut: String = text.chars().take(STDERR_EXCERPT_CHARS).collect();
        format!("{cut}…")
    }
}
