//! Relay quality reports.
//!
//! The report itself is an opaque CSV payload. Producing it is delegated to a
//! [`QueryExecutor`], which the job watcher calls once a payment is verified.

mod bigquery;

pub use bigquery::BigQueryExecutor;

use crate::error::{Error, Result};
use crate::jobs::ReportRequest;
use async_trait::async_trait;
use bytes::Bytes;

/// A finished report: non-empty CSV bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    csv: Bytes,
}

impl Report {
    /// Wrap CSV output.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Executor`] if the output is empty or whitespace only.
    pub fn from_csv(csv: impl Into<Bytes>) -> Result<Self> {
        let csv = csv.into();
        if csv.iter().all(u8::is_ascii_whitespace) {
            return Err(Error::Executor("query returned no output".to_string()));
        }
        Ok(Self { csv })
    }

    /// Raw CSV bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.csv
    }

    /// Cheap clone of the payload, for response bodies.
    #[must_use]
    pub fn bytes(&self) -> Bytes {
        self.csv.clone()
    }

    /// Payload size.
    #[must_use]
    pub fn len(&self) -> usize {
        self.csv.len()
    }

    /// Check if the payload is empty. Never true for a constructed report.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.csv.is_empty()
    }
}

/// Runs the report query for a verified request.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Produce the report for `request`'s domain and date.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Executor`] when the query cannot be run or fails.
    async fn run_report(&self, request: &ReportRequest) -> Result<Report>;
}
