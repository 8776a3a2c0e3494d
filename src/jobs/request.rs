//! Validated report request parameters.

use crate::error::{Error, Result};
use chrono::NaiveDate;

/// Parameters of a report request, validated at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRequest {
    domain: String,
    date: NaiveDate,
    payor_address: String,
}

impl ReportRequest {
    /// Validate raw request fields.
    ///
    /// `domain` and `payor_address` are trimmed and must not be empty;
    /// `date` must be a real calendar date written as `YYYY-MM-DD`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] naming the first offending field.
    pub fn new(domain: &str, date: &str, payor_address: &str) -> Result<Self> {
        let domain = domain.trim();
        if domain.is_empty() {
            return Err(Error::validation("domain", "domain must not be empty"));
        }

        let payor_address = payor_address.trim();
        if payor_address.is_empty() {
            return Err(Error::validation(
                "payorAddress",
                "payorAddress must not be empty",
            ));
        }

        let date = parse_report_date(date)?;

        Ok(Self {
            domain: domain.to_string(),
            date,
            payor_address: payor_address.to_string(),
        })
    }

    /// Node domain the report is about.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Day the report covers.
    #[must_use]
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Account expected to send the payment.
    #[must_use]
    pub fn payor_address(&self) -> &str {
        &self.payor_address
    }
}

/// Parse a strict `YYYY-MM-DD` date.
///
/// chrono alone accepts unpadded fields and signed years, so the shape is
/// checked byte by byte first.
///
/// # Errors
///
/// Returns [`Error::Validation`] for the `date` field.
pub fn parse_report_date(value: &str) -> Result<NaiveDate> {
    let invalid = || Error::validation("date", "Invalid date format. Use YYYY-MM-DD");

    let bytes = value.as_bytes();
    let shaped = bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        });
    if !shaped {
        return Err(invalid());
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
        Error::validation("date", format!("{value} is not a valid calendar date"))
    })
}
