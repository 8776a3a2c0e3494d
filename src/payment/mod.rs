//! Payment confirmation.
//!
//! The job watcher only asks one question of the chain: has a transfer that
//! pays for this job arrived yet? [`PaymentOracle`] is that question.
//! [`PocketPaymentOracle`] answers it from a Pocket node's REST API.
//!
//! A payment qualifies when it:
//! - succeeded on chain,
//! - moves at least `min_amount` of `denom` from the payor to the payee,
//! - carries the job secret as its memo,
//! - was included no earlier than the job was created.

mod pocket;

pub use pocket::PocketPaymentOracle;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// What a qualifying payment must look like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentQuery {
    /// Receiving account.
    pub payee: String,
    /// Sending account.
    pub payor: String,
    /// Minimum amount in `denom`.
    pub min_amount: u64,
    /// Denomination.
    pub denom: String,
    /// Expected memo (the job secret).
    pub memo: String,
    /// Earliest acceptable inclusion time.
    pub since: DateTime<Utc>,
}

/// Answers whether a qualifying payment exists.
///
/// Calls may be slow and may fail; the watcher treats every error as
/// transient and simply polls again.
#[async_trait]
pub trait PaymentOracle: Send + Sync {
    /// Check for a payment matching `query`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Oracle`] if the chain could not be queried.
    async fn has_qualifying_payment(&self, query: &PaymentQuery) -> Result<bool>;
}
