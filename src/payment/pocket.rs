//! Payment oracle backed by the Cosmos SDK tx search endpoint of a Pocket node.

use crate::config::ChainConfig;
use crate::error::{Error, Result};
use crate::payment::{PaymentOracle, PaymentQuery};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

/// Message type of a plain bank transfer.
const MSG_SEND: &str = "/cosmos.bank.v1beta1.MsgSend";

/// Most recent transactions inspected per poll.
const SEARCH_LIMIT: u32 = 100;

/// Reads transfers from `{api_url}/cosmos/tx/v1beta1/txs`.
#[derive(Debug, Clone)]
pub struct PocketPaymentOracle {
    client: reqwest::Client,
    api_url: String,
    chain_id: &'static str,
}

impl PocketPaymentOracle {
    /// Create an oracle for the configured chain.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the HTTP client cannot be built.
    pub fn new(config: &ChainConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("psq-gateway/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_url: config.api_url().trim_end_matches('/').to_string(),
            chain_id: config.env.chain_id(),
        })
    }

    /// Chain this oracle reads from.
    #[must_use]
    pub fn chain_id(&self) -> &'static str {
        self.chain_id
    }

    fn search_url(&self) -> String {
        format!("{}/cosmos/tx/v1beta1/txs", self.api_url)
    }
}

#[async_trait]
impl PaymentOracle for PocketPaymentOracle {
    async fn has_qualifying_payment(&self, query: &PaymentQuery) -> Result<bool> {
        let events = format!(
            "transfer.recipient='{}' AND transfer.sender='{}'",
            query.payee, query.payor
        );
        let limit = SEARCH_LIMIT.to_string();

        let response = self
            .client
            .get(self.search_url())
            .query(&[
                ("query", events.as_str()),
                ("order_by", "ORDER_BY_DESC"),
                ("limit", limit.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Oracle(format!("tx search on {} failed: {e}", self.chain_id)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Oracle(format!(
                "tx search on {} returned {status}",
                self.chain_id
            )));
        }

        let body: TxSearchResponse = response
            .json()
            .await
            .map_err(|e| Error::Oracle(format!("malformed tx search response: {e}")))?;

        debug!(
            "Inspecting {} transfers from {} on {}",
            body.tx_responses.len(),
            query.payor,
            self.chain_id
        );

        Ok(body.tx_responses.iter().any(|tx| qualifies(tx, query)))
    }
}

#[derive(Debug, Deserialize)]
struct TxSearchResponse {
    #[serde(default)]
    tx_responses: Vec<TxResponse>,
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    txhash: String,
    #[serde(default)]
    code: u32,
    #[serde(default)]
    timestamp: String,
    tx: Option<Tx>,
}

#[derive(Debug, Deserialize)]
struct Tx {
    body: TxBody,
}

#[derive(Debug, Deserialize)]
struct TxBody {
    // Kept raw: only bank sends are decoded, other message types vary in shape.
    #[serde(default)]
    messages: Vec<serde_json::Value>,
    #[serde(default)]
    memo: String,
}

#[derive(Debug, Deserialize)]
struct MsgSend {
    #[serde(default)]
    from_address: String,
    #[serde(default)]
    to_address: String,
    #[serde(default)]
    amount: Vec<Coin>,
}

#[derive(Debug, Deserialize)]
struct Coin {
    denom: String,
    amount: String,
}

fn qualifies(tx: &TxResponse, query: &PaymentQuery) -> bool {
    if tx.code != 0 {
        return false;
    }
    let Some(body) = tx.tx.as_ref().map(|t| &t.body) else {
        return false;
    };
    if body.memo.trim() != query.memo {
        return false;
    }

    let Ok(included) = DateTime::parse_from_rfc3339(&tx.timestamp) else {
        debug!("Skipping tx {} with unparseable timestamp", tx.txhash);
        return false;
    };
    if included.with_timezone(&Utc) < query.since {
        return false;
    }

    let min = u128::from(query.min_amount);
    body.messages
        .iter()
        .filter(|msg| msg.get("@type").and_then(serde_json::Value::as_str) == Some(MSG_SEND))
        .filter_map(|msg| MsgSend::deserialize(msg).ok())
        .any(|msg| {
            msg.from_address == query.payor
                && msg.to_address == query.payee
                && msg
                    .amount
                    .iter()
                    .filter(|coin| coin.denom == query.denom)
                    .filter_map(|coin| coin.amount.parse::<u128>().ok())
                    .any(|amount| amount >= min)
        })
}
