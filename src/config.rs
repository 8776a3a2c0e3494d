//! Configuration for psq-gateway.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Account that receives report payments.
pub const DEFAULT_PAYEE: &str = "pokt1lf0kekv9zcv9v3wy4v6jx2wh7v4665s8e0sl9s";

/// Price of one report in the smallest denomination.
pub const DEFAULT_MIN_AMOUNT: u64 = 20_000_000;

/// Denomination payments are counted in.
pub const DEFAULT_DENOM: &str = "upokt";

/// Pocket network environment the payment oracle targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainEnv {
    /// Shannon mainnet.
    #[default]
    Main,
    /// Shannon beta testnet.
    Beta,
}

impl ChainEnv {
    /// Chain id used when talking to this network.
    #[must_use]
    pub const fn chain_id(self) -> &'static str {
        match self {
            Self::Main => "pocket",
            Self::Beta => "pocket-beta",
        }
    }

    /// CometBFT RPC endpoint of the public Grove gateway.
    #[must_use]
    pub const fn rpc_url(self) -> &'static str {
        match self {
            Self::Main => "https://shannon-grove-rpc.mainnet.poktroll.com",
            Self::Beta => "https://shannon-testnet-grove-rpc.beta.poktroll.com",
        }
    }

    /// Cosmos SDK REST endpoint of the public Grove gateway.
    #[must_use]
    pub const fn api_url(self) -> &'static str {
        match self {
            Self::Main => "https://shannon-grove-api.mainnet.poktroll.com",
            Self::Beta => "https://shannon-testnet-grove-api.beta.poktroll.com",
        }
    }
}

impl std::str::FromStr for ChainEnv {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "main" | "mainnet" => Ok(Self::Main),
            "beta" | "testnet" => Ok(Self::Beta),
            other => Err(crate::Error::Config(format!("unknown chain env: {other}"))),
        }
    }
}

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Chain the payment oracle reads from.
    #[serde(default)]
    pub chain: ChainConfig,

    /// Payment terms and polling behaviour.
    #[serde(default)]
    pub payment: PaymentConfig,

    /// Report execution configuration.
    #[serde(default)]
    pub report: ReportConfig,

    /// Job registry limits and retention.
    #[serde(default)]
    pub jobs: JobsConfig,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP API binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

/// Chain configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Which Pocket network to watch.
    #[serde(default)]
    pub env: ChainEnv,

    /// Override for the REST endpoint (defaults to the environment's).
    #[serde(default)]
    pub api_url: Option<String>,

    /// Per-request timeout for oracle HTTP calls, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Payment terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfig {
    /// Account that must receive the payment.
    #[serde(default = "default_payee")]
    pub payee: String,

    /// Minimum amount, in `denom`.
    #[serde(default = "default_min_amount")]
    pub min_amount: u64,

    /// Denomination of `min_amount`.
    #[serde(default = "default_denom")]
    pub denom: String,

    /// Delay between two oracle polls, in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Total poll window, in seconds.
    #[serde(default = "default_payment_timeout")]
    pub timeout_secs: u64,
}

/// Report execution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Path or name of the `bq` executable.
    #[serde(default = "default_bq_binary")]
    pub bq_binary: PathBuf,

    /// Fully qualified relay table (`project.dataset.table`).
    #[serde(default = "default_relay_table")]
    pub relay_table: String,

    /// Upper bound on a single report query, in seconds.
    #[serde(default = "default_query_timeout")]
    pub timeout_secs: u64,
}

/// Job registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Maximum number of jobs that may be pending or verified at once.
    #[serde(default = "default_max_outstanding")]
    pub max_outstanding: usize,

    /// How long terminal jobs stay readable, in seconds.
    #[serde(default = "default_retention")]
    pub retention_secs: u64,

    /// How often the retention sweeper runs, in seconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Random bytes per secret.
    #[serde(default = "default_secret_bytes")]
    pub secret_bytes: usize,

    /// How long shutdown waits for watchers to wind down, in seconds.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            chain: ChainConfig::default(),
            payment: PaymentConfig::default(),
            report: ReportConfig::default(),
            jobs: JobsConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            env: ChainEnv::default(),
            api_url: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            payee: default_payee(),
            min_amount: DEFAULT_MIN_AMOUNT,
            denom: default_denom(),
            poll_interval_secs: default_poll_interval(),
            timeout_secs: default_payment_timeout(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            bq_binary: default_bq_binary(),
            relay_table: default_relay_table(),
            timeout_secs: default_query_timeout(),
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_outstanding: default_max_outstanding(),
            retention_secs: default_retention(),
            sweep_interval_secs: default_sweep_interval(),
            secret_bytes: default_secret_bytes(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_payee() -> String {
    DEFAULT_PAYEE.to_string()
}

const fn default_min_amount() -> u64 {
    DEFAULT_MIN_AMOUNT
}

fn default_denom() -> String {
    DEFAULT_DENOM.to_string()
}

fn default_bq_binary() -> PathBuf {
    PathBuf::from("bq")
}

fn default_relay_table() -> String {
    "portal-prd-gke-all.RELAYS.D2".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_request_timeout() -> u64 {
    30
}

const fn default_poll_interval() -> u64 {
    5
}

const fn default_payment_timeout() -> u64 {
    150
}

const fn default_query_timeout() -> u64 {
    300
}

const fn default_max_outstanding() -> usize {
    1_000
}

const fn default_retention() -> u64 {
    3600 // 1 hour
}

const fn default_sweep_interval() -> u64 {
    60
}

const fn default_secret_bytes() -> usize {
    16
}

const fn default_shutdown_grace() -> u64 {
    10
}

impl ChainConfig {
    /// REST endpoint the oracle queries.
    #[must_use]
    pub fn api_url(&self) -> &str {
        self.api_url.as_deref().unwrap_or_else(|| self.env.api_url())
    }

    /// Per-request oracle timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl PaymentConfig {
    /// Delay between polls.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Total poll window.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Instruction shown to clients after a request is accepted.
    #[must_use]
    pub fn instructions(&self) -> String {
        format!(
            "Payment required. Send {}{} to {} with this secret as the memo.",
            self.min_amount, self.denom, self.payee
        )
    }
}

impl JobsConfig {
    /// Retention window for terminal jobs.
    #[must_use]
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    /// Retention sweep period.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Shutdown grace period.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl GatewayConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &Path) -> crate::Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Platform default location of the config file, if one exists.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "psq-gateway")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .filter(|path| path.is_file())
    }

    /// Check the values that would make the pipeline misbehave.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] describing the first bad value.
    pub fn validate(&self) -> crate::Result<()> {
        let fail = |msg: &str| Err(crate::Error::Config(msg.to_string()));

        if self.payment.payee.trim().is_empty() {
            return fail("payment.payee must not be empty");
        }
        if self.payment.poll_interval_secs == 0 {
            return fail("payment.poll_interval_secs must be positive");
        }
        if self.payment.timeout_secs < self.payment.poll_interval_secs {
            return fail("payment.timeout_secs must be at least one poll interval");
        }
        if self.report.timeout_secs == 0 {
            return fail("report.timeout_secs must be positive");
        }
        if self.jobs.max_outstanding == 0 {
            return fail("jobs.max_outstanding must be positive");
        }
        if self.jobs.secret_bytes < crate::jobs::MIN_SECRET_BYTES {
            return Err(crate::Error::Config(format!(
                "jobs.secret_bytes must be at least {}",
                crate::jobs::MIN_SECRET_BYTES
            )));
        }
        if self.jobs.sweep_interval_secs == 0 {
            return fail("jobs.sweep_interval_secs must be positive");
        }
        Ok(())
    }
}
