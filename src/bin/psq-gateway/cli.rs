//! Command-line interface definition.

use clap::{Parser, ValueEnum};
use psq_gateway::config::{ChainEnv, GatewayConfig};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Payment-gated relay quality reports for Pocket Network node operators.
#[derive(Parser, Debug)]
#[command(name = "psq-gateway")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file.
    #[arg(long, short, env = "PSQ_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address the HTTP API listens on.
    #[arg(long, short, env = "PSQ_LISTEN_ADDR")]
    pub listen: Option<SocketAddr>,

    /// Pocket network to verify payments on.
    #[arg(long, value_enum, ignore_case = true, env = "CHAIN_ENV")]
    pub chain_env: Option<CliChainEnv>,

    /// Override the chain REST endpoint.
    #[arg(long, env = "PSQ_API_URL")]
    pub api_url: Option<String>,

    /// Account that receives report payments.
    #[arg(long, env = "PSQ_PAYEE")]
    pub payee: Option<String>,

    /// Report price in the payment denomination.
    #[arg(long, env = "PSQ_MIN_AMOUNT")]
    pub min_amount: Option<u64>,

    /// Seconds between payment checks.
    #[arg(long, env = "PSQ_POLL_INTERVAL")]
    pub poll_interval: Option<u64>,

    /// Seconds a job waits for its payment.
    #[arg(long, env = "PSQ_PAYMENT_TIMEOUT")]
    pub payment_timeout: Option<u64>,

    /// Path to the `bq` binary.
    #[arg(long, env = "PSQ_BQ_BINARY")]
    pub bq_binary: Option<PathBuf>,

    /// Fully qualified relay table the report reads.
    #[arg(long, env = "PSQ_RELAY_TABLE")]
    pub relay_table: Option<String>,

    /// Maximum number of pending or verified jobs.
    #[arg(long, env = "PSQ_MAX_OUTSTANDING")]
    pub max_outstanding: Option<usize>,

    /// Log level.
    #[arg(long, env = "RUST_LOG")]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "PSQ_JSON_LOGS")]
    pub json_logs: bool,
}

/// Chain environment CLI enum.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliChainEnv {
    /// Shannon mainnet.
    #[value(alias = "mainnet")]
    Main,
    /// Shannon beta testnet.
    #[value(alias = "testnet")]
    Beta,
}

impl Cli {
    /// Convert CLI arguments into a `GatewayConfig`.
    ///
    /// The config file (explicit, or the platform default if present) is
    /// loaded first; flags and environment variables override it.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file is specified but cannot be loaded.
    pub fn into_config(self) -> color_eyre::Result<GatewayConfig> {
        let path = self.config.clone().or_else(GatewayConfig::default_path);
        let mut config = match path {
            Some(ref path) => GatewayConfig::from_file(path)?,
            None => GatewayConfig::default(),
        };

        if let Some(listen) = self.listen {
            config.server.listen_addr = listen;
        }
        if let Some(env) = self.chain_env {
            config.chain.env = env.into();
        }
        if let Some(api_url) = self.api_url {
            config.chain.api_url = Some(api_url);
        }
        if let Some(payee) = self.payee {
            config.payment.payee = payee;
        }
        if let Some(min_amount) = self.min_amount {
            config.payment.min_amount = min_amount;
        }
        if let Some(secs) = self.poll_interval {
            config.payment.poll_interval_secs = secs;
        }
        if let Some(secs) = self.payment_timeout {
            config.payment.timeout_secs = secs;
        }
        if let Some(bq_binary) = self.bq_binary {
            config.report.bq_binary = bq_binary;
        }
        if let Some(relay_table) = self.relay_table {
            config.report.relay_table = relay_table;
        }
        if let Some(max_outstanding) = self.max_outstanding {
            config.jobs.max_outstanding = max_outstanding;
        }
        if let Some(log_level) = self.log_level {
            config.log_level = log_level;
        }

        Ok(config)
    }
}

impl From<CliChainEnv> for ChainEnv {
    fn from(env: CliChainEnv) -> Self {
        match env {
            CliChainEnv::Main => ChainEnv::Main,
            CliChainEnv::Beta => ChainEnv::Beta,
        }
    }
}
