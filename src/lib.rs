//! # psq-gateway
//!
//! Payment-gated relay quality (PSQ) reports for Pocket Network node operators.
//!
//! A client asks for the report of one node domain on one day and receives a
//! one-time secret. It then sends the quoted amount on chain with the secret
//! as memo. A background watcher polls the chain until the payment shows up
//! (or the window closes), runs the report query, and keeps the CSV ready for
//! the client to collect with the same secret.
//!
//! ## Architecture
//!
//! ```text
//! POST /requests ──► RequestService ──► JobStore ◄── StatusService ◄── GET /requests/:secret/status
//!                          │                ▲
//!                          ▼                │
//!                  WatcherSupervisor ──► JobWatcher ──► PaymentOracle
//!                                               └────► QueryExecutor
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use psq_gateway::{GatewayBuilder, GatewayConfig};
//!
//! # async fn run() -> psq_gateway::Result<()> {
//! let gateway = GatewayBuilder::new(GatewayConfig::default()).build()?;
//! gateway.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod event;
pub mod gateway;
pub mod jobs;
pub mod payment;
pub mod report;
pub mod service;

pub use config::{ChainEnv, GatewayConfig};
pub use error::{Error, Result};
pub use event::{JobEvent, JobEventsChannel};
pub use gateway::{Gateway, GatewayBuilder};
pub use jobs::{FailureReason, Job, JobState, JobStatus, JobStore, JobView, MemoryJobStore, Secret};
pub use payment::{PaymentOracle, PaymentQuery, PocketPaymentOracle};
pub use report::{BigQueryExecutor, QueryExecutor, Report};
pub use service::{RequestService, StatusService};
