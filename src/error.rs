//! Error types for psq-gateway.

use crate::jobs::JobStatus;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the gateway.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O failure (config files, child processes, sockets).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed request input. Never reaches the job pipeline.
    #[error("{message}")]
    Validation {
        /// Name of the offending request field.
        field: &'static str,
        /// Human readable description of the problem.
        message: String,
    },

    /// No job exists for the given secret.
    #[error("Query not found")]
    NotFound,

    /// Admission limit reached.
    #[error("Too many outstanding report requests, try again later")]
    Capacity,

    /// The gateway is shutting down and no longer starts watchers.
    #[error("Service is shutting down")]
    ShuttingDown,

    /// A single payment oracle call failed. Transient from the watcher's view.
    #[error("Payment oracle error: {0}")]
    Oracle(String),

    /// Report generation failed.
    #[error("Report generation failed: {0}")]
    Executor(String),

    /// A state transition that the job state machine does not allow.
    #[error("Invalid job transition from {from} to {to}")]
    InvalidTransition {
        /// Status the job was in.
        from: JobStatus,
        /// Status that was requested.
        to: JobStatus,
    },

    /// A job with this secret already exists.
    #[error("Secret already issued")]
    DuplicateSecret,

    /// Job store failure.
    #[error("Job store error: {0}")]
    Store(String),

    /// Anything else. Details are logged, never returned to clients.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a field-level validation error.
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }
}
