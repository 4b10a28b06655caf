//! Harness errors. Request outcomes are never errors; they are classified
//! and aggregated (see [`crate::classifier`]).

use thiserror::Error;

pub type BenchResult<T> = Result<T, BenchError>;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("Invalid duration literal {0}")]
    InvalidDuration(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid base URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Failed to read plan file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse plan: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to write CSV report: {0}")]
    Csv(#[from] csv::Error),
}

/// Failure of a single HTTP exchange, before any status code was received.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("connection refused or host unreachable")]
    Connect,

    #[error("timeout")]
    Timeout,

    #[error("connection closed unexpectedly")]
    Closed,

    #[error("network error: {0}")]
    Other(String),
}
