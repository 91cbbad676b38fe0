//! Centralized error types for the Zeno controller

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Controller error types
#[derive(Debug, Error)]
pub enum ZenoError {
    /// Configuration loading or validation failed — fatal at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP request or response error (network, timeout)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Upstream returned an unexpected status code
    #[error("Unexpected status code: {0}")]
    UpstreamStatus(u16),

    /// Upstream rate limit hit; carries the absolute reset time and the
    /// relative wait derived from response headers
    #[error("Rate limited, retry after {retry_after:?} (reset at {reset_at})")]
    RateLimited {
        reset_at: DateTime<Utc>,
        retry_after: Duration,
    },

    /// Response body did not match the expected schema — never retried
    #[error("Malformed upstream response: {0}")]
    MalformedResponse(String),

    /// Provider operation failed
    #[error("Provider error: {0}")]
    Provider(String),

    /// Runner lookup failed
    #[error("Runner not found: {0}")]
    RunnerNotFound(String),

    /// Leader lease acquisition or bookkeeping failed
    #[error("Lease error: {0}")]
    Lease(String),

    /// The caller's cancellation token fired before the operation finished
    #[error("Operation cancelled")]
    Cancelled,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl ZenoError {
    /// Whether the queue client should retry after this error.
    ///
    /// Network errors, 5xx responses, and rate limits are transient;
    /// malformed response schemas are terminal.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::RateLimited { .. } => true,
            Self::UpstreamStatus(code) => *code >= 500,
            _ => false,
        }
    }

    /// Short stable label used for error metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Http(_) => "network",
            Self::UpstreamStatus(_) => "upstream_status",
            Self::RateLimited { .. } => "rate_limited",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Provider(_) => "provider",
            Self::RunnerNotFound(_) => "not_found",
            Self::Lease(_) => "lease",
            Self::Cancelled => "cancelled",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Other(_) => "other",
        }
    }
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, ZenoError>;
