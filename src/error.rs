//! Error taxonomy for the aggregation pipeline.
//!
//! Most upstream failures never reach the caller: the fetcher absorbs them and
//! the call simply contributes no articles. Only the variants for which
//! [`NewsError::is_request_fatal`] returns `true` propagate to the top of a
//! request.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Errors produced while serving a news request.
#[derive(Debug, Error)]
pub enum NewsError {
    /// A required setting (the provider API key) is absent.
    #[error("missing required configuration: {0}")]
    MissingConfig(&'static str),

    /// The provider rejected the call because of quota or plan limits.
    #[error("upstream rejected request with status {status}: {message}")]
    QuotaExceeded { status: u16, message: String },

    /// Network error, 5xx, or a body that could not be decoded.
    #[error("upstream call failed: {0}")]
    Upstream(String),

    /// The outbound call did not finish within its deadline.
    #[error("upstream call timed out after {0} ms")]
    Timeout(u128),

    /// The publisher table could not be loaded or parsed.
    #[error("invalid publisher table: {0}")]
    PublisherTable(String),

    /// A batch request file could not be parsed.
    #[error("invalid batch file: {0}")]
    Batch(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl NewsError {
    /// Whether this error aborts the whole request instead of being absorbed
    /// as an empty result.
    pub fn is_request_fatal(&self) -> bool {
        matches!(
            self,
            NewsError::MissingConfig(_) | NewsError::QuotaExceeded { .. }
        )
    }

    /// Whether a single retry is allowed for this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NewsError::Upstream(_) | NewsError::Timeout(_))
    }

    /// Short machine-readable name used in error reports.
    pub fn kind(&self) -> &'static str {
        match self {
            NewsError::MissingConfig(_) => "configuration_error",
            NewsError::QuotaExceeded { .. } => "quota_exceeded",
            NewsError::Upstream(_) => "upstream_error",
            NewsError::Timeout(_) => "upstream_timeout",
            NewsError::PublisherTable(_) => "publisher_table_error",
            NewsError::Batch(_) => "batch_file_error",
            NewsError::Io(_) => "io_error",
            NewsError::Internal(_) => "internal_error",
        }
    }
}

/// Timeouts are mapped by the HTTP client, which knows its deadline.
impl From<reqwest::Error> for NewsError {
    fn from(e: reqwest::Error) -> Self {
        // The request URL carries the API key as a query parameter.
        NewsError::Upstream(e.without_url().to_string())
    }
}

impl From<serde_yaml::Error> for NewsError {
    fn from(e: serde_yaml::Error) -> Self {
        NewsError::PublisherTable(e.to_string())
    }
}

/// Error body rendered at the outermost boundary.
#[derive(Debug, Serialize)]
pub struct ErrorReport {
    pub error: bool,
    pub kind: &'static str,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorReport {
    pub fn new(err: &NewsError) -> Self {
        Self {
            error: true,
            kind: err.kind(),
            message: err.to_string(),
            timestamp: Utc::now(),
        }
    }
}
