//! Error types for CrewClause.
//!
//! [`CrewError`] is the crate-wide error. Upstream model failures are carried
//! as a typed [`ProviderError`] so the retry executor can classify them
//! without string matching.

use std::time::Duration;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, CrewError>;

/// Typed failure from the upstream chat-completion API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The request never produced an HTTP response (connect, DNS, TLS, timeout).
    #[error("network error: {0}")]
    Network(String),

    /// HTTP 429. `retry_after` is the server hint, when one was sent.
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// HTTP 5xx.
    #[error("upstream server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Any other non-success status (4xx except 429).
    #[error("upstream rejected request ({status}): {message}")]
    Client { status: u16, message: String },

    /// A 2xx response whose body could not be used.
    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// HTTP status of the failed response, if there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RateLimited { .. } => Some(429),
            Self::Server { status, .. } | Self::Client { status, .. } => Some(*status),
            Self::Network(_) | Self::InvalidResponse(_) => None,
        }
    }

    /// `true` when the request failed below the HTTP layer.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Server-provided retry hint for rate-limited responses.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Classify a non-success HTTP response from the upstream API.
///
/// `retry_after` is the parsed `Retry-After` header, only meaningful for 429.
pub fn parse_provider_error(status: u16, body: &str, retry_after: Option<Duration>) -> ProviderError {
    let message = body.trim().to_string();
    match status {
        429 => ProviderError::RateLimited {
            message,
            retry_after,
        },
        500..=599 => ProviderError::Server { status, message },
        _ => ProviderError::Client { status, message },
    }
}

/// Errors surfaced by the CrewClause library.
#[derive(Debug, Error)]
pub enum CrewError {
    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The incoming question was rejected before any work was done.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// The upstream call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Every allowed attempt failed with a retryable error.
    #[error("Upstream unavailable after {attempts} attempt(s): {last}")]
    RetryExhausted {
        attempts: u32,
        /// Error from the final attempt; earlier ones are discarded.
        last: Box<CrewError>,
    },

    /// The caller gave up before the operation finished.
    #[error("Operation cancelled")]
    Cancelled,

    /// The cache backing store failed while reading.
    #[error("Cache lookup failed: {0}")]
    CacheLookup(String),

    /// The cache backing store failed while writing.
    #[error("Cache store failed: {0}")]
    CacheStore(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CrewError {
    /// The upstream error behind this one, looking through `RetryExhausted`.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            Self::Provider(e) => Some(e),
            Self::RetryExhausted { last, .. } => last.provider_error(),
            _ => None,
        }
    }
}
