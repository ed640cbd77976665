//! Error types for the market data client library.
//!
//! Two layers of errors exist:
//!
//! - [`MarketDataError`] is produced by the transport (the REST client talking to
//!   CoinMarketCap or CoinGecko).
//! - [`CoordinatorError`] is produced by the [`RequestCoordinator`](crate::coordinator::RequestCoordinator),
//!   which wraps transport failures and adds its own admission-control outcomes.
//!
//! Retry eligibility never inspects messages: every transport error maps to a
//! [`FailureKind`], and the coordinator decides from that alone.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::coordinator::{RequestKey, Upstream};

/// The main error type for all transport operations.
#[derive(Error, Debug)]
pub enum MarketDataError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// HTTP request with middleware failed
    #[error("HTTP request failed: {0}")]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error
    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    /// The upstream API returned an error status object
    #[error("API error: {0}")]
    Api(ApiError),

    /// Upstream quota exhausted (HTTP 429 or a quota error code)
    #[error("Rate limit exceeded, retry after {retry_after_ms:?}ms")]
    RateLimitExceeded {
        /// Suggested wait time in milliseconds before retrying
        retry_after_ms: Option<u64>,
    },

    /// Invalid or unexpected response from the API
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Request timeout
    #[error("Request timed out")]
    Timeout,

    /// Missing API key for an endpoint that requires one
    #[error("Missing credentials: an API key is required for this endpoint")]
    MissingCredentials,
}

/// Retry classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Upstream quota rejection. Retried on the long backoff schedule and
    /// escalates the cooldown controller.
    RateLimit,
    /// Invalid/unexpected response or timeout. Retried on the normal schedule.
    Transient,
    /// Not retried.
    Fatal,
}

impl MarketDataError {
    /// Classify this error for the retry engine.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            MarketDataError::RateLimitExceeded { .. } => FailureKind::RateLimit,
            MarketDataError::Api(api) if api.is_rate_limit() => FailureKind::RateLimit,
            MarketDataError::InvalidResponse(_) | MarketDataError::Timeout => {
                FailureKind::Transient
            }
            MarketDataError::Http(e) if e.is_timeout() => FailureKind::Transient,
            _ => FailureKind::Fatal,
        }
    }

    /// Upstream-suggested wait before retrying, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            MarketDataError::RateLimitExceeded {
                retry_after_ms: Some(ms),
            } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }
}

/// Error status object returned by an upstream API.
///
/// CoinMarketCap reports errors as `{"status": {"error_code": 1008, "error_message": "..."}}`;
/// CoinGecko uses the same shape for its quota errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// Numeric error code (e.g. `1008`)
    pub code: i64,
    /// Human-readable error message
    pub message: String,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl ApiError {
    /// Create a new API error from code and message.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Check if this is a rate limit or quota error.
    pub fn is_rate_limit(&self) -> bool {
        matches!(
            self.code,
            error_codes::HTTP_TOO_MANY_REQUESTS
                | error_codes::MINUTE_RATE_LIMIT
                | error_codes::DAILY_RATE_LIMIT
                | error_codes::MONTHLY_RATE_LIMIT
                | error_codes::IP_RATE_LIMIT
        )
    }

    /// Check if this is an invalid or missing key error.
    pub fn is_invalid_key(&self) -> bool {
        matches!(
            self.code,
            error_codes::INVALID_API_KEY | error_codes::MISSING_API_KEY
        )
    }
}

/// Known upstream error codes for pattern matching.
pub mod error_codes {
    /// HTTP status reused as an error code by CoinGecko
    pub const HTTP_TOO_MANY_REQUESTS: i64 = 429;

    /// Key errors
    pub const INVALID_API_KEY: i64 = 1001;
    pub const MISSING_API_KEY: i64 = 1002;

    /// Quota errors
    pub const MINUTE_RATE_LIMIT: i64 = 1008;
    pub const DAILY_RATE_LIMIT: i64 = 1009;
    pub const MONTHLY_RATE_LIMIT: i64 = 1010;
    pub const IP_RATE_LIMIT: i64 = 1011;
}

/// Errors returned by the request coordinator.
///
/// Cloneable so that one outcome can be delivered to every caller attached to
/// the same in-flight request.
#[derive(Error, Debug, Clone)]
pub enum CoordinatorError {
    /// The same key was re-issued before its priority's minimum interval elapsed.
    #[error("request {key} throttled, retry after {retry_after:?}")]
    Throttled {
        /// The throttled request key
        key: RequestKey,
        /// Time left until the key may be issued again
        retry_after: Duration,
    },

    /// The protected upstream's window or cooldown rejected the call before dispatch.
    #[error("{upstream} rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// The upstream that rejected the call
        upstream: Upstream,
        /// Time left until the window or cooldown clears, when known
        retry_after: Option<Duration>,
    },

    /// An attached caller expected a different result type than the one the
    /// shared in-flight request produced.
    #[error("in-flight result for {key} has an unexpected type")]
    CastingError {
        /// The key whose shared result failed to downcast
        key: RequestKey,
    },

    /// The coordinator was reset while the request was pending.
    #[error("request cancelled")]
    Cancelled,

    /// The upstream call failed.
    #[error(transparent)]
    Upstream(Arc<MarketDataError>),
}

impl From<MarketDataError> for CoordinatorError {
    fn from(err: MarketDataError) -> Self {
        CoordinatorError::Upstream(Arc::new(err))
    }
}

impl CoordinatorError {
    /// Classify this error for the retry engine.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            CoordinatorError::RateLimited { .. } => FailureKind::RateLimit,
            CoordinatorError::Upstream(err) => err.failure_kind(),
            CoordinatorError::Throttled { .. }
            | CoordinatorError::CastingError { .. }
            | CoordinatorError::Cancelled => FailureKind::Fatal,
        }
    }

    /// How long a caller should wait before trying again, for "retry in N seconds"
    /// feedback. `None` when the error carries no hint.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CoordinatorError::Throttled { retry_after, .. } => Some(*retry_after),
            CoordinatorError::RateLimited { retry_after, .. } => *retry_after,
            CoordinatorError::Upstream(err) => err.retry_after(),
            _ => None,
        }
    }

    /// Whether this is a transient "try again shortly" condition rather than a hard error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoordinatorError::Throttled { .. } | CoordinatorError::RateLimited { .. }
        )
    }
}
