//! Error types and retry classification for the market data engine.
//!
//! This module provides:
//! - [`MarketDataError`]: The main error enum for all market data operations
//! - [`RetryClass`]: Classification for determining retry behavior

mod retry;

pub use retry::RetryClass;

use thiserror::Error;

/// Errors that can occur during market data operations.
///
/// Each variant is classified into a [`RetryClass`] via the [`retry_class`](Self::retry_class)
/// method, which determines how the retry controller handles the error.
///
/// The enum is `Clone` because a single upstream outcome is shared by every
/// requester coalesced onto the same in-flight fetch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarketDataError {
    /// The requested symbol was not found by the provider.
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// The symbol could not be normalized (empty or malformed).
    #[error("Invalid symbol: {0:?}")]
    InvalidSymbol(String),

    /// The provider has no native granularity for the requested timeframe.
    #[error("Unsupported timeframe {timeframe} for provider {provider}")]
    UnsupportedTimeframe {
        provider: String,
        timeframe: String,
    },

    /// The symbol exists but the provider has no candles in the requested range.
    #[error("No data for range")]
    NoDataForRange,

    /// The provider rejected the request itself (HTTP 400 and other 4xx).
    #[error("Bad request to {provider}: {message}")]
    BadRequest { provider: String, message: String },

    /// The provider does not implement the requested operation.
    #[error("Operation {operation} not supported by {provider}")]
    NotSupported { operation: String, provider: String },

    /// The provider rate limited the request (HTTP 429).
    #[error("Rate limited: {provider}")]
    RateLimited { provider: String },

    /// The request to the provider timed out.
    #[error("Timeout: {provider}")]
    Timeout { provider: String },

    /// The provider answered with a 5xx status.
    #[error("Server error from {provider}: HTTP {status}")]
    ServerError { provider: String, status: u16 },

    /// The request never reached the provider or the connection dropped.
    #[error("Network error from {provider}: {message}")]
    Network { provider: String, message: String },

    /// The provider answered but the body could not be decoded.
    #[error("Malformed response from {provider}: {message}")]
    MalformedResponse { provider: String, message: String },

    /// The payload decoded but failed record sanity checks.
    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    /// The provider rejected our credentials (HTTP 401/403).
    #[error("Authentication failed for {provider}")]
    AuthFailure { provider: String },

    /// The rate gate could not hand out a slot before its timeout.
    #[error("Rate gate busy for {provider}")]
    Busy { provider: String },

    /// A batch deadline expired before this item completed.
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// No provider is configured or eligible for the request.
    #[error("No providers available")]
    NoProvidersAvailable,

    /// Every eligible provider was tried and every attempt failed transiently.
    #[error("All providers failed ({providers}): {last_error}")]
    AllProvidersFailed {
        providers: String,
        last_error: String,
    },
}

impl MarketDataError {
    /// Returns the retry classification for this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use masterdata_market_data::errors::{MarketDataError, RetryClass};
    ///
    /// let error = MarketDataError::RateLimited { provider: "HYPERLIQUID".to_string() };
    /// assert_eq!(error.retry_class(), RetryClass::Transient);
    ///
    /// let error = MarketDataError::SymbolNotFound("INVALID".to_string());
    /// assert_eq!(error.retry_class(), RetryClass::Permanent);
    /// ```
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::RateLimited { .. }
            | Self::Timeout { .. }
            | Self::ServerError { .. }
            | Self::Network { .. }
            | Self::MalformedResponse { .. }
            | Self::ValidationFailed { .. }
            | Self::AllProvidersFailed { .. } => RetryClass::Transient,

            Self::Busy { .. } => RetryClass::Busy,

            Self::AuthFailure { .. } => RetryClass::AuthFailure,

            Self::SymbolNotFound(_)
            | Self::InvalidSymbol(_)
            | Self::BadRequest { .. }
            | Self::UnsupportedTimeframe { .. }
            | Self::NoDataForRange
            | Self::NotSupported { .. }
            | Self::DeadlineExceeded
            | Self::NoProvidersAvailable => RetryClass::Permanent,
        }
    }

    /// Permanent for this provider only: the next provider in a chain may
    /// still be able to serve the request.
    pub fn allows_fallback(&self) -> bool {
        matches!(
            self,
            Self::NoDataForRange | Self::UnsupportedTimeframe { .. } | Self::NotSupported { .. }
        )
    }

    /// Whether this is the placeholder used for batch items cut off by a deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::DeadlineExceeded | Self::Timeout { .. })
    }

    /// Translate an HTTP status returned by `provider` into an error.
    ///
    /// `subject` is the symbol the request was about; a 404 reports it
    /// rather than the response body. Returns `None` for success statuses.
    pub fn from_status(
        provider: &str,
        subject: &str,
        status: reqwest::StatusCode,
        body: &str,
    ) -> Option<Self> {
        if status.is_success() {
            return None;
        }

        let provider = provider.to_string();
        let err = match status.as_u16() {
            429 => Self::RateLimited { provider },
            401 | 403 => Self::AuthFailure { provider },
            404 => Self::SymbolNotFound(subject.to_string()),
            408 => Self::Timeout { provider },
            code if code >= 500 => Self::ServerError {
                provider,
                status: code,
            },
            code => Self::BadRequest {
                provider,
                message: format!("HTTP {}: {}", code, body.trim()),
            },
        };
        Some(err)
    }

    /// Translate a transport-level `reqwest` failure for `provider`.
    pub fn from_transport(provider: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                provider: provider.to_string(),
            }
        } else if err.is_decode() {
            Self::MalformedResponse {
                provider: provider.to_string(),
                message: err.to_string(),
            }
        } else {
            Self::Network {
                provider: provider.to_string(),
                message: err.to_string(),
            }
        }
    }
}
