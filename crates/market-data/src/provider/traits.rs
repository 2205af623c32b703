//! The upstream source seam.

use async_trait::async_trait;

use crate::errors::MarketDataError;
use crate::models::{Candle, OrderBook, Quote, Symbol, TimeRange, Timeframe};

use super::capabilities::{ProviderCapabilities, RateLimit};

/// One upstream market data source.
///
/// Implement this to add an exchange or aggregator. Implementations must
/// not retry: retries, rate limiting, caching and fallback belong to the
/// engine. They must be safe to call concurrently for different symbols.
///
/// Errors must be classified through [`MarketDataError`] so that
/// [`MarketDataError::retry_class`] gives the right answer
/// (timeouts, 5xx and 429 are transient; unknown symbols and unsupported
/// timeframes are permanent; rejected credentials are auth failures).
///
/// # Example
///
/// ```ignore
/// use async_trait::async_trait;
/// use masterdata_market_data::provider::{MarketDataProvider, ProviderCapabilities, RateLimit};
///
/// struct MyProvider;
///
/// #[async_trait]
/// impl MarketDataProvider for MyProvider {
///     fn id(&self) -> &'static str {
///         "MY_PROVIDER"
///     }
///
///     fn capabilities(&self) -> ProviderCapabilities {
///         ProviderCapabilities {
///             timeframes: &Timeframe::ALL,
///             supports_quotes: true,
///             supports_order_book: false,
///         }
///     }
///
///     fn rate_limit(&self) -> RateLimit {
///         RateLimit::default()
///     }
///
///     // ... implement fetch_candles / fetch_quote
/// }
/// ```
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Unique identifier for this provider ("HYPERLIQUID", "COINBASE", ...).
    ///
    /// Used for logging, cache keys, health tracking and rate gates.
    fn id(&self) -> &'static str;

    /// Position among secondaries; lower is tried first.
    ///
    /// The primary is chosen explicitly and ignores this.
    fn priority(&self) -> u8 {
        10
    }

    /// Timeframes and operations served natively.
    fn capabilities(&self) -> ProviderCapabilities;

    /// Declared request budget. Engine config can only tighten it.
    fn rate_limit(&self) -> RateLimit;

    /// Largest number of candles a single request may return.
    ///
    /// The engine splits historical ranges into pages of this size.
    fn max_candles_per_request(&self) -> usize {
        500
    }

    /// Fetch candles whose open time falls in `range`.
    ///
    /// Candles should be returned in ascending open time; the engine still
    /// normalizes, filters and deduplicates them.
    async fn fetch_candles(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        range: TimeRange,
    ) -> Result<Vec<Candle>, MarketDataError>;

    /// Fetch the latest quote for a symbol.
    async fn fetch_quote(&self, symbol: &Symbol) -> Result<Quote, MarketDataError>;

    /// Fetch an L2 order book snapshot.
    ///
    /// Default implementation returns `NotSupported`.
    async fn fetch_order_book(&self, symbol: &Symbol) -> Result<OrderBook, MarketDataError> {
        let _ = symbol;
        Err(MarketDataError::NotSupported {
            operation: "order_book".to_string(),
            provider: self.id().to_string(),
        })
    }
}
