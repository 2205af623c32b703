//! Coinbase Exchange market data provider.
//!
//! Uses the public (unauthenticated) Exchange REST API:
//! - `/products/{BASE}-USD/candles` for OHLCV history, 300 rows per request
//! - `/products/{BASE}-USD/stats` for the last price and 24h open/volume
//! - `/products/{BASE}-USD/book?level=2` for order book snapshots
//!
//! Serves as the secondary/reference source. There is no 4h granularity.

mod models;

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use log::{debug, warn};
use reqwest::Client;
use rust_decimal::Decimal;

use crate::errors::MarketDataError;
use crate::models::{BookLevel, Candle, OrderBook, Quote, Symbol, TimeRange, Timeframe};
use crate::provider::{MarketDataProvider, ProviderCapabilities, RateLimit};

use models::{CbBook, CbCandleRow, CbError, CbStats};

pub const PROVIDER_ID: &str = "COINBASE";

pub const BASE_URL: &str = "https://api.exchange.coinbase.com";
const USER_AGENT: &str = concat!("masterdata-collector/", env!("CARGO_PKG_VERSION"));

const MAX_CANDLES_PER_REQUEST: usize = 300;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const SUPPORTED_TIMEFRAMES: &[Timeframe] = &[
    Timeframe::M1,
    Timeframe::M5,
    Timeframe::M15,
    Timeframe::H1,
    Timeframe::D1,
];

/// Native granularity in seconds.
fn granularity(timeframe: Timeframe) -> Option<u32> {
    match timeframe {
        Timeframe::M1 => Some(60),
        Timeframe::M5 => Some(300),
        Timeframe::M15 => Some(900),
        Timeframe::H1 => Some(3600),
        Timeframe::H4 => None,
        Timeframe::D1 => Some(86400),
    }
}

/// `BTC` -> `BTC-USD`
fn product_id(symbol: &Symbol) -> String {
    format!("{}-USD", symbol.as_str())
}

pub struct CoinbaseProvider {
    client: Client,
    base_url: String,
}

impl CoinbaseProvider {
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL, DEFAULT_TIMEOUT)
    }

    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// GET a product endpoint and return the raw body.
    async fn fetch(
        &self,
        symbol: &Symbol,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<String, MarketDataError> {
        let url = format!("{}/products/{}/{}", self.base_url, product_id(symbol), endpoint);
        debug!("Coinbase request: {} with {} params", url, params.len());

        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| MarketDataError::from_transport(PROVIDER_ID, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| MarketDataError::from_transport(PROVIDER_ID, e))?;

        match MarketDataError::from_status(PROVIDER_ID, symbol.as_str(), status, &body) {
            None => Ok(body),
            Some(err) => {
                let message = serde_json::from_str::<CbError>(&body)
                    .ok()
                    .and_then(|e| e.message)
                    .unwrap_or_default();
                warn!("Coinbase returned HTTP {} for {}: {}", status, url, message);
                Err(err)
            }
        }
    }
}

impl Default for CoinbaseProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataProvider for CoinbaseProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn priority(&self) -> u8 {
        2
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            timeframes: SUPPORTED_TIMEFRAMES,
            supports_quotes: true,
            supports_order_book: true,
        }
    }

    fn rate_limit(&self) -> RateLimit {
        // Public endpoints allow 10 requests per second per IP.
        RateLimit {
            requests_per_minute: 300,
            max_concurrency: 5,
            min_delay: Duration::from_millis(100),
        }
    }

    fn max_candles_per_request(&self) -> usize {
        MAX_CANDLES_PER_REQUEST
    }

    async fn fetch_candles(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        range: TimeRange,
    ) -> Result<Vec<Candle>, MarketDataError> {
        let granularity =
            granularity(timeframe).ok_or_else(|| MarketDataError::UnsupportedTimeframe {
                provider: PROVIDER_ID.to_string(),
                timeframe: timeframe.to_string(),
            })?;

        // Both bounds are inclusive upstream.
        let params = [
            ("granularity", granularity.to_string()),
            ("start", iso(range.start_ms)?),
            ("end", iso(range.end_ms - 1000)?),
        ];

        let body = self.fetch(symbol, "candles", &params).await?;
        let candles = parse_candles(&body, symbol, timeframe)?;

        debug!(
            "Coinbase returned {} {} candles for {}",
            candles.len(),
            timeframe,
            symbol
        );
        Ok(candles)
    }

    async fn fetch_quote(&self, symbol: &Symbol) -> Result<Quote, MarketDataError> {
        let body = self.fetch(symbol, "stats", &[]).await?;
        parse_quote(&body, symbol, Utc::now())
    }

    async fn fetch_order_book(&self, symbol: &Symbol) -> Result<OrderBook, MarketDataError> {
        let body = self
            .fetch(symbol, "book", &[("level", "2".to_string())])
            .await?;
        parse_order_book(&body, symbol, Utc::now())
    }
}

// ============================================================================
// Response parsing
// ============================================================================

fn malformed(message: impl Into<String>) -> MarketDataError {
    MarketDataError::MalformedResponse {
        provider: PROVIDER_ID.to_string(),
        message: message.into(),
    }
}

fn iso(ms: i64) -> Result<String, MarketDataError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .ok_or_else(|| malformed(format!("timestamp out of range: {}", ms)))
}

fn from_f64(field: &str, value: f64) -> Result<Decimal, MarketDataError> {
    Decimal::try_from(value).map_err(|_| malformed(format!("invalid {} value {}", field, value)))
}

fn from_str(field: &str, raw: &str) -> Result<Decimal, MarketDataError> {
    Decimal::from_str(raw).map_err(|_| malformed(format!("invalid {} value '{}'", field, raw)))
}

/// Parse a `/candles` response into ascending candles.
pub(crate) fn parse_candles(
    body: &str,
    symbol: &Symbol,
    timeframe: Timeframe,
) -> Result<Vec<Candle>, MarketDataError> {
    let rows: Vec<CbCandleRow> = serde_json::from_str(body).map_err(|e| malformed(e.to_string()))?;

    let mut candles = rows
        .into_iter()
        .map(|(time, low, high, open, close, volume)| {
            Ok(Candle::new(
                symbol.clone(),
                timeframe,
                time * 1000,
                from_f64("open", open)?,
                from_f64("high", high)?,
                from_f64("low", low)?,
                from_f64("close", close)?,
                from_f64("volume", volume)?,
            ))
        })
        .collect::<Result<Vec<_>, MarketDataError>>()?;

    candles.sort_by_key(|c| c.open_time);
    Ok(candles)
}

/// Parse a `/stats` response.
pub(crate) fn parse_quote(
    body: &str,
    symbol: &Symbol,
    now: DateTime<Utc>,
) -> Result<Quote, MarketDataError> {
    let stats: CbStats = serde_json::from_str(body).map_err(|e| malformed(e.to_string()))?;

    let last = stats
        .last
        .as_deref()
        .ok_or_else(|| malformed(format!("no last price for {}", symbol)))?;

    let mut quote = Quote::new(
        symbol.clone(),
        from_str("last", last)?,
        now,
        PROVIDER_ID.to_string(),
    );

    if let Some(open) = stats.open.as_deref() {
        quote = quote.with_reference_price(from_str("open", open)?);
    }
    if let Some(volume) = stats.volume.as_deref() {
        quote = quote.with_volume(from_str("volume", volume)?);
    }

    Ok(quote)
}

/// Parse a level 2 `/book` response.
pub(crate) fn parse_order_book(
    body: &str,
    symbol: &Symbol,
    now: DateTime<Utc>,
) -> Result<OrderBook, MarketDataError> {
    let book: CbBook = serde_json::from_str(body).map_err(|e| malformed(e.to_string()))?;

    let levels = |rows: Vec<(String, String, u32)>| -> Result<Vec<BookLevel>, MarketDataError> {
        rows.into_iter()
            .map(|(price, size, orders)| {
                Ok(BookLevel {
                    price: from_str("price", &price)?,
                    size: from_str("size", &size)?,
                    orders: Some(orders),
                })
            })
            .collect()
    };

    let mut out = OrderBook {
        symbol: symbol.clone(),
        bids: levels(book.bids)?,
        asks: levels(book.asks)?,
        timestamp: book.time.unwrap_or(now),
        source: PROVIDER_ID.to_string(),
    };
    out.sort_levels();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RetryClass;
    use rust_decimal_macros::dec;

    fn btc() -> Symbol {
        Symbol::parse("BTC").unwrap()
    }

    #[test]
    fn test_granularity_table() {
        assert_eq!(granularity(Timeframe::M1), Some(60));
        assert_eq!(granularity(Timeframe::H1), Some(3600));
        assert_eq!(granularity(Timeframe::D1), Some(86400));
        assert_eq!(granularity(Timeframe::H4), None);

        for tf in Timeframe::ALL {
            let caps = CoinbaseProvider::new().capabilities();
            assert_eq!(caps.supports_timeframe(tf), granularity(tf).is_some());
        }
    }

    #[test]
    fn test_product_id() {
        assert_eq!(product_id(&Symbol::parse("eth/usd").unwrap()), "ETH-USD");
    }

    #[test]
    fn test_iso_formatting() {
        assert_eq!(iso(1_700_000_000_000).unwrap(), "2023-11-14T22:13:20Z");
    }

    #[test]
    fn test_parse_candles_sorts_ascending() {
        let body = r#"[
            [1700003600, 36500.0, 36650.0, 36620.5, 36580.0, 98.25],
            [1700000000, 36450.0, 36700.0, 36500.0, 36620.5, 123.5]
        ]"#;

        let candles = parse_candles(body, &btc(), Timeframe::H1).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].open_time, 1_700_000_000_000);
        assert_eq!(candles[0].low, dec!(36450));
        assert_eq!(candles[0].high, dec!(36700));
        assert_eq!(candles[0].open, dec!(36500));
        assert_eq!(candles[0].close, dec!(36620.5));
        assert_eq!(candles[0].volume, dec!(123.5));
        assert_eq!(candles[1].open_time, 1_700_003_600_000);
    }

    #[test]
    fn test_parse_candles_error_object_is_malformed() {
        let err = parse_candles(r#"{"message":"oops"}"#, &btc(), Timeframe::H1).unwrap_err();
        assert_eq!(err.retry_class(), RetryClass::Transient);
    }

    #[test]
    fn test_parse_quote() {
        let body = r#"{"open":"36000.00","high":"36800.00","low":"35900.00","last":"36720.00","volume":"10234.5","volume_30day":"300000"}"#;
        let now = Utc::now();
        let quote = parse_quote(body, &btc(), now).unwrap();
        assert_eq!(quote.price, dec!(36720.00));
        assert_eq!(quote.change_pct, Some(dec!(2.0000)));
        assert_eq!(quote.volume, Some(dec!(10234.5)));
        assert_eq!(quote.source, PROVIDER_ID);
    }

    #[test]
    fn test_parse_quote_missing_last() {
        let err = parse_quote(r#"{"open":"1"}"#, &btc(), Utc::now()).unwrap_err();
        assert!(matches!(err, MarketDataError::MalformedResponse { .. }));
    }

    #[test]
    fn test_parse_order_book() {
        let body = r#"{
            "bids":[["36610.00","1.5",3],["36611.00","0.2",1]],
            "asks":[["36613.00","0.4",2],["36612.00","0.7",2]],
            "sequence":123456,
            "time":"2023-11-14T22:13:20.123Z"
        }"#;

        let book = parse_order_book(body, &btc(), Utc::now()).unwrap();
        assert_eq!(book.best_bid().unwrap().price, dec!(36611.00));
        assert_eq!(book.best_ask().unwrap().price, dec!(36612.00));
        assert_eq!(book.mid_price(), Some(dec!(36611.5)));
        assert_eq!(book.timestamp.timestamp_millis(), 1_700_000_000_123);
    }
}
