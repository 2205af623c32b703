//! Hyperliquid market data provider.
//!
//! Everything goes through a single `POST /info` endpoint whose body selects
//! the request type:
//! - `candleSnapshot` for OHLCV history (up to 5000 candles per request)
//! - `metaAndAssetCtxs` for mark prices, previous-day prices, volume,
//!   funding and open interest
//! - `l2Book` for order book snapshots
//!
//! The public info endpoint needs no credentials.

mod models;

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, warn};
use reqwest::Client;
use rust_decimal::Decimal;

use crate::errors::MarketDataError;
use crate::models::{BookLevel, Candle, OrderBook, Quote, Symbol, TimeRange, Timeframe};
use crate::provider::{MarketDataProvider, ProviderCapabilities, RateLimit};

use models::{CandleSnapshotReq, HlAssetCtx, HlBook, HlCandle, HlLevel, HlMeta, InfoRequest};

pub const PROVIDER_ID: &str = "HYPERLIQUID";

pub const MAINNET_URL: &str = "https://api.hyperliquid.xyz";
pub const TESTNET_URL: &str = "https://api.hyperliquid-testnet.xyz";

const MAX_CANDLES_PER_REQUEST: usize = 5000;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Hyperliquid provider (perpetuals, priced in USD).
pub struct HyperliquidProvider {
    client: Client,
    base_url: String,
}

impl HyperliquidProvider {
    /// Mainnet provider with the default request timeout.
    pub fn new() -> Self {
        Self::with_base_url(MAINNET_URL, DEFAULT_TIMEOUT)
    }

    /// Testnet provider with the default request timeout.
    pub fn testnet() -> Self {
        Self::with_base_url(TESTNET_URL, DEFAULT_TIMEOUT)
    }

    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Send one info request about `symbol` and return the raw body.
    async fn info(
        &self,
        symbol: &Symbol,
        request: &InfoRequest<'_>,
    ) -> Result<String, MarketDataError> {
        let url = format!("{}/info", self.base_url);
        debug!("Hyperliquid request: {:?}", request);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| MarketDataError::from_transport(PROVIDER_ID, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| MarketDataError::from_transport(PROVIDER_ID, e))?;

        if let Some(err) =
            MarketDataError::from_status(PROVIDER_ID, symbol.as_str(), status, &body)
        {
            warn!("Hyperliquid returned HTTP {}: {}", status, truncate(&body));
            return Err(err);
        }

        Ok(body)
    }
}

impl Default for HyperliquidProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataProvider for HyperliquidProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn priority(&self) -> u8 {
        1
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            timeframes: &Timeframe::ALL,
            supports_quotes: true,
            supports_order_book: true,
        }
    }

    fn rate_limit(&self) -> RateLimit {
        // 1200 weight per minute per IP; a candle snapshot costs about 20.
        RateLimit {
            requests_per_minute: 60,
            max_concurrency: 4,
            min_delay: Duration::from_millis(50),
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
        // endTime is inclusive upstream.
        let request = InfoRequest::CandleSnapshot {
            req: CandleSnapshotReq {
                coin: symbol.as_str(),
                interval: timeframe.as_str(),
                start_time: range.start_ms,
                end_time: range.end_ms - 1,
            },
        };

        let body = self.info(symbol, &request).await?;
        let candles = parse_candles(&body, symbol, timeframe)?;

        if let Some(last) = candles.last() {
            let now_ms = Utc::now().timestamp_millis();
            if last.open_time > now_ms {
                warn!(
                    "Hyperliquid candle for {} opens {}ms in the future, upstream clock skew",
                    symbol,
                    last.open_time - now_ms
                );
            }
        }

        debug!(
            "Hyperliquid returned {} {} candles for {}",
            candles.len(),
            timeframe,
            symbol
        );
        Ok(candles)
    }

    async fn fetch_quote(&self, symbol: &Symbol) -> Result<Quote, MarketDataError> {
        let body = self.info(symbol, &InfoRequest::MetaAndAssetCtxs).await?;
        parse_quote(&body, symbol, Utc::now())
    }

    async fn fetch_order_book(&self, symbol: &Symbol) -> Result<OrderBook, MarketDataError> {
        let body = self
            .info(
                symbol,
                &InfoRequest::L2Book {
                    coin: symbol.as_str(),
                },
            )
            .await?;
        parse_order_book(&body, symbol)
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

fn decimal(field: &str, raw: &str) -> Result<Decimal, MarketDataError> {
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .map_err(|_| malformed(format!("invalid {} value '{}'", field, raw)))
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(200) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

/// Parse a `candleSnapshot` response. A `null` body means no data.
pub(crate) fn parse_candles(
    body: &str,
    symbol: &Symbol,
    timeframe: Timeframe,
) -> Result<Vec<Candle>, MarketDataError> {
    let rows: Option<Vec<HlCandle>> =
        serde_json::from_str(body).map_err(|e| malformed(e.to_string()))?;

    rows.unwrap_or_default()
        .into_iter()
        .map(|row| {
            Ok(Candle::new(
                symbol.clone(),
                timeframe,
                row.t,
                decimal("open", &row.o)?,
                decimal("high", &row.h)?,
                decimal("low", &row.l)?,
                decimal("close", &row.c)?,
                decimal("volume", &row.v)?,
            ))
        })
        .collect()
}

/// Parse a `metaAndAssetCtxs` response and pick out `symbol`.
pub(crate) fn parse_quote(
    body: &str,
    symbol: &Symbol,
    now: DateTime<Utc>,
) -> Result<Quote, MarketDataError> {
    let (meta, ctxs): (HlMeta, Vec<HlAssetCtx>) =
        serde_json::from_str(body).map_err(|e| malformed(e.to_string()))?;

    let index = meta
        .universe
        .iter()
        .position(|asset| asset.name.eq_ignore_ascii_case(symbol.as_str()))
        .ok_or_else(|| MarketDataError::SymbolNotFound(symbol.to_string()))?;

    let ctx = ctxs
        .get(index)
        .ok_or_else(|| malformed(format!("no asset context for {}", symbol)))?;

    let price_raw = ctx
        .mark_px
        .as_deref()
        .or(ctx.mid_px.as_deref())
        .ok_or_else(|| malformed(format!("no price for {}", symbol)))?;

    let mut quote = Quote::new(
        symbol.clone(),
        decimal("markPx", price_raw)?,
        now,
        PROVIDER_ID.to_string(),
    );

    if let Some(prev) = ctx.prev_day_px.as_deref() {
        quote = quote.with_reference_price(decimal("prevDayPx", prev)?);
    }
    if let Some(volume) = ctx.day_ntl_vlm.as_deref() {
        quote = quote.with_volume(decimal("dayNtlVlm", volume)?);
    }
    if let Some(funding) = ctx.funding.as_deref() {
        quote = quote.with_funding_rate(decimal("funding", funding)?);
    }
    if let Some(oi) = ctx.open_interest.as_deref() {
        quote = quote.with_open_interest(decimal("openInterest", oi)?);
    }

    Ok(quote)
}

/// Parse an `l2Book` response. A `null` body means the coin is unknown.
pub(crate) fn parse_order_book(body: &str, symbol: &Symbol) -> Result<OrderBook, MarketDataError> {
    let book: Option<HlBook> = serde_json::from_str(body).map_err(|e| malformed(e.to_string()))?;
    let book = book.ok_or_else(|| MarketDataError::SymbolNotFound(symbol.to_string()))?;

    let mut sides = book.levels.into_iter();
    let bids = levels(sides.next().unwrap_or_default())?;
    let asks = levels(sides.next().unwrap_or_default())?;

    let timestamp = Utc
        .timestamp_millis_opt(book.time)
        .single()
        .ok_or_else(|| malformed(format!("invalid book time {}", book.time)))?;

    let mut book = OrderBook {
        symbol: symbol.clone(),
        bids,
        asks,
        timestamp,
        source: PROVIDER_ID.to_string(),
    };
    book.sort_levels();
    Ok(book)
}

fn levels(raw: Vec<HlLevel>) -> Result<Vec<BookLevel>, MarketDataError> {
    raw.into_iter()
        .map(|level| {
            Ok(BookLevel {
                price: decimal("px", &level.px)?,
                size: decimal("sz", &level.sz)?,
                orders: Some(level.n),
            })
        })
        .collect()
}
