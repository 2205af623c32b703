//! Market data engine.
//!
//! The engine is the entry point for callers. It owns the provider chain and
//! the shared request plumbing (rate gates, provider health, caches, retry
//! controller and cross-source validator), and exposes:
//!
//! - Historical candles for one symbol, optionally cross-validated
//! - Current price with preference order across providers
//! - Order book snapshots
//! - Batch variants that fan out over a bounded worker pool under a deadline
//! - Persistence of fetched series into a [`RecordSink`]

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use tokio::time::Instant;

use crate::config::{ConfigError, EngineConfig};
use crate::errors::MarketDataError;
use crate::models::{
    merge_pages, BatchResult, Candle, EpochMillis, FetchResult, OrderBook, ProviderId, Quote,
    Symbol, TimeRange, Timeframe, Validated, Validation,
};
use crate::provider::MarketDataProvider;
use crate::registry::{
    CacheKey, CacheLayer, CrossSourceValidator, HealthSnapshot, ProviderCall, ProviderHealth,
    RateGate, RecordSanity, RetryController,
};
use crate::sink::{RecordSet, RecordSink, SinkError, SinkKey};

fn now_ms() -> EpochMillis {
    Utc::now().timestamp_millis()
}

/// Builder for [`MarketDataEngine`].
#[derive(Default)]
pub struct EngineBuilder {
    primary: Option<Arc<dyn MarketDataProvider>>,
    secondaries: Vec<Arc<dyn MarketDataProvider>>,
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn primary(mut self, provider: Arc<dyn MarketDataProvider>) -> Self {
        self.primary = Some(provider);
        self
    }

    /// Add a fallback provider. Fallbacks are ordered by their priority.
    pub fn secondary(mut self, provider: Arc<dyn MarketDataProvider>) -> Self {
        self.secondaries.push(provider);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<MarketDataEngine, ConfigError> {
        self.config.validate()?;

        let primary = self
            .primary
            .ok_or_else(|| ConfigError::Invalid("a primary provider is required".to_string()))?;

        let mut secondaries = self.secondaries;
        secondaries.sort_by_key(|p| p.priority());

        let mut providers = Vec::with_capacity(secondaries.len() + 1);
        providers.push(primary);
        for provider in secondaries {
            if providers.iter().any(|p| p.id() == provider.id()) {
                return Err(ConfigError::Invalid(format!(
                    "provider '{}' registered twice",
                    provider.id()
                )));
            }
            providers.push(provider);
        }

        let config = self.config;
        let gate = Arc::new(RateGate::with_overrides(
            config.rate_limit_per_minute,
            config.max_concurrent_requests,
        ));
        for provider in &providers {
            gate.register(Cow::Borrowed(provider.id()), &provider.rate_limit());
        }

        let health = Arc::new(ProviderHealth::with_config(config.health_config()));
        let controller = RetryController::new(
            config.retry_policy(),
            gate,
            health.clone(),
            Arc::new(RecordSanity::new()),
        );

        info!(
            "Market data engine ready with providers [{}], {} workers",
            providers
                .iter()
                .map(|p| p.id())
                .collect::<Vec<_>>()
                .join(", "),
            config.worker_pool_size
        );

        Ok(MarketDataEngine {
            validator: CrossSourceValidator::new(config.validation_threshold_pct),
            providers,
            config,
            controller,
            health,
            candles: CacheLayer::new(),
            quotes: CacheLayer::new(),
            books: CacheLayer::new(),
        })
    }
}

/// Outcome of [`MarketDataEngine::persist_historical`].
#[derive(Debug)]
pub struct PersistSummary {
    pub results: BatchResult<Validated<Vec<Candle>>>,
    /// Record sets handed to the sink successfully.
    pub written: usize,
    pub sink_errors: Vec<SinkError>,
}

/// Multi-source market data engine.
pub struct MarketDataEngine {
    /// Primary first, then fallbacks by priority.
    providers: Vec<Arc<dyn MarketDataProvider>>,
    config: EngineConfig,
    controller: RetryController,
    health: Arc<ProviderHealth>,
    validator: CrossSourceValidator,
    candles: CacheLayer<Vec<Candle>>,
    quotes: CacheLayer<Quote>,
    books: CacheLayer<OrderBook>,
}

impl MarketDataEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn primary(&self) -> &Arc<dyn MarketDataProvider> {
        &self.providers[0]
    }

    pub fn providers(&self) -> &[Arc<dyn MarketDataProvider>] {
        &self.providers
    }

    pub fn health(&self) -> &ProviderHealth {
        &self.health
    }

    pub fn health_snapshot(&self) -> Vec<HealthSnapshot> {
        self.health.snapshot()
    }

    /// Drop every cached value, including last-known-good entries.
    pub fn clear_caches(&self) {
        self.candles.clear();
        self.quotes.clear();
        self.books.clear();
    }

    /// Providers able to serve a request, primary first.
    fn chain<F>(&self, supports: F) -> Vec<Arc<dyn MarketDataProvider>>
    where
        F: Fn(&dyn MarketDataProvider) -> bool,
    {
        self.providers
            .iter()
            .filter(|p| supports(p.as_ref()))
            .cloned()
            .collect()
    }

    fn is_primary(&self, provider: &dyn MarketDataProvider) -> bool {
        provider.id() == self.providers[0].id()
    }

    // ------------------------------------------------------------------
    // Historical candles
    // ------------------------------------------------------------------

    /// Closed candles covering the last `days` days.
    pub async fn get_historical_data(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        days: u32,
        validate: bool,
    ) -> FetchResult<Validated<Vec<Candle>>> {
        let range = TimeRange::trailing(days, timeframe, now_ms());
        self.get_historical_range(symbol, timeframe, range, validate)
            .await
    }

    /// Candles whose open time falls in `range`, strictly increasing and
    /// free of duplicates.
    ///
    /// With `validate`, the first fallback provider is queried concurrently
    /// and the two series are compared close-by-close.
    pub async fn get_historical_range(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        range: TimeRange,
        validate: bool,
    ) -> FetchResult<Validated<Vec<Candle>>> {
        if range.is_empty() {
            return FetchResult::Failed(MarketDataError::NoDataForRange);
        }

        let chain = self.chain(|p| p.capabilities().supports_timeframe(timeframe));
        if chain.is_empty() {
            return FetchResult::Failed(MarketDataError::UnsupportedTimeframe {
                provider: "ENGINE".to_string(),
                timeframe: timeframe.to_string(),
            });
        }

        if !validate {
            return self
                .fetch_series(&chain, symbol, timeframe, range)
                .await
                .map(Validated::not_requested);
        }

        let Some(reference) = chain.get(1).cloned() else {
            return self
                .fetch_series(&chain, symbol, timeframe, range)
                .await
                .map(|candles| {
                    Validated::new(candles, Validation::unvalidated("no reference provider"))
                });
        };

        let reference_chain = [reference.clone()];
        let reference_id: ProviderId = Cow::Borrowed(reference.id());
        let reference_fetch = async {
            if self.health.is_allowed(&reference_id) {
                Some(
                    self.fetch_series(&reference_chain, symbol, timeframe, range)
                        .await,
                )
            } else {
                None
            }
        };

        let (primary, secondary) = futures::join!(
            self.fetch_series(&chain, symbol, timeframe, range),
            reference_fetch
        );

        let validation = match (&primary, secondary) {
            (FetchResult::Failed(_), _) => Validation::NotRequested,
            (primary, _) if primary.source() == Some(&reference_id) => {
                Validation::unvalidated(format!(
                    "served by reference provider {} after primary failure",
                    reference_id
                ))
            }
            (_, None) => Validation::unvalidated(format!(
                "reference provider {} is unhealthy",
                reference_id
            )),
            (_, Some(FetchResult::Failed(err))) => Validation::unvalidated(format!(
                "reference provider {} failed: {}",
                reference_id, err
            )),
            (primary, Some(secondary)) => match (primary.payload(), secondary.payload()) {
                (Some(p), Some(s)) => self.validator.compare_candles(p, s, timeframe),
                _ => Validation::unvalidated("no reference data"),
            },
        };

        if validation.is_disagreement() {
            warn!(
                "{} {} candles disagree across sources on {} bucket(s)",
                symbol,
                timeframe,
                validation.discrepancies().len()
            );
        }

        primary.map(|candles| Validated::new(candles, validation))
    }

    /// The most recent `limit` closed candles.
    pub async fn get_latest_candles(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        limit: usize,
    ) -> FetchResult<Vec<Candle>> {
        let range = TimeRange::last_candles(limit, timeframe, now_ms());
        self.get_historical_range(symbol, timeframe, range, false)
            .await
            .map(|validated| {
                let mut candles = validated.value;
                if candles.len() > limit {
                    candles.drain(..candles.len() - limit);
                }
                candles
            })
    }

    async fn fetch_series(
        &self,
        chain: &[Arc<dyn MarketDataProvider>],
        symbol: &Symbol,
        timeframe: Timeframe,
        range: TimeRange,
    ) -> FetchResult<Vec<Candle>> {
        let key = CacheKey::candles(
            Cow::Borrowed(chain[0].id()),
            symbol.clone(),
            timeframe,
            range,
        );
        let ttl = if range.is_closed(timeframe, now_ms()) {
            self.config.historical_ttl()
        } else {
            self.config.quote_ttl()
        };

        self.controller
            .fetch(&self.candles, &key, ttl, chain, |call| {
                fetch_paged(call, symbol.clone(), timeframe, range)
            })
            .await
    }

    // ------------------------------------------------------------------
    // Quotes
    // ------------------------------------------------------------------

    /// Latest price, taken from the first provider in preference order that
    /// answers, and compared against the next one that also answered.
    ///
    /// `prefer` moves the named provider to the front; unknown names are
    /// ignored.
    pub async fn get_current_price(
        &self,
        symbol: &Symbol,
        prefer: Option<&str>,
    ) -> FetchResult<Validated<Quote>> {
        let candidates: Vec<Arc<dyn MarketDataProvider>> = self
            .preference_order(prefer)
            .into_iter()
            .filter(|p| p.capabilities().supports_quotes)
            .filter(|p| {
                self.is_primary(p.as_ref()) || self.health.is_allowed(&Cow::Borrowed(p.id()))
            })
            .collect();

        if candidates.is_empty() {
            return FetchResult::Failed(MarketDataError::NoProvidersAvailable);
        }

        let results = futures::future::join_all(
            candidates
                .iter()
                .map(|provider| self.fetch_quote_from(provider, symbol)),
        )
        .await;

        let chosen = results
            .iter()
            .position(FetchResult::is_ok)
            .or_else(|| results.iter().position(FetchResult::is_degraded));

        let Some(index) = chosen else {
            return results
                .into_iter()
                .next()
                .unwrap_or(FetchResult::Failed(MarketDataError::NoProvidersAvailable))
                .map(Validated::not_requested);
        };

        let validation = match results[index].payload() {
            Some(quote) => results
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != index)
                .find_map(|(_, r)| r.payload())
                .map(|other| self.validator.compare_quotes(quote, other))
                .unwrap_or_else(|| Validation::unvalidated("no second source available")),
            None => Validation::NotRequested,
        };

        if validation.is_disagreement() {
            warn!("{} quote disagrees across sources", symbol);
        }

        results
            .into_iter()
            .nth(index)
            .unwrap_or(FetchResult::Failed(MarketDataError::NoProvidersAvailable))
            .map(|quote| Validated::new(quote, validation))
    }

    async fn fetch_quote_from(
        &self,
        provider: &Arc<dyn MarketDataProvider>,
        symbol: &Symbol,
    ) -> FetchResult<Quote> {
        let key = CacheKey::quote(Cow::Borrowed(provider.id()), symbol.clone());
        let chain = [provider.clone()];
        self.controller
            .fetch(&self.quotes, &key, self.config.quote_ttl(), &chain, |call| {
                let symbol = symbol.clone();
                async move {
                    call.request(|p| {
                        let symbol = symbol.clone();
                        async move { p.fetch_quote(&symbol).await }
                    })
                    .await
                }
            })
            .await
    }

    fn preference_order(&self, prefer: Option<&str>) -> Vec<Arc<dyn MarketDataProvider>> {
        let mut ordered = self.providers.clone();
        if let Some(name) = prefer {
            match ordered.iter().position(|p| p.id().eq_ignore_ascii_case(name)) {
                Some(index) => {
                    let preferred = ordered.remove(index);
                    ordered.insert(0, preferred);
                }
                None => warn!("Unknown preferred provider '{}', ignoring", name),
            }
        }
        ordered
    }

    // ------------------------------------------------------------------
    // Order books
    // ------------------------------------------------------------------

    pub async fn get_order_book(&self, symbol: &Symbol) -> FetchResult<OrderBook> {
        let chain = self.chain(|p| p.capabilities().supports_order_book);
        if chain.is_empty() {
            return FetchResult::Failed(MarketDataError::NotSupported {
                operation: "order_book".to_string(),
                provider: "ENGINE".to_string(),
            });
        }

        let key = CacheKey::order_book(Cow::Borrowed(chain[0].id()), symbol.clone());
        self.controller
            .fetch(
                &self.books,
                &key,
                self.config.order_book_ttl(),
                &chain,
                |call| {
                    let symbol = symbol.clone();
                    async move {
                        call.request(|p| {
                            let symbol = symbol.clone();
                            async move { p.fetch_order_book(&symbol).await }
                        })
                        .await
                    }
                },
            )
            .await
    }

    // ------------------------------------------------------------------
    // Batches
    // ------------------------------------------------------------------

    pub async fn get_current_prices(
        &self,
        symbols: &[Symbol],
        prefer: Option<&str>,
    ) -> BatchResult<Validated<Quote>> {
        self.get_current_prices_within(symbols, prefer, self.config.batch_deadline())
            .await
    }

    /// Like [`get_current_prices`](Self::get_current_prices) with an
    /// explicit batch deadline.
    pub async fn get_current_prices_within(
        &self,
        symbols: &[Symbol],
        prefer: Option<&str>,
        deadline: Duration,
    ) -> BatchResult<Validated<Quote>> {
        self.run_batch(symbols, deadline, |symbol| {
            self.get_current_price(symbol, prefer)
        })
        .await
    }

    pub async fn get_historical_batch(
        &self,
        symbols: &[Symbol],
        timeframe: Timeframe,
        days: u32,
        validate: bool,
    ) -> BatchResult<Validated<Vec<Candle>>> {
        self.get_historical_batch_within(
            symbols,
            timeframe,
            days,
            validate,
            self.config.batch_deadline(),
        )
        .await
    }

    pub async fn get_historical_batch_within(
        &self,
        symbols: &[Symbol],
        timeframe: Timeframe,
        days: u32,
        validate: bool,
        deadline: Duration,
    ) -> BatchResult<Validated<Vec<Candle>>> {
        // One range for the whole batch so every symbol covers the same buckets.
        let range = TimeRange::trailing(days, timeframe, now_ms());
        self.run_batch(symbols, deadline, |symbol| {
            self.get_historical_range(symbol, timeframe, range, validate)
        })
        .await
    }

    /// Run `op` for every distinct symbol on at most `worker_pool_size`
    /// concurrent tasks. Symbols without a result at the deadline get a
    /// `DeadlineExceeded` entry; their in-flight work is dropped.
    async fn run_batch<'a, T, F, Fut>(
        &'a self,
        symbols: &'a [Symbol],
        deadline: Duration,
        op: F,
    ) -> BatchResult<T>
    where
        F: Fn(&'a Symbol) -> Fut,
        Fut: Future<Output = FetchResult<T>>,
    {
        self.prune_caches();

        let unique: BTreeSet<&'a Symbol> = symbols.iter().collect();
        let deadline_at = Instant::now() + deadline;
        let started = Instant::now();
        let op = &op;

        let mut pending = stream::iter(unique.iter().copied())
            .map(|symbol| async move { (symbol, op(symbol).await) })
            .buffer_unordered(self.config.worker_pool_size.max(1));

        let mut batch = BatchResult::new();
        loop {
            match tokio::time::timeout_at(deadline_at, pending.next()).await {
                Ok(Some((symbol, result))) => batch.insert(symbol.clone(), result),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "Batch deadline of {:?} reached with {} of {} symbols done",
                        deadline,
                        batch.len(),
                        unique.len()
                    );
                    break;
                }
            }
        }
        drop(pending);

        for symbol in unique {
            if batch.get(symbol).is_none() {
                batch.insert(
                    symbol.clone(),
                    FetchResult::Failed(MarketDataError::DeadlineExceeded),
                );
            }
        }

        let failed = batch.errors().len();
        info!(
            "Batch of {} symbols finished in {:?} ({} failed)",
            batch.len(),
            started.elapsed(),
            failed
        );
        batch
    }

    /// Drop cache entries too old to be served even as last-known-good.
    fn prune_caches(&self) {
        let max_age = self
            .config
            .historical_ttl()
            .max(Duration::from_secs(self.config.max_stale_seconds));
        self.candles.prune(max_age);
        self.quotes.prune(max_age);
        self.books.prune(max_age);
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Fetch a historical batch and write every series that produced data
    /// to `sink`, one record set per symbol and UTC day.
    ///
    /// Sink failures are collected and do not affect other symbols.
    pub async fn persist_historical(
        &self,
        sink: &dyn RecordSink,
        symbols: &[Symbol],
        timeframe: Timeframe,
        days: u32,
        validate: bool,
    ) -> PersistSummary {
        let results = self
            .get_historical_batch(symbols, timeframe, days, validate)
            .await;

        let mut written = 0;
        let mut sink_errors = Vec::new();

        for (symbol, result) in &results.results {
            let Some(series) = result.payload() else {
                continue;
            };
            if result.is_degraded() {
                warn!("Persisting degraded series for {}", symbol);
            }

            for (date, candles) in group_by_day(&series.value) {
                let key = SinkKey::candles(symbol.clone(), timeframe, date);
                match sink.write(&key, &RecordSet::Candles(candles)).await {
                    Ok(()) => written += 1,
                    Err(err) => {
                        warn!("{}", err);
                        sink_errors.push(err);
                    }
                }
            }
        }

        debug!(
            "Persisted {} record sets, {} sink errors",
            written,
            sink_errors.len()
        );

        PersistSummary {
            results,
            written,
            sink_errors,
        }
    }
}

/// Fetch `range` page by page through one provider and merge the pages.
async fn fetch_paged(
    call: ProviderCall,
    symbol: Symbol,
    timeframe: Timeframe,
    range: TimeRange,
) -> Result<Vec<Candle>, MarketDataError> {
    let pages = range.pages(timeframe, call.provider().max_candles_per_request());
    let mut fetched = Vec::with_capacity(pages.len());

    for page in pages {
        let candles = call
            .request(|p| {
                let symbol = symbol.clone();
                async move { p.fetch_candles(&symbol, timeframe, page).await }
            })
            .await?;
        fetched.push(candles);
    }

    let page_count = fetched.len();
    let merged = merge_pages(fetched, timeframe, &range);
    if merged.is_empty() {
        return Err(MarketDataError::NoDataForRange);
    }

    debug!(
        "Fetched {} {} candles for {} from {} in {} page(s)",
        merged.len(),
        timeframe,
        symbol,
        call.id(),
        page_count
    );
    Ok(merged)
}

fn group_by_day(candles: &[Candle]) -> BTreeMap<NaiveDate, Vec<Candle>> {
    let mut days: BTreeMap<NaiveDate, Vec<Candle>> = BTreeMap::new();
    for candle in candles {
        if let Some(opened) = DateTime::<Utc>::from_timestamp_millis(candle.open_time) {
            days.entry(opened.date_naive())
                .or_default()
                .push(candle.clone());
        }
    }
    days
}
