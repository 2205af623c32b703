//! Retry and fallback controller.
//!
//! One logical request walks a provider chain (primary first):
//!
//! 1. Fresh cache hit, or join an in-flight fetch for the same key.
//! 2. Each provider gets a bounded number of gated attempts with
//!    exponential backoff and jitter, all inside one latency budget. A
//!    provider call still pending at the budget's end fails as `Timeout`.
//! 3. Fallback providers are only tried while their circuit is not open.
//! 4. When every provider is exhausted, the last-known-good value is served
//!    as `Degraded` if it is not older than the staleness bound.
//!
//! Permanent and auth failures from the primary stop the walk at once: no
//! retry, no fallback and no stale substitution. A provider that simply has
//! no data for the range hands over to the next one.

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use rand::Rng;
use tokio::time::Instant;

use super::cache::{CacheKey, CacheLayer};
use super::health::ProviderHealth;
use super::rate_limiter::RateGate;
use super::validator::{RecordSanity, SanityChecked};
use crate::errors::MarketDataError;
use crate::models::{FetchResult, ProviderId};
use crate::provider::MarketDataProvider;

/// Retry and fallback limits for one logical request.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts against the primary provider.
    pub max_attempts: u32,
    /// Total attempts against each fallback provider.
    pub secondary_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Upper bound on the time spent across all providers.
    pub latency_budget: Duration,
    /// Longest wait for a rate-gate slot per attempt.
    pub gate_timeout: Duration,
    /// Oldest last-known-good value that may be served as degraded.
    pub max_stale: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            secondary_attempts: 2,
            backoff_base: Duration::from_millis(250),
            backoff_cap: Duration::from_secs(4),
            latency_budget: Duration::from_secs(20),
            gate_timeout: Duration::from_secs(5),
            max_stale: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy {
    /// `min(base * 2^attempt, cap)`, before jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_cap)
            .min(self.backoff_cap)
    }

    /// Backoff plus uniform jitter in `[0, delay / 2]`.
    fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.backoff_delay(attempt);
        let half_ms = (delay.as_millis() / 2) as u64;
        let jitter = if half_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=half_ms)
        };
        delay + Duration::from_millis(jitter)
    }
}

/// Retry controller shared by every engine operation.
///
/// Cheap to clone; all state lives behind `Arc`s owned by the engine.
#[derive(Clone)]
pub struct RetryController {
    policy: RetryPolicy,
    gate: Arc<RateGate>,
    health: Arc<ProviderHealth>,
    sanity: Arc<RecordSanity>,
}

impl RetryController {
    pub fn new(
        policy: RetryPolicy,
        gate: Arc<RateGate>,
        health: Arc<ProviderHealth>,
        sanity: Arc<RecordSanity>,
    ) -> Self {
        Self {
            policy,
            gate,
            health,
            sanity,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn health(&self) -> &ProviderHealth {
        &self.health
    }

    /// Cached, single-flight, stale-tolerant fetch through `chain`.
    ///
    /// `key` names the logical query; the stored source is whichever
    /// provider actually answered.
    pub async fn fetch<V, F, Fut>(
        &self,
        cache: &CacheLayer<V>,
        key: &CacheKey,
        ttl: Duration,
        chain: &[Arc<dyn MarketDataProvider>],
        op: F,
    ) -> FetchResult<V>
    where
        V: Clone,
        F: Fn(ProviderCall) -> Fut,
        Fut: Future<Output = Result<V, MarketDataError>>,
    {
        let result = cache
            .get_or_fetch(key, ttl, || async {
                match self.run(chain, op).await {
                    Ok((value, source)) => FetchResult::ok(value, source),
                    Err(err) => FetchResult::Failed(err),
                }
            })
            .await;

        match result {
            FetchResult::Failed(err) if err.retry_class().is_retryable() => {
                self.stale_fallback(cache, key, chain, err)
            }
            other => other,
        }
    }

    fn stale_fallback<V: Clone>(
        &self,
        cache: &CacheLayer<V>,
        key: &CacheKey,
        chain: &[Arc<dyn MarketDataProvider>],
        err: MarketDataError,
    ) -> FetchResult<V> {
        match cache.get_stale(key) {
            Some(stale) if stale.age <= self.policy.max_stale => {
                let tried: Vec<&str> = chain.iter().map(|p| p.id()).collect();
                warn!(
                    "Serving last-known-good {:?} for {} from {} ({}s old): {}",
                    key.kind,
                    key.symbol,
                    stale.source,
                    stale.age.as_secs(),
                    err
                );
                FetchResult::Degraded {
                    payload: stale.value,
                    source: stale.source,
                    warnings: vec![
                        format!("stale data, {}s old", stale.age.as_secs()),
                        format!("providers exhausted: {}", tried.join(", ")),
                        err.to_string(),
                    ],
                }
            }
            Some(stale) => {
                debug!(
                    "Last-known-good for {} is {}s old, beyond the staleness bound",
                    key.symbol,
                    stale.age.as_secs()
                );
                FetchResult::Failed(err)
            }
            None => FetchResult::Failed(err),
        }
    }

    /// Walk `chain` without the cache. Returns the value and the provider
    /// that produced it.
    pub async fn run<T, F, Fut>(
        &self,
        chain: &[Arc<dyn MarketDataProvider>],
        op: F,
    ) -> Result<(T, ProviderId), MarketDataError>
    where
        F: Fn(ProviderCall) -> Fut,
        Fut: Future<Output = Result<T, MarketDataError>>,
    {
        let deadline = Instant::now() + self.policy.latency_budget;
        let mut tried: Vec<&'static str> = Vec::new();
        let mut last_error: Option<MarketDataError> = None;

        for (index, provider) in chain.iter().enumerate() {
            let id: ProviderId = Cow::Borrowed(provider.id());

            if index > 0 {
                if Instant::now() >= deadline {
                    debug!("Latency budget spent, not falling back to '{}'", id);
                    break;
                }
                if !self.health.is_allowed(&id) {
                    debug!("Provider '{}' is in extended failure, skipping fallback", id);
                    continue;
                }
                info!("Falling back to provider '{}'", id);
            }

            let call = ProviderCall {
                controller: self.clone(),
                provider: provider.clone(),
                id: id.clone(),
                attempts: if index == 0 {
                    self.policy.max_attempts
                } else {
                    self.policy.secondary_attempts
                },
                deadline,
            };

            tried.push(provider.id());
            match op(call).await {
                Ok(value) => {
                    self.health.record_success(&id);
                    return Ok((value, id));
                }
                Err(err) if err.retry_class().is_retryable() => {
                    warn!("Provider '{}' exhausted: {}", id, err);
                    last_error = Some(err);
                }
                Err(err) if index == 0 && !err.allows_fallback() => {
                    debug!("Provider '{}' failed permanently: {}", id, err);
                    return Err(err);
                }
                Err(err) => {
                    debug!("Provider '{}' cannot serve the request: {}", id, err);
                    if last_error.is_none() {
                        last_error = Some(err);
                    }
                }
            }
        }

        match last_error {
            Some(err) if tried.len() > 1 && err.retry_class().is_retryable() => {
                Err(MarketDataError::AllProvidersFailed {
                    providers: tried.join(", "),
                    last_error: err.to_string(),
                })
            }
            Some(err) => Err(err),
            None => Err(MarketDataError::NoProvidersAvailable),
        }
    }
}

/// Handle for issuing gated, retried requests to one provider of a chain.
///
/// An operation may issue several requests through one call (pages of a
/// historical range); each request gets the full per-provider attempt count.
#[derive(Clone)]
pub struct ProviderCall {
    controller: RetryController,
    provider: Arc<dyn MarketDataProvider>,
    id: ProviderId,
    attempts: u32,
    deadline: Instant,
}

impl ProviderCall {
    pub fn provider(&self) -> &Arc<dyn MarketDataProvider> {
        &self.provider
    }

    pub fn id(&self) -> &ProviderId {
        &self.id
    }

    /// Run `op` with rate gating, sanity checks and bounded retries.
    pub async fn request<T, F, Fut>(&self, op: F) -> Result<T, MarketDataError>
    where
        T: SanityChecked,
        F: Fn(Arc<dyn MarketDataProvider>) -> Fut,
        Fut: Future<Output = Result<T, MarketDataError>>,
    {
        let policy = &self.controller.policy;
        let attempts = self.attempts.max(1);
        let mut attempt = 0u32;

        loop {
            let outcome = self.attempt_once(&op).await;

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.retry_class().is_retryable() {
                return Err(err);
            }

            self.controller.health.record_failure(&self.id);
            attempt += 1;

            if attempt >= attempts {
                debug!(
                    "Provider '{}' failed {} of {} attempts: {}",
                    self.id, attempt, attempts, err
                );
                return Err(err);
            }

            let delay = policy.jittered_delay(attempt - 1);
            if Instant::now() + delay >= self.deadline {
                debug!(
                    "Skipping retry of '{}': {:?} backoff would exceed the latency budget",
                    self.id, delay
                );
                return Err(err);
            }

            warn!(
                "Provider '{}' attempt {}/{} failed ({}), retrying in {:?}",
                self.id, attempt, attempts, err, delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt_once<T, F, Fut>(&self, op: &F) -> Result<T, MarketDataError>
    where
        T: SanityChecked,
        F: Fn(Arc<dyn MarketDataProvider>) -> Fut,
        Fut: Future<Output = Result<T, MarketDataError>>,
    {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        let gate_timeout = self.controller.policy.gate_timeout.min(remaining);

        let _permit = self.controller.gate.acquire(&self.id, gate_timeout).await?;
        let value = tokio::time::timeout_at(self.deadline, op(self.provider.clone()))
            .await
            .map_err(|_| {
                warn!("Provider '{}' did not answer within the latency budget", self.id);
                MarketDataError::Timeout {
                    provider: self.id.to_string(),
                }
            })??;
        self.controller.sanity.check(&self.id, &value)?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Candle, Quote, Symbol, TimeRange, Timeframe};
    use crate::provider::{ProviderCapabilities, RateLimit};
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Provider whose quote responses are scripted; falls back to `default`.
    struct ScriptedProvider {
        id: &'static str,
        script: Mutex<VecDeque<Result<Decimal, MarketDataError>>>,
        default: Result<Decimal, MarketDataError>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(
            id: &'static str,
            script: Vec<Result<Decimal, MarketDataError>>,
            default: Result<Decimal, MarketDataError>,
        ) -> Arc<Self> {
            Arc::new(Self {
                id,
                script: Mutex::new(script.into()),
                default,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MarketDataProvider for ScriptedProvider {
        fn id(&self) -> &'static str {
            self.id
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities {
                timeframes: &Timeframe::ALL,
                supports_quotes: true,
                supports_order_book: false,
            }
        }

        fn rate_limit(&self) -> RateLimit {
            RateLimit::unthrottled()
        }

        async fn fetch_candles(
            &self,
            _symbol: &Symbol,
            _timeframe: Timeframe,
            _range: TimeRange,
        ) -> Result<Vec<Candle>, MarketDataError> {
            Err(MarketDataError::NoDataForRange)
        }

        async fn fetch_quote(&self, symbol: &Symbol) -> Result<Quote, MarketDataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.default.clone());
            next.map(|price| Quote::new(symbol.clone(), price, Utc::now(), self.id.to_string()))
        }
    }

    fn transient(id: &str) -> MarketDataError {
        MarketDataError::ServerError {
            provider: id.to_string(),
            status: 503,
        }
    }

    fn controller(policy: RetryPolicy) -> RetryController {
        RetryController::new(
            policy,
            Arc::new(RateGate::new()),
            Arc::new(ProviderHealth::new()),
            Arc::new(RecordSanity::new()),
        )
    }

    fn btc() -> Symbol {
        Symbol::parse("BTC").unwrap()
    }

    async fn quote_via(
        controller: &RetryController,
        cache: &CacheLayer<Quote>,
        chain: &[Arc<dyn MarketDataProvider>],
    ) -> FetchResult<Quote> {
        let key = CacheKey::quote(Cow::Borrowed(chain[0].id()), btc());
        controller
            .fetch(cache, &key, Duration::from_secs(30), chain, |call| async move {
                call.request(|p| async move { p.fetch_quote(&btc()).await })
                    .await
            })
            .await
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_millis(500),
            ..Default::default()
        };
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(500));
        assert_eq!(policy.backoff_delay(40), Duration::from_millis(500));

        for attempt in 0..5 {
            let jittered = policy.jittered_delay(attempt);
            let base = policy.backoff_delay(attempt);
            assert!(jittered >= base && jittered <= base + base / 2);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_max_attempts_minus_one_failures() {
        let primary = ScriptedProvider::new(
            "PRIMARY",
            vec![Err(transient("PRIMARY")), Err(transient("PRIMARY"))],
            Ok(dec!(100)),
        );
        let chain: Vec<Arc<dyn MarketDataProvider>> = vec![primary.clone()];
        let controller = controller(RetryPolicy::default());

        let result = quote_via(&controller, &CacheLayer::new(), &chain).await;

        assert!(result.is_ok());
        assert_eq!(result.payload().unwrap().price, dec!(100));
        assert_eq!(primary.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_is_not_retried_or_fallen_back() {
        let primary = ScriptedProvider::new(
            "PRIMARY",
            vec![],
            Err(MarketDataError::SymbolNotFound("BTC".to_string())),
        );
        let secondary = ScriptedProvider::new("SECONDARY", vec![], Ok(dec!(100)));
        let chain: Vec<Arc<dyn MarketDataProvider>> = vec![primary.clone(), secondary.clone()];
        let controller = controller(RetryPolicy::default());

        let result = quote_via(&controller, &CacheLayer::new(), &chain).await;

        assert!(matches!(
            result.error(),
            Some(MarketDataError::SymbolNotFound(_))
        ));
        assert_eq!(primary.calls(), 1);
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_back_to_healthy_secondary() {
        let primary = ScriptedProvider::new("PRIMARY", vec![], Err(transient("PRIMARY")));
        let secondary = ScriptedProvider::new("SECONDARY", vec![], Ok(dec!(101)));
        let chain: Vec<Arc<dyn MarketDataProvider>> = vec![primary.clone(), secondary.clone()];
        let controller = controller(RetryPolicy::default());

        let result = quote_via(&controller, &CacheLayer::new(), &chain).await;

        assert!(result.is_ok());
        assert_eq!(result.source().unwrap(), "SECONDARY");
        assert_eq!(primary.calls(), 3);
        assert_eq!(controller.health().failure_count(&Cow::Borrowed("PRIMARY")), 3);
        assert_eq!(controller.health().failure_count(&Cow::Borrowed("SECONDARY")), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_secondary_is_skipped() {
        let primary = ScriptedProvider::new("PRIMARY", vec![], Err(transient("PRIMARY")));
        let secondary = ScriptedProvider::new("SECONDARY", vec![], Ok(dec!(101)));
        let chain: Vec<Arc<dyn MarketDataProvider>> = vec![primary.clone(), secondary.clone()];
        let controller = controller(RetryPolicy::default());

        let secondary_id: ProviderId = Cow::Borrowed("SECONDARY");
        for _ in 0..5 {
            controller.health().record_failure(&secondary_id);
        }

        let result = quote_via(&controller, &CacheLayer::new(), &chain).await;

        assert!(result.is_failed());
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_value_served_as_degraded() {
        let primary = ScriptedProvider::new("PRIMARY", vec![Ok(dec!(99))], Err(transient("PRIMARY")));
        let chain: Vec<Arc<dyn MarketDataProvider>> = vec![primary.clone()];
        let controller = controller(RetryPolicy::default());
        let cache = CacheLayer::new();

        assert!(quote_via(&controller, &cache, &chain).await.is_ok());
        tokio::time::advance(Duration::from_secs(60)).await;

        let result = quote_via(&controller, &cache, &chain).await;
        assert!(result.is_degraded());
        assert_eq!(result.payload().unwrap().price, dec!(99));
        assert!(result.warnings().iter().any(|w| w.contains("stale")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_value_beyond_bound_fails() {
        let primary = ScriptedProvider::new("PRIMARY", vec![Ok(dec!(99))], Err(transient("PRIMARY")));
        let chain: Vec<Arc<dyn MarketDataProvider>> = vec![primary.clone()];
        let controller = controller(RetryPolicy {
            max_stale: Duration::from_secs(120),
            ..Default::default()
        });
        let cache = CacheLayer::new();

        assert!(quote_via(&controller, &cache, &chain).await.is_ok());
        tokio::time::advance(Duration::from_secs(300)).await;

        assert!(quote_via(&controller, &cache, &chain).await.is_failed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_gets_no_stale_substitution() {
        let primary = ScriptedProvider::new(
            "PRIMARY",
            vec![Ok(dec!(99))],
            Err(MarketDataError::AuthFailure {
                provider: "PRIMARY".to_string(),
            }),
        );
        let chain: Vec<Arc<dyn MarketDataProvider>> = vec![primary.clone()];
        let controller = controller(RetryPolicy::default());
        let cache = CacheLayer::new();

        assert!(quote_via(&controller, &cache, &chain).await.is_ok());
        tokio::time::advance(Duration::from_secs(60)).await;

        let result = quote_via(&controller, &cache, &chain).await;
        assert!(matches!(
            result.error(),
            Some(MarketDataError::AuthFailure { .. })
        ));
        assert_eq!(primary.calls(), 2);
    }

    /// Answers once, then hangs on every later quote request.
    struct HangingProvider {
        answered: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl MarketDataProvider for HangingProvider {
        fn id(&self) -> &'static str {
            "PRIMARY"
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities {
                timeframes: &Timeframe::ALL,
                supports_quotes: true,
                supports_order_book: false,
            }
        }

        fn rate_limit(&self) -> RateLimit {
            RateLimit::unthrottled()
        }

        async fn fetch_candles(
            &self,
            _symbol: &Symbol,
            _timeframe: Timeframe,
            _range: TimeRange,
        ) -> Result<Vec<Candle>, MarketDataError> {
            Err(MarketDataError::NoDataForRange)
        }

        async fn fetch_quote(&self, symbol: &Symbol) -> Result<Quote, MarketDataError> {
            if self.answered.swap(true, Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(Quote::new(symbol.clone(), dec!(99), Utc::now(), "PRIMARY".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_provider_is_cut_at_latency_budget() {
        let primary = Arc::new(HangingProvider {
            answered: std::sync::atomic::AtomicBool::new(false),
        });
        let chain: Vec<Arc<dyn MarketDataProvider>> = vec![primary];
        let controller = controller(RetryPolicy {
            latency_budget: Duration::from_millis(500),
            ..Default::default()
        });
        let cache = CacheLayer::new();

        assert!(quote_via(&controller, &cache, &chain).await.is_ok());
        tokio::time::advance(Duration::from_secs(60)).await;

        let started = Instant::now();
        let result = quote_via(&controller, &cache, &chain).await;

        assert!(started.elapsed() <= Duration::from_secs(1));
        assert!(result.is_degraded());
        assert_eq!(result.payload().unwrap().price, dec!(99));
        assert_eq!(
            controller
                .health()
                .failure_count(&Cow::Borrowed("PRIMARY")),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_provider_without_cache_times_out() {
        let primary = Arc::new(HangingProvider {
            answered: std::sync::atomic::AtomicBool::new(true),
        });
        let chain: Vec<Arc<dyn MarketDataProvider>> = vec![primary];
        let controller = controller(RetryPolicy {
            latency_budget: Duration::from_millis(500),
            ..Default::default()
        });

        let result = quote_via(&controller, &CacheLayer::new(), &chain).await;

        assert!(matches!(
            result.error(),
            Some(MarketDataError::Timeout { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_skipped_when_budget_exceeded() {
        let primary = ScriptedProvider::new("PRIMARY", vec![], Err(transient("PRIMARY")));
        let chain: Vec<Arc<dyn MarketDataProvider>> = vec![primary.clone()];
        let controller = controller(RetryPolicy {
            max_attempts: 5,
            backoff_base: Duration::from_secs(1),
            latency_budget: Duration::from_millis(500),
            ..Default::default()
        });

        let start = Instant::now();
        let result = quote_via(&controller, &CacheLayer::new(), &chain).await;

        assert!(result.is_failed());
        assert_eq!(primary.calls(), 1);
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_insane_payload_is_retried() {
        let primary = ScriptedProvider::new("PRIMARY", vec![Ok(dec!(-5))], Ok(dec!(100)));
        let chain: Vec<Arc<dyn MarketDataProvider>> = vec![primary.clone()];
        let controller = controller(RetryPolicy::default());

        let result = quote_via(&controller, &CacheLayer::new(), &chain).await;

        assert_eq!(result.payload().unwrap().price, dec!(100));
        assert_eq!(primary.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_providers_failed_names_chain() {
        let primary = ScriptedProvider::new("PRIMARY", vec![], Err(transient("PRIMARY")));
        let secondary = ScriptedProvider::new("SECONDARY", vec![], Err(transient("SECONDARY")));
        let chain: Vec<Arc<dyn MarketDataProvider>> = vec![primary, secondary];
        let controller = controller(RetryPolicy::default());

        let result = quote_via(&controller, &CacheLayer::new(), &chain).await;

        match result.error() {
            Some(MarketDataError::AllProvidersFailed { providers, .. }) => {
                assert_eq!(providers, "PRIMARY, SECONDARY");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_range_falls_through_to_next_provider() {
        let primary = ScriptedProvider::new("PRIMARY", vec![], Err(MarketDataError::NoDataForRange));
        let secondary = ScriptedProvider::new("SECONDARY", vec![], Ok(dec!(101)));
        let chain: Vec<Arc<dyn MarketDataProvider>> = vec![primary.clone(), secondary.clone()];
        let controller = controller(RetryPolicy::default());

        let result = quote_via(&controller, &CacheLayer::new(), &chain).await;

        assert_eq!(result.source().unwrap(), "SECONDARY");
        assert_eq!(primary.calls(), 1);
        assert_eq!(controller.health().failure_count(&Cow::Borrowed("PRIMARY")), 0);
    }
}
