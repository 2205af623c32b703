//! Per-provider request gate.
//!
//! Each provider gets its own gate made of two parts:
//! - a semaphore bounding in-flight requests (released when the permit drops)
//! - a token bucket bounding requests per minute, plus a minimum spacing
//!   between consecutive requests
//!
//! Both parts queue waiters in FIFO order, so a symbol that started waiting
//! first is served first. Acquisition is bounded by a timeout and reports
//! `Busy` instead of blocking forever.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use log::debug;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::errors::MarketDataError;
use crate::models::ProviderId;
use crate::provider::RateLimit;

/// Maximum burst size of a bucket.
const DEFAULT_BUCKET_CAPACITY: f64 = 10.0;

/// Token bucket for a single provider.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
    /// Tokens per second.
    rate: f64,
    capacity: f64,
    min_delay: Duration,
    last_request: Option<Instant>,
}

impl TokenBucket {
    fn new(requests_per_minute: u32, min_delay: Duration) -> Self {
        let rpm = requests_per_minute.max(1) as f64;
        let capacity = DEFAULT_BUCKET_CAPACITY.min(rpm);
        Self {
            tokens: capacity,
            last_update: Instant::now(),
            rate: rpm / 60.0,
            capacity,
            min_delay,
            last_request: None,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_update = now;
    }

    /// Time until a request may be sent.
    fn time_until_available(&mut self, now: Instant) -> Duration {
        self.refill(now);

        let token_wait = if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / self.rate)
        };

        let spacing_wait = self
            .last_request
            .map(|last| (last + self.min_delay).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO);

        token_wait.max(spacing_wait)
    }

    fn take(&mut self, now: Instant) {
        self.tokens -= 1.0;
        self.last_request = Some(now);
    }
}

struct ProviderGate {
    slots: Arc<Semaphore>,
    max_concurrency: usize,
    bucket: Mutex<TokenBucket>,
}

impl ProviderGate {
    fn new(limit: &RateLimit) -> Self {
        let max_concurrency = limit.max_concurrency.max(1);
        Self {
            slots: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            bucket: Mutex::new(TokenBucket::new(
                limit.requests_per_minute,
                limit.min_delay,
            )),
        }
    }
}

/// Proof that a request may be sent. Releases the in-flight slot on drop.
#[derive(Debug)]
pub struct GatePermit {
    provider: ProviderId,
    _slot: OwnedSemaphorePermit,
}

impl GatePermit {
    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }
}

/// Rate gates for all providers.
///
/// Gates are created from a provider's declared [`RateLimit`] when it is
/// registered, or lazily with defaults on first use. A configured
/// requests-per-minute override and concurrency cap apply to every gate.
#[derive(Default)]
pub struct RateGate {
    gates: DashMap<ProviderId, Arc<ProviderGate>>,
    rpm_override: Option<u32>,
    concurrency_cap: Option<usize>,
}

impl RateGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate whose limits are tightened by configuration.
    pub fn with_overrides(rpm_override: Option<u32>, concurrency_cap: Option<usize>) -> Self {
        Self {
            gates: DashMap::new(),
            rpm_override,
            concurrency_cap,
        }
    }

    /// Install (or replace) the gate for a provider.
    pub fn register(&self, provider: ProviderId, limit: &RateLimit) {
        let effective = self.effective_limit(limit);
        debug!(
            "Rate gate for '{}': {} rpm, {} concurrent, {:?} spacing",
            provider, effective.requests_per_minute, effective.max_concurrency, effective.min_delay
        );
        self.gates
            .insert(provider, Arc::new(ProviderGate::new(&effective)));
    }

    fn effective_limit(&self, limit: &RateLimit) -> RateLimit {
        let mut effective = limit.clone();
        if let Some(rpm) = self.rpm_override {
            effective.requests_per_minute = rpm;
        }
        if let Some(cap) = self.concurrency_cap {
            effective.max_concurrency = effective.max_concurrency.min(cap);
        }
        effective
    }

    fn gate(&self, provider: &ProviderId) -> Arc<ProviderGate> {
        self.gates
            .entry(provider.clone())
            .or_insert_with(|| {
                Arc::new(ProviderGate::new(
                    &self.effective_limit(&RateLimit::default()),
                ))
            })
            .clone()
    }

    /// Wait for a slot at `provider`, giving up with `Busy` after `timeout`.
    pub async fn acquire(
        &self,
        provider: &ProviderId,
        timeout: Duration,
    ) -> Result<GatePermit, MarketDataError> {
        let gate = self.gate(provider);
        let busy = || MarketDataError::Busy {
            provider: provider.to_string(),
        };

        let wait = async {
            let slot = gate.slots.clone().acquire_owned().await.map_err(|_| busy())?;

            // Holding the bucket lock while sleeping keeps waiters in FIFO order.
            let mut bucket = gate.bucket.lock().await;
            loop {
                let now = Instant::now();
                let wait = bucket.time_until_available(now);
                if wait.is_zero() {
                    bucket.take(now);
                    break;
                }
                debug!("Rate gate: waiting {:?} for provider '{}'", wait, provider);
                tokio::time::sleep(wait).await;
            }

            Ok::<_, MarketDataError>(slot)
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(slot)) => Ok(GatePermit {
                provider: provider.clone(),
                _slot: slot,
            }),
            Ok(Err(err)) => Err(err),
            Err(_) => {
                debug!("Rate gate: '{}' busy after {:?}", provider, timeout);
                Err(busy())
            }
        }
    }

    /// Requests currently holding a slot at `provider`.
    pub fn in_flight(&self, provider: &ProviderId) -> usize {
        self.gates
            .get(provider)
            .map(|gate| gate.max_concurrency - gate.slots.available_permits())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    fn limit(rpm: u32, concurrency: usize) -> RateLimit {
        RateLimit {
            requests_per_minute: rpm,
            max_concurrency: concurrency,
            min_delay: Duration::ZERO,
        }
    }

    #[test]
    fn test_token_bucket_burst_then_wait() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(60, Duration::ZERO);

        for _ in 0..DEFAULT_BUCKET_CAPACITY as usize {
            assert!(bucket.time_until_available(now).is_zero());
            bucket.take(now);
        }

        let wait = bucket.time_until_available(now);
        assert!(wait > Duration::from_millis(900) && wait <= Duration::from_secs(1));
    }

    #[test]
    fn test_token_bucket_min_delay() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(600, Duration::from_millis(250));
        bucket.take(now);

        let wait = bucket.time_until_available(now + Duration::from_millis(100));
        assert_eq!(wait, Duration::from_millis(150));
    }

    #[test]
    fn test_bucket_capacity_never_exceeds_rpm() {
        let bucket = TokenBucket::new(3, Duration::ZERO);
        assert_eq!(bucket.capacity, 3.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bound_reports_busy() {
        let gate = RateGate::new();
        let provider: ProviderId = Cow::Borrowed("SLOW");
        gate.register(provider.clone(), &limit(600, 1));

        let held = gate.acquire(&provider, Duration::from_secs(1)).await.unwrap();
        assert_eq!(gate.in_flight(&provider), 1);

        let err = gate
            .acquire(&provider, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, MarketDataError::Busy { .. }));

        drop(held);
        assert_eq!(gate.in_flight(&provider), 0);
        assert!(gate.acquire(&provider, Duration::from_millis(100)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_delays_past_burst() {
        let gate = RateGate::new();
        let provider: ProviderId = Cow::Borrowed("LIMITED");
        gate.register(provider.clone(), &limit(60, 20));

        let start = Instant::now();
        for _ in 0..DEFAULT_BUCKET_CAPACITY as usize {
            gate.acquire(&provider, Duration::from_secs(5)).await.unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(10));

        gate.acquire(&provider, Duration::from_secs(5)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rpm_override_applies() {
        let gate = RateGate::with_overrides(Some(1), Some(1));
        let provider: ProviderId = Cow::Borrowed("OVERRIDDEN");
        gate.register(provider.clone(), &limit(6000, 10));

        drop(gate.acquire(&provider, Duration::from_secs(1)).await.unwrap());
        let err = gate
            .acquire(&provider, Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(err, MarketDataError::Busy { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_served_in_fifo_order() {
        let gate = Arc::new(RateGate::new());
        let provider: ProviderId = Cow::Borrowed("FIFO");
        gate.register(provider.clone(), &limit(6000, 1));

        let first = gate.acquire(&provider, Duration::from_secs(1)).await.unwrap();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..3 {
            let gate = gate.clone();
            let provider = provider.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _permit = gate.acquire(&provider, Duration::from_secs(10)).await.unwrap();
                order.lock().unwrap().push(i);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }));
            tokio::task::yield_now().await;
        }

        drop(first);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_isolation() {
        let gate = RateGate::new();
        let a: ProviderId = Cow::Borrowed("PROVIDER_A");
        let b: ProviderId = Cow::Borrowed("PROVIDER_B");
        gate.register(a.clone(), &limit(600, 1));
        gate.register(b.clone(), &limit(600, 1));

        let _held = gate.acquire(&a, Duration::from_secs(1)).await.unwrap();
        assert!(gate.acquire(&b, Duration::from_millis(10)).await.is_ok());
    }
}
