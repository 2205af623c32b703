//! In-memory TTL cache with single-flight fetches.
//!
//! Entries are replaced wholesale on refresh and stay around after their TTL
//! as last-known-good values for degraded fallback. Concurrent misses on the
//! same key share one in-flight fetch.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use log::debug;
use tokio::sync::OnceCell;
use tokio::time::Instant;

use crate::models::{FetchResult, ProviderId, Symbol, TimeRange, Timeframe};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheKind {
    Candles,
    Quote,
    OrderBook,
}

/// Identity of one cached upstream answer.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: CacheKind,
    pub provider: ProviderId,
    pub symbol: Symbol,
    pub timeframe: Option<Timeframe>,
    pub range: Option<TimeRange>,
}

impl CacheKey {
    pub fn candles(
        provider: ProviderId,
        symbol: Symbol,
        timeframe: Timeframe,
        range: TimeRange,
    ) -> Self {
        Self {
            kind: CacheKind::Candles,
            provider,
            symbol,
            timeframe: Some(timeframe),
            range: Some(range),
        }
    }

    pub fn quote(provider: ProviderId, symbol: Symbol) -> Self {
        Self {
            kind: CacheKind::Quote,
            provider,
            symbol,
            timeframe: None,
            range: None,
        }
    }

    pub fn order_book(provider: ProviderId, symbol: Symbol) -> Self {
        Self {
            kind: CacheKind::OrderBook,
            provider,
            symbol,
            timeframe: None,
            range: None,
        }
    }
}

#[derive(Clone, Debug)]
struct CacheEntry<V> {
    value: V,
    source: ProviderId,
    fetched_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.fetched_at) < self.ttl
    }
}

/// A value served past its TTL.
#[derive(Clone, Debug)]
pub struct StaleValue<V> {
    pub value: V,
    pub source: ProviderId,
    pub age: Duration,
}

/// TTL cache for one payload type.
///
/// Storage and in-flight tracking are sharded per key.
pub struct CacheLayer<V> {
    entries: DashMap<CacheKey, CacheEntry<V>>,
    in_flight: DashMap<CacheKey, Arc<OnceCell<FetchResult<V>>>>,
}

impl<V: Clone> CacheLayer<V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            in_flight: DashMap::new(),
        }
    }

    /// Fresh value for `key`, if `now - fetched_at < ttl`.
    pub fn get(&self, key: &CacheKey) -> Option<(V, ProviderId)> {
        let entry = self.entries.get(key)?;
        if entry.is_fresh(Instant::now()) {
            Some((entry.value.clone(), entry.source.clone()))
        } else {
            None
        }
    }

    /// Last-known-good value regardless of TTL, with its age.
    pub fn get_stale(&self, key: &CacheKey) -> Option<StaleValue<V>> {
        self.entries.get(key).map(|entry| StaleValue {
            value: entry.value.clone(),
            source: entry.source.clone(),
            age: entry.fetched_at.elapsed(),
        })
    }

    pub fn put(&self, key: CacheKey, value: V, source: ProviderId, ttl: Duration) {
        self.entries.insert(
            key,
            CacheEntry {
                value,
                source,
                fetched_at: Instant::now(),
                ttl,
            },
        );
    }

    pub fn invalidate(&self, key: &CacheKey) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop entries older than `max_age`; they are no longer usable even as
    /// degraded fallback.
    pub fn prune(&self, max_age: Duration) {
        let now = Instant::now();
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.fetched_at) <= max_age);
    }

    /// Return the fresh value for `key`, or run `fetch` once for all
    /// concurrent callers of the same key.
    ///
    /// Only `Ok` results are stored. Failures and degraded results are
    /// handed to every waiter but not cached.
    pub async fn get_or_fetch<F, Fut>(&self, key: &CacheKey, ttl: Duration, fetch: F) -> FetchResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchResult<V>>,
    {
        if let Some((value, source)) = self.get(key) {
            debug!("Cache hit for {:?} {} @ {}", key.kind, key.symbol, key.provider);
            return FetchResult::ok(value, source);
        }

        let cell = self
            .in_flight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let mut led = false;
        let result = cell
            .get_or_init(|| {
                led = true;
                async move {
                    // A previous leader may have filled the cache since our miss.
                    if let Some((value, source)) = self.get(key) {
                        return FetchResult::ok(value, source);
                    }

                    let result = fetch().await;
                    if let FetchResult::Ok { payload, source } = &result {
                        self.put(key.clone(), payload.clone(), source.clone(), ttl);
                    }
                    result
                }
            })
            .await
            .clone();

        if led {
            self.in_flight
                .remove_if(key, |_, current| Arc::ptr_eq(current, &cell));
        } else {
            debug!("Coalesced onto in-flight fetch for {:?} {}", key.kind, key.symbol);
        }

        result
    }
}

impl<V: Clone> Default for CacheLayer<V> {
    fn default() -> Self {
        Self::new()
    }
}
