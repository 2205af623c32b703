//! What a provider can serve and how hard it may be called.

use std::time::Duration;

use crate::models::Timeframe;

/// Operations and timeframes a provider serves.
///
/// The engine filters fallback chains with this, so a provider that cannot
/// map a timeframe natively is never asked for it.
#[derive(Clone, Debug)]
pub struct ProviderCapabilities {
    /// Timeframes with a native interval at this provider.
    pub timeframes: &'static [Timeframe],
    pub supports_quotes: bool,
    /// L2 order book snapshots.
    pub supports_order_book: bool,
}

impl ProviderCapabilities {
    pub fn supports_timeframe(&self, timeframe: Timeframe) -> bool {
        self.timeframes.contains(&timeframe)
    }
}

/// Upstream request budget for one provider.
///
/// `requests_per_minute` feeds the token bucket of the provider's rate gate;
/// `max_concurrency` caps in-flight requests; `min_delay` spaces out
/// consecutive request starts. Engine config may lower these but never
/// raises them.
#[derive(Clone, Debug)]
pub struct RateLimit {
    pub requests_per_minute: u32,
    pub max_concurrency: usize,
    pub min_delay: Duration,
}

impl RateLimit {
    /// A budget that never blocks in practice. Used for local sources.
    pub fn unthrottled() -> Self {
        Self {
            requests_per_minute: 6000,
            max_concurrency: 10,
            min_delay: Duration::ZERO,
        }
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            max_concurrency: 5,
            min_delay: Duration::from_millis(100),
        }
    }
}
