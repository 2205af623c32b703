use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::types::EpochMillis;
use crate::errors::MarketDataError;

const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

/// Canonical candle granularity.
///
/// Hyperliquid uses `as_str` directly as its interval string; Coinbase maps
/// to granularity seconds and has no 4h bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 6] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
        }
    }

    /// Length of one candle in milliseconds.
    pub fn duration_ms(self) -> i64 {
        match self {
            Self::M1 => MINUTE_MS,
            Self::M5 => 5 * MINUTE_MS,
            Self::M15 => 15 * MINUTE_MS,
            Self::H1 => HOUR_MS,
            Self::H4 => 4 * HOUR_MS,
            Self::D1 => DAY_MS,
        }
    }

    /// Truncate a timestamp to the start of the candle containing it.
    ///
    /// Boundaries are aligned to the Unix epoch in UTC, which is where every
    /// supported provider opens its buckets.
    pub fn floor(self, ts: EpochMillis) -> EpochMillis {
        ts - ts.rem_euclid(self.duration_ms())
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tf| tf.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| MarketDataError::UnsupportedTimeframe {
                provider: "ENGINE".to_string(),
                timeframe: s.to_string(),
            })
    }
}

/// Half-open time range `[start_ms, end_ms)` in UTC epoch milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start_ms: EpochMillis,
    pub end_ms: EpochMillis,
}

impl TimeRange {
    pub fn new(start_ms: EpochMillis, end_ms: EpochMillis) -> Self {
        Self { start_ms, end_ms }
    }

    /// The last `days` worth of closed candles, ending at the boundary of the
    /// candle that is still open at `now_ms`.
    pub fn trailing(days: u32, timeframe: Timeframe, now_ms: EpochMillis) -> Self {
        let end_ms = timeframe.floor(now_ms);
        Self {
            start_ms: end_ms - i64::from(days) * DAY_MS,
            end_ms,
        }
    }

    /// The last `count` closed candles before `now_ms`.
    ///
    /// The start never reaches back past the Unix epoch, however large
    /// `count` is.
    pub fn last_candles(count: usize, timeframe: Timeframe, now_ms: EpochMillis) -> Self {
        let end_ms = timeframe.floor(now_ms);
        let span = i64::try_from(count)
            .unwrap_or(i64::MAX)
            .saturating_mul(timeframe.duration_ms());
        Self {
            start_ms: end_ms.saturating_sub(span).max(0).min(end_ms),
            end_ms,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.end_ms <= self.start_ms
    }

    pub fn contains(&self, ts: EpochMillis) -> bool {
        ts >= self.start_ms && ts < self.end_ms
    }

    /// Number of candle slots of `timeframe` that open inside this range.
    pub fn candle_count(&self, timeframe: Timeframe) -> usize {
        if self.is_empty() {
            return 0;
        }
        let step = timeframe.duration_ms();
        let first = timeframe.floor(self.start_ms + step - 1);
        if first >= self.end_ms {
            return 0;
        }
        ((self.end_ms - 1 - first) / step + 1) as usize
    }

    /// Split into contiguous pages of at most `page_size` candles each.
    ///
    /// Pages are returned oldest first and together cover the whole range.
    pub fn pages(&self, timeframe: Timeframe, page_size: usize) -> Vec<TimeRange> {
        if self.is_empty() {
            return Vec::new();
        }

        let span = i64::try_from(page_size.max(1))
            .unwrap_or(i64::MAX)
            .saturating_mul(timeframe.duration_ms());
        let mut pages = Vec::new();
        let mut start = self.start_ms;
        while start < self.end_ms {
            let end = start.saturating_add(span).min(self.end_ms);
            pages.push(TimeRange::new(start, end));
            start = end;
        }
        pages
    }

    /// Whether every candle in this range has already closed at `now_ms`.
    pub fn is_closed(&self, timeframe: Timeframe, now_ms: EpochMillis) -> bool {
        self.end_ms <= timeframe.floor(now_ms)
    }
}
