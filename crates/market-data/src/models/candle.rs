use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::symbol::Symbol;
use super::timeframe::{TimeRange, Timeframe};
use super::types::EpochMillis;

/// One OHLCV bucket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
    /// Bucket open time, UTC epoch milliseconds
    pub open_time: EpochMillis,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: Symbol,
        timeframe: Timeframe,
        open_time: EpochMillis,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            symbol,
            timeframe,
            open_time,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

/// Merge candle pages into one strictly increasing series.
///
/// Open times are floored to the timeframe boundary, candles outside `range`
/// are dropped, and on duplicate open times the candle from the later page
/// wins. Pages must be passed in request order.
pub fn merge_pages<I>(pages: I, timeframe: Timeframe, range: &TimeRange) -> Vec<Candle>
where
    I: IntoIterator<Item = Vec<Candle>>,
{
    let mut by_open_time: BTreeMap<EpochMillis, Candle> = BTreeMap::new();

    for page in pages {
        for mut candle in page {
            candle.open_time = timeframe.floor(candle.open_time);
            if range.contains(candle.open_time) {
                by_open_time.insert(candle.open_time, candle);
            }
        }
    }

    by_open_time.into_values().collect()
}

/// Whether `candles` is strictly increasing by open time.
pub fn is_strictly_increasing(candles: &[Candle]) -> bool {
    candles
        .windows(2)
        .all(|pair| pair[0].open_time < pair[1].open_time)
}
