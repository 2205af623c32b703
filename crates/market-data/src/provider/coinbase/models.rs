//! Coinbase Exchange public REST response models.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// One `/candles` row: `[time, low, high, open, close, volume]`.
///
/// `time` is the bucket start in Unix seconds. Rows arrive newest first.
pub type CbCandleRow = (i64, f64, f64, f64, f64, f64);

/// Response from `/products/{id}/stats`. Values are decimal strings.
#[derive(Debug, Deserialize)]
pub struct CbStats {
    /// 24h opening price
    pub open: Option<String>,
    /// Last trade price
    pub last: Option<String>,
    /// 24h base volume
    pub volume: Option<String>,
    // Note: high, low, volume_30day exist but are not mapped
}

/// Response from `/products/{id}/book?level=2`.
#[derive(Debug, Deserialize)]
pub struct CbBook {
    /// `[price, size, num_orders]`
    pub bids: Vec<(String, String, u32)>,
    pub asks: Vec<(String, String, u32)>,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}

/// Error body, e.g. `{"message":"NotFound"}`.
#[derive(Debug, Deserialize)]
pub struct CbError {
    pub message: Option<String>,
}
