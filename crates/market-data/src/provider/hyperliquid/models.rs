//! Hyperliquid `/info` API request and response models.
//!
//! Prices and sizes are sent as decimal strings; they are parsed into
//! `Decimal` without going through `f64`.

use serde::{Deserialize, Serialize};

/// Request body for `POST /info`.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InfoRequest<'a> {
    CandleSnapshot { req: CandleSnapshotReq<'a> },
    MetaAndAssetCtxs,
    L2Book { coin: &'a str },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandleSnapshotReq<'a> {
    pub coin: &'a str,
    pub interval: &'a str,
    pub start_time: i64,
    pub end_time: i64,
}

/// One element of the `candleSnapshot` response.
#[derive(Debug, Deserialize)]
pub struct HlCandle {
    /// Open time (ms)
    pub t: i64,
    pub o: String,
    pub h: String,
    pub l: String,
    pub c: String,
    pub v: String,
    // Note: T (close time), s (coin), i (interval), n (trade count) exist but are not used
}

/// First element of the `metaAndAssetCtxs` response.
#[derive(Debug, Deserialize)]
pub struct HlMeta {
    pub universe: Vec<HlAsset>,
}

#[derive(Debug, Deserialize)]
pub struct HlAsset {
    pub name: String,
}

/// Per-asset context, index-aligned with `HlMeta::universe`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HlAssetCtx {
    pub mark_px: Option<String>,
    pub mid_px: Option<String>,
    pub prev_day_px: Option<String>,
    pub day_ntl_vlm: Option<String>,
    /// Hourly funding rate.
    pub funding: Option<String>,
    pub open_interest: Option<String>,
}

/// Response of the `l2Book` request.
#[derive(Debug, Deserialize)]
pub struct HlBook {
    pub time: i64,
    /// `[bids, asks]`
    pub levels: Vec<Vec<HlLevel>>,
}

#[derive(Debug, Deserialize)]
pub struct HlLevel {
    pub px: String,
    pub sz: String,
    pub n: u32,
}
