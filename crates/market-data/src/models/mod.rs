//! Market data models
//!
//! This module contains the core data types for market data operations:
//! - `types` - Type aliases for common identifiers (ProviderId, EpochMillis)
//! - `symbol` - Canonical asset identifier (Symbol)
//! - `timeframe` - Candle granularity and time ranges (Timeframe, TimeRange)
//! - `candle` - OHLCV records and series merging (Candle)
//! - `quote` - Latest price snapshots (Quote)
//! - `order_book` - L2 book snapshots (OrderBook, BookLevel)
//! - `fetch_result` - Tagged outcomes and validation annotations (FetchResult, Validated)

mod candle;
mod fetch_result;
mod order_book;
mod quote;
mod symbol;
mod timeframe;
mod types;

pub use candle::{is_strictly_increasing, merge_pages, Candle};
pub use fetch_result::{BatchResult, Discrepancy, FetchResult, Validated, Validation};
pub use order_book::{BookLevel, OrderBook};
pub use quote::{percent_change, Quote};
pub use symbol::Symbol;
pub use timeframe::{TimeRange, Timeframe};
pub use types::{EpochMillis, ProviderId};
