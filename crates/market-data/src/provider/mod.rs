//! Market data provider abstractions and implementations.
//!
//! This module contains:
//! - The `MarketDataProvider` trait that all providers implement
//! - Provider capabilities and rate limiting configuration
//! - Concrete provider implementations (Hyperliquid, Coinbase)
//!
//! # Architecture
//!
//! Providers are thin: one upstream call per operation, errors classified
//! through `MarketDataError`, no retries or caching. Symbols arrive already
//! normalized; each provider maps them to its native form (`BTC` for
//! Hyperliquid, the `BTC-USD` product for Coinbase).

mod capabilities;
mod traits;

pub mod coinbase;
pub mod hyperliquid;

pub use capabilities::{ProviderCapabilities, RateLimit};
pub use traits::MarketDataProvider;
