//! Masterdata Market Data Crate
//!
//! This crate aggregates candles, quotes and order books from several
//! upstream market data providers behind one engine.
//!
//! # Overview
//!
//! The market data crate supports:
//! - Multiple providers: Hyperliquid (primary) and Coinbase (fallback)
//! - Per-provider rate gating and health tracking
//! - TTL caching with single-flight fetches and last-known-good fallback
//! - Bounded retries with exponential backoff and jitter
//! - Cross-source validation of candles and quotes
//! - Batch fetches over a bounded worker pool with a batch deadline
//!
//! # Architecture
//!
//! ```text
//! +------------------+
//! | MarketDataEngine |  (operations, batches, persistence)
//! +------------------+
//!          |
//!          v
//! +------------------+     +------------------+
//! |   CacheLayer     | --> | RetryController  |  (single-flight, fallback, stale)
//! +------------------+     +------------------+
//!                                  |
//!                                  v
//!                   +------------------------------+
//!                   | RateGate + ProviderHealth    |  (per provider)
//!                   +------------------------------+
//!                                  |
//!                                  v
//!                          +------------------+
//!                          |    Provider      |  (Hyperliquid, Coinbase, ...)
//!                          +------------------+
//!                                  |
//!                                  v
//!                   +------------------------------+
//!                   | RecordSanity / CrossSource   |  (validation)
//!                   +------------------------------+
//! ```
//!
//! # Core Types
//!
//! - [`Symbol`] - Normalized asset identifier
//! - [`Candle`] / [`Timeframe`] / [`TimeRange`] - Historical OHLCV data
//! - [`Quote`] - Latest price snapshot
//! - [`OrderBook`] - L2 book snapshot
//! - [`FetchResult`] - `Ok`, `Degraded` or `Failed` outcome of one request
//! - [`Validated`] - Payload with its cross-source [`Validation`]
//! - [`BatchResult`] - Per-symbol outcomes of a batch call

pub mod config;
pub mod engine;
pub mod errors;
pub mod models;
pub mod provider;
pub mod registry;
pub mod sink;

pub use config::{ConfigError, EngineConfig};
pub use engine::{EngineBuilder, MarketDataEngine, PersistSummary};
pub use errors::{MarketDataError, RetryClass};

// Re-export all public types from models
pub use models::{
    BatchResult, BookLevel, Candle, Discrepancy, EpochMillis, FetchResult, OrderBook, ProviderId,
    Quote, Symbol, TimeRange, Timeframe, Validated, Validation,
};

// Re-export provider types
pub use provider::coinbase::CoinbaseProvider;
pub use provider::hyperliquid::HyperliquidProvider;
pub use provider::{MarketDataProvider, ProviderCapabilities, RateLimit};

// Re-export registry types
pub use registry::{
    CircuitState, CrossSourceValidator, HealthSnapshot, RateGate, RetryPolicy, ValidationSeverity,
};

pub use sink::{DataType, MemorySink, RecordSet, RecordSink, SinkError, SinkKey};
