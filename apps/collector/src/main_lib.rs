use std::sync::Arc;

use chrono::Utc;
use masterdata_market_data::provider::{coinbase, hyperliquid};
use masterdata_market_data::{
    CoinbaseProvider, HyperliquidProvider, MarketDataEngine, RecordSet, RecordSink, SinkKey,
    Validation,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

pub fn init_tracing() {
    let log_format = std::env::var("MDC_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }
}

pub fn build_engine(config: &Config) -> anyhow::Result<MarketDataEngine> {
    let timeout = config.engine.request_timeout();
    let hyperliquid_url = if config.testnet {
        hyperliquid::TESTNET_URL
    } else {
        hyperliquid::MAINNET_URL
    };

    let engine = MarketDataEngine::builder()
        .primary(Arc::new(HyperliquidProvider::with_base_url(
            hyperliquid_url,
            timeout,
        )))
        .secondary(Arc::new(CoinbaseProvider::with_base_url(
            coinbase::BASE_URL,
            timeout,
        )))
        .config(config.engine.clone())
        .build()?;
    Ok(engine)
}

/// Counts reported at the end of a collection run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub quotes_written: usize,
    pub candle_sets_written: usize,
    pub failed_symbols: usize,
    pub disagreements: usize,
}

/// One collection pass: snapshot current prices, then fetch and persist the
/// historical window for every configured symbol.
pub async fn run_collection(
    engine: &MarketDataEngine,
    sink: &dyn RecordSink,
    config: &Config,
) -> anyhow::Result<RunSummary> {
    let mut summary = RunSummary::default();
    let today = Utc::now().date_naive();

    let prices = engine
        .get_current_prices(&config.symbols, config.prefer.as_deref())
        .await;
    for (symbol, result) in &prices.results {
        match result.payload() {
            Some(validated) => {
                if result.is_degraded() {
                    warn!("{} price is degraded: {:?}", symbol, result.warnings());
                }
                if validated.validation.is_disagreement() {
                    summary.disagreements += 1;
                }
                info!(
                    "{} {} from {}",
                    symbol,
                    validated.value.price,
                    validated.value.source
                );
                let key = SinkKey::quotes(symbol.clone(), today);
                match sink
                    .write(&key, &RecordSet::Quotes(vec![validated.value.clone()]))
                    .await
                {
                    Ok(()) => summary.quotes_written += 1,
                    Err(e) => warn!("{}", e),
                }
            }
            None => {
                summary.failed_symbols += 1;
                if let Some(err) = result.error() {
                    warn!("{} price unavailable: {}", symbol, err);
                }
            }
        }
    }

    let persisted = engine
        .persist_historical(
            sink,
            &config.symbols,
            config.timeframe,
            config.days,
            config.validate,
        )
        .await;
    summary.candle_sets_written = persisted.written;

    for (symbol, result) in &persisted.results.results {
        match result.payload() {
            Some(series) => match &series.validation {
                Validation::Disagreement { discrepancies, .. } => {
                    summary.disagreements += 1;
                    warn!(
                        "{} {} candles: {} bucket(s) disagree across sources",
                        symbol,
                        config.timeframe,
                        discrepancies.len()
                    );
                }
                Validation::Unvalidated { reason } => {
                    info!("{} {} candles unvalidated: {}", symbol, config.timeframe, reason);
                }
                _ => {}
            },
            None => {
                summary.failed_symbols += 1;
                if let Some(err) = result.error() {
                    warn!("{} history unavailable: {}", symbol, err);
                }
            }
        }
    }
    if !persisted.sink_errors.is_empty() {
        warn!("{} record sets failed to persist", persisted.sink_errors.len());
    }

    for health in engine.health_snapshot() {
        info!(
            "Provider {} is {:?} ({} consecutive failures)",
            health.provider, health.state, health.consecutive_failures
        );
    }

    Ok(summary)
}
