mod config;
mod main_lib;
mod sink;

use config::Config;
use main_lib::{build_engine, init_tracing, run_collection};
use sink::JsonLinesSink;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let config = Config::from_env()?;

    let engine = build_engine(&config)?;
    let sink = JsonLinesSink::new(&config.data_dir);
    tracing::info!(
        "Collecting {} symbols ({} x {} days) into {}",
        config.symbols.len(),
        config.timeframe,
        config.days,
        config.data_dir.display()
    );

    let summary = run_collection(&engine, &sink, &config).await?;
    tracing::info!(
        "Collection finished: {} quotes, {} candle sets, {} failed, {} disagreements",
        summary.quotes_written,
        summary.candle_sets_written,
        summary.failed_symbols,
        summary.disagreements
    );
    Ok(())
}
