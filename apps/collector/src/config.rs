use std::path::PathBuf;

use anyhow::Context;
use masterdata_market_data::{EngineConfig, Symbol, Timeframe};

const DEFAULT_SYMBOLS: &[&str] = &["BTC", "ETH", "SOL"];

/// Collector settings, read from `MDC_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub engine: EngineConfig,
    pub symbols: Vec<Symbol>,
    pub timeframe: Timeframe,
    pub days: u32,
    pub validate: bool,
    pub data_dir: PathBuf,
    /// Use the Hyperliquid testnet endpoint.
    pub testnet: bool,
    /// Provider to prefer for current prices.
    pub prefer: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let engine = EngineConfig::from_lookup(&lookup).context("invalid engine configuration")?;

        let symbols = match lookup("MDC_SYMBOLS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(Symbol::parse)
                .collect::<Result<Vec<_>, _>>()
                .context("invalid MDC_SYMBOLS")?,
            None => DEFAULT_SYMBOLS
                .iter()
                .map(|s| Symbol::parse(s))
                .collect::<Result<Vec<_>, _>>()?,
        };
        if symbols.is_empty() {
            anyhow::bail!("MDC_SYMBOLS names no symbols");
        }

        let timeframe = lookup("MDC_TIMEFRAME")
            .map(|raw| raw.parse::<Timeframe>())
            .transpose()
            .context("invalid MDC_TIMEFRAME")?
            .unwrap_or(Timeframe::H1);

        let days = lookup("MDC_DAYS")
            .map(|raw| raw.trim().parse::<u32>())
            .transpose()
            .context("invalid MDC_DAYS")?
            .unwrap_or(7);

        let validate = lookup("MDC_VALIDATE")
            .map(|raw| parse_flag(&raw))
            .transpose()
            .context("invalid MDC_VALIDATE")?
            .unwrap_or(true);

        let testnet = lookup("MDC_TESTNET")
            .map(|raw| parse_flag(&raw))
            .transpose()
            .context("invalid MDC_TESTNET")?
            .unwrap_or(false);

        Ok(Self {
            engine,
            symbols,
            timeframe,
            days,
            validate,
            data_dir: lookup("MDC_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data")),
            testnet,
            prefer: lookup("MDC_PREFER_PROVIDER").filter(|p| !p.trim().is_empty()),
        })
    }
}

fn parse_flag(raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => anyhow::bail!("expected a boolean, got {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.symbols.len(), 3);
        assert_eq!(config.timeframe, Timeframe::H1);
        assert_eq!(config.days, 7);
        assert!(config.validate);
        assert!(!config.testnet);
        assert_eq!(config.engine, EngineConfig::default());
    }

    #[test]
    fn test_symbols_are_normalized() {
        let config =
            Config::from_lookup(lookup(&[("MDC_SYMBOLS", "btc-usd, eth ,"), ("MDC_TIMEFRAME", "4h")]))
                .unwrap();
        let names: Vec<&str> = config.symbols.iter().map(|s| s.as_str()).collect();
        assert_eq!(names, vec!["BTC", "ETH"]);
        assert_eq!(config.timeframe, Timeframe::H4);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Config::from_lookup(lookup(&[("MDC_DAYS", "soon")])).is_err());
        assert!(Config::from_lookup(lookup(&[("MDC_VALIDATE", "maybe")])).is_err());
        assert!(Config::from_lookup(lookup(&[("MDC_WORKER_POOL_SIZE", "0")])).is_err());
    }
}
