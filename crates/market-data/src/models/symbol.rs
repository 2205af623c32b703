use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::MarketDataError;

/// Quote currencies stripped from pair notation (`BTC/USD`, `ETH-USDC`).
const QUOTE_SUFFIXES: &[&str] = &["USD", "USDC", "USDT"];

/// Canonical asset identifier.
///
/// Always upper-case with no quote currency, so `btc`, `BTC/USD` and
/// `BTC-USD` all normalize to `BTC` before any cache lookup or provider call.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(Arc<str>);

impl Symbol {
    /// Normalize a user-supplied symbol.
    pub fn parse(raw: &str) -> Result<Self, MarketDataError> {
        let upper = raw.trim().to_ascii_uppercase();

        let base = match upper.split_once(|c: char| c == '/' || c == '-') {
            Some((base, quote)) if QUOTE_SUFFIXES.contains(&quote) => base,
            Some(_) => return Err(MarketDataError::InvalidSymbol(raw.to_string())),
            None => upper.as_str(),
        };

        if base.is_empty() || !base.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(MarketDataError::InvalidSymbol(raw.to_string()));
        }

        Ok(Self(Arc::from(base)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Symbol {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Symbol {
    type Error = MarketDataError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0.to_string()
    }
}
