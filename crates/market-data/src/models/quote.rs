use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::symbol::Symbol;

/// Latest price snapshot for a symbol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub symbol: Symbol,

    /// Last traded / mark price
    pub price: Decimal,

    /// 24h change in percent, when the provider reports a reference price
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_pct: Option<Decimal>,

    /// 24h volume, when reported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<Decimal>,

    /// Current hourly funding rate of a perpetual contract
    #[serde(skip_serializing_if = "Option::is_none")]
    pub funding_rate: Option<Decimal>,

    /// Open interest of a perpetual contract, in base units
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_interest: Option<Decimal>,

    /// Provider timestamp of the price
    pub timestamp: DateTime<Utc>,

    /// Source of the quote (HYPERLIQUID, COINBASE, ...)
    pub source: String,
}

impl Quote {
    /// Create a quote with only the required fields.
    pub fn new(symbol: Symbol, price: Decimal, timestamp: DateTime<Utc>, source: String) -> Self {
        Self {
            symbol,
            price,
            change_pct: None,
            volume: None,
            funding_rate: None,
            open_interest: None,
            timestamp,
            source,
        }
    }

    /// Set the change from a reference price (typically the previous day's close).
    ///
    /// A zero reference leaves the change unset.
    pub fn with_reference_price(mut self, reference: Decimal) -> Self {
        self.change_pct = percent_change(reference, self.price);
        self
    }

    pub fn with_volume(mut self, volume: Decimal) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn with_funding_rate(mut self, funding_rate: Decimal) -> Self {
        self.funding_rate = Some(funding_rate);
        self
    }

    pub fn with_open_interest(mut self, open_interest: Decimal) -> Self {
        self.open_interest = Some(open_interest);
        self
    }
}

/// `(to - from) / from * 100`, rounded to 4 decimal places.
pub fn percent_change(from: Decimal, to: Decimal) -> Option<Decimal> {
    if from.is_zero() {
        return None;
    }
    Some(((to - from) / from * Decimal::ONE_HUNDRED).round_dp(4))
}
