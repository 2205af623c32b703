//! Record sanity checks and cross-source validation.
//!
//! Two separate concerns live here:
//! - [`RecordSanity`] checks one provider's payload on its own (OHLC
//!   invariants, non-negative values, price ceiling). Hard issues reject
//!   the payload; soft issues are only logged.
//! - [`CrossSourceValidator`] compares the primary result against a
//!   secondary one and annotates disagreements. It never changes or drops
//!   the primary values.

use std::collections::HashMap;

use log::{debug, info, warn};
use rust_decimal::Decimal;

use crate::errors::MarketDataError;
use crate::models::{Candle, Discrepancy, EpochMillis, OrderBook, Quote, Timeframe, Validation};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValidationSeverity {
    /// Reject the payload; the controller treats it as a transient failure.
    Hard,
    /// Accept the payload but log a warning.
    Soft,
}

#[derive(Clone, Debug)]
pub struct ValidationIssue {
    pub severity: ValidationSeverity,
    pub message: String,
}

impl ValidationIssue {
    fn hard(message: String) -> Self {
        Self {
            severity: ValidationSeverity::Hard,
            message,
        }
    }

    fn soft(message: String) -> Self {
        Self {
            severity: ValidationSeverity::Soft,
            message,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SanityConfig {
    /// Prices above this are logged as suspicious.
    pub max_price: Option<Decimal>,
    pub warn_on_zero_volume: bool,
}

impl Default for SanityConfig {
    fn default() -> Self {
        Self {
            max_price: Some(Decimal::from(1_000_000_000i64)),
            warn_on_zero_volume: false,
        }
    }
}

/// Payloads that can be sanity checked.
pub trait SanityChecked {
    fn sanity_issues(&self, config: &SanityConfig) -> Vec<ValidationIssue>;
}

fn check_price(label: &str, value: Decimal, config: &SanityConfig, issues: &mut Vec<ValidationIssue>) {
    if value < Decimal::ZERO {
        issues.push(ValidationIssue::hard(format!("Negative {}: {}", label, value)));
    } else if value.is_zero() {
        issues.push(ValidationIssue::soft(format!("Zero {}", label)));
    }
    if let Some(max) = config.max_price {
        if value > max {
            issues.push(ValidationIssue::soft(format!(
                "{} ({}) exceeds max threshold ({})",
                label, value, max
            )));
        }
    }
}

fn check_volume(volume: Decimal, config: &SanityConfig, issues: &mut Vec<ValidationIssue>) {
    if volume < Decimal::ZERO {
        issues.push(ValidationIssue::hard(format!("Negative volume: {}", volume)));
    } else if config.warn_on_zero_volume && volume.is_zero() {
        issues.push(ValidationIssue::soft("Zero volume".to_string()));
    }
}

impl SanityChecked for Candle {
    fn sanity_issues(&self, config: &SanityConfig) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        check_price("open", self.open, config, &mut issues);
        check_price("high", self.high, config, &mut issues);
        check_price("low", self.low, config, &mut issues);
        check_price("close", self.close, config, &mut issues);
        check_volume(self.volume, config, &mut issues);

        if self.high < self.low {
            issues.push(ValidationIssue::hard(format!(
                "High ({}) is less than Low ({}) at {}",
                self.high, self.low, self.open_time
            )));
        } else {
            if self.open < self.low || self.open > self.high {
                issues.push(ValidationIssue::soft(format!(
                    "Open ({}) is outside High/Low range ({}-{}) at {}",
                    self.open, self.low, self.high, self.open_time
                )));
            }
            if self.close < self.low || self.close > self.high {
                issues.push(ValidationIssue::soft(format!(
                    "Close ({}) is outside High/Low range ({}-{}) at {}",
                    self.close, self.low, self.high, self.open_time
                )));
            }
        }

        issues
    }
}

impl SanityChecked for Vec<Candle> {
    fn sanity_issues(&self, config: &SanityConfig) -> Vec<ValidationIssue> {
        self.iter()
            .flat_map(|candle| candle.sanity_issues(config))
            .collect()
    }
}

impl SanityChecked for Quote {
    fn sanity_issues(&self, config: &SanityConfig) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        check_price("price", self.price, config, &mut issues);
        if let Some(volume) = self.volume {
            check_volume(volume, config, &mut issues);
        }
        issues
    }
}

impl SanityChecked for OrderBook {
    fn sanity_issues(&self, config: &SanityConfig) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        for level in self.bids.iter().chain(self.asks.iter()) {
            if level.price <= Decimal::ZERO || level.size < Decimal::ZERO {
                issues.push(ValidationIssue::hard(format!(
                    "Invalid book level {} x {}",
                    level.price, level.size
                )));
            }
        }
        if let (Some(bid), Some(ask)) = (self.best_bid(), self.best_ask()) {
            if bid.price > ask.price {
                issues.push(ValidationIssue::soft(format!(
                    "Crossed book: bid {} > ask {}",
                    bid.price, ask.price
                )));
            }
        }
        if let Some(max) = config.max_price {
            if self.best_ask().map(|a| a.price > max).unwrap_or(false) {
                issues.push(ValidationIssue::soft(format!(
                    "Best ask exceeds max threshold ({})",
                    max
                )));
            }
        }
        issues
    }
}

/// Single-source payload checker.
#[derive(Default)]
pub struct RecordSanity {
    config: SanityConfig,
}

impl RecordSanity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SanityConfig) -> Self {
        Self { config }
    }

    /// Reject payloads with hard issues; log soft ones.
    pub fn check<T: SanityChecked>(&self, provider: &str, payload: &T) -> Result<(), MarketDataError> {
        let issues = payload.sanity_issues(&self.config);

        let hard: Vec<&str> = issues
            .iter()
            .filter(|i| i.severity == ValidationSeverity::Hard)
            .map(|i| i.message.as_str())
            .collect();

        if !hard.is_empty() {
            return Err(MarketDataError::ValidationFailed {
                message: format!("{}: {}", provider, hard.join("; ")),
            });
        }

        for issue in issues.iter().filter(|i| i.severity == ValidationSeverity::Soft) {
            warn!("Sanity warning from {}: {}", provider, issue.message);
        }

        Ok(())
    }
}

/// `|primary - secondary| / |primary| * 100`.
///
/// `None` when the primary is zero and the secondary is not.
pub fn relative_diff_pct(primary: Decimal, secondary: Decimal) -> Option<Decimal> {
    if primary.is_zero() {
        return if secondary.is_zero() {
            Some(Decimal::ZERO)
        } else {
            None
        };
    }
    Some((primary - secondary).abs() / primary.abs() * Decimal::ONE_HUNDRED)
}

/// Compares results from two providers for the same query.
#[derive(Clone, Debug)]
pub struct CrossSourceValidator {
    threshold_pct: Decimal,
}

impl CrossSourceValidator {
    /// `threshold_pct` is inclusive: a difference equal to it still agrees.
    pub fn new(threshold_pct: Decimal) -> Self {
        Self { threshold_pct }
    }

    pub fn threshold_pct(&self) -> Decimal {
        self.threshold_pct
    }

    /// Discrepancy for one pair of values, if they disagree.
    fn compare(
        &self,
        open_time: Option<EpochMillis>,
        primary: Decimal,
        secondary: Decimal,
    ) -> (Decimal, Option<Discrepancy>) {
        match relative_diff_pct(primary, secondary) {
            Some(diff) if diff <= self.threshold_pct => (diff, None),
            Some(diff) => (
                diff,
                Some(Discrepancy {
                    open_time,
                    primary,
                    secondary,
                    diff_pct: diff.round_dp(6),
                }),
            ),
            // Zero primary against a non-zero secondary always disagrees.
            None => (
                Decimal::ONE_HUNDRED,
                Some(Discrepancy {
                    open_time,
                    primary,
                    secondary,
                    diff_pct: Decimal::ONE_HUNDRED,
                }),
            ),
        }
    }

    /// Compare close prices of candles aligned on the timeframe boundary.
    pub fn compare_candles(
        &self,
        primary: &[Candle],
        secondary: &[Candle],
        timeframe: Timeframe,
    ) -> Validation {
        if primary.is_empty() || secondary.is_empty() {
            return Validation::unvalidated("one source returned no candles");
        }

        let reference: HashMap<EpochMillis, Decimal> = secondary
            .iter()
            .map(|c| (timeframe.floor(c.open_time), c.close))
            .collect();

        let mut compared = 0usize;
        let mut total_diff = Decimal::ZERO;
        let mut max_diff = Decimal::ZERO;
        let mut discrepancies = Vec::new();

        for candle in primary {
            let open_time = timeframe.floor(candle.open_time);
            let Some(&secondary_close) = reference.get(&open_time) else {
                continue;
            };

            compared += 1;
            let (diff, discrepancy) = self.compare(Some(open_time), candle.close, secondary_close);
            total_diff += diff;
            max_diff = max_diff.max(diff);
            if let Some(discrepancy) = discrepancy {
                discrepancies.push(discrepancy);
            }
        }

        if compared == 0 {
            return Validation::unvalidated("no overlapping candles");
        }

        let mean_diff = (total_diff / Decimal::from(compared)).round_dp(4);
        let symbol = &primary[0].symbol;
        if discrepancies.is_empty() {
            debug!(
                "Validation {} {}: {} candles compared, mean diff {}%, max diff {}%",
                symbol,
                timeframe,
                compared,
                mean_diff,
                max_diff.round_dp(4)
            );
            Validation::Agreed { compared }
        } else {
            info!(
                "Validation {} {}: {} of {} candles exceed {}% (mean diff {}%, max diff {}%)",
                symbol,
                timeframe,
                discrepancies.len(),
                compared,
                self.threshold_pct,
                mean_diff,
                max_diff.round_dp(4)
            );
            Validation::Disagreement {
                compared,
                discrepancies,
            }
        }
    }

    /// Compare two quotes' prices.
    pub fn compare_quotes(&self, primary: &Quote, secondary: &Quote) -> Validation {
        let (diff, discrepancy) = self.compare(None, primary.price, secondary.price);
        match discrepancy {
            None => Validation::Agreed { compared: 1 },
            Some(discrepancy) => {
                info!(
                    "Validation {}: {} {} vs {} {} differs by {}%",
                    primary.symbol,
                    primary.source,
                    primary.price,
                    secondary.source,
                    secondary.price,
                    diff.round_dp(4)
                );
                Validation::Disagreement {
                    compared: 1,
                    discrepancies: vec![discrepancy],
                }
            }
        }
    }
}
