use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Serialize;

use super::symbol::Symbol;
use super::types::{EpochMillis, ProviderId};
use crate::errors::MarketDataError;

/// Outcome of one logical request.
///
/// `Degraded` values are real data that is known to be stale; callers that
/// cannot accept that must check for it. Nothing is ever fabricated: when no
/// real data exists the result is `Failed`.
#[derive(Clone, Debug, PartialEq)]
pub enum FetchResult<T> {
    Ok {
        payload: T,
        source: ProviderId,
    },
    Degraded {
        payload: T,
        source: ProviderId,
        warnings: Vec<String>,
    },
    Failed(MarketDataError),
}

impl<T> FetchResult<T> {
    pub fn ok(payload: T, source: ProviderId) -> Self {
        Self::Ok { payload, source }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn payload(&self) -> Option<&T> {
        match self {
            Self::Ok { payload, .. } | Self::Degraded { payload, .. } => Some(payload),
            Self::Failed(_) => None,
        }
    }

    pub fn into_payload(self) -> Option<T> {
        match self {
            Self::Ok { payload, .. } | Self::Degraded { payload, .. } => Some(payload),
            Self::Failed(_) => None,
        }
    }

    pub fn source(&self) -> Option<&ProviderId> {
        match self {
            Self::Ok { source, .. } | Self::Degraded { source, .. } => Some(source),
            Self::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&MarketDataError> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn warnings(&self) -> &[String] {
        match self {
            Self::Degraded { warnings, .. } => warnings,
            _ => &[],
        }
    }

    pub fn map<U, F>(self, f: F) -> FetchResult<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Self::Ok { payload, source } => FetchResult::Ok {
                payload: f(payload),
                source,
            },
            Self::Degraded {
                payload,
                source,
                warnings,
            } => FetchResult::Degraded {
                payload: f(payload),
                source,
                warnings,
            },
            Self::Failed(err) => FetchResult::Failed(err),
        }
    }

    /// Drop the freshness marker; `Degraded` becomes `Ok`.
    pub fn into_result(self) -> Result<T, MarketDataError> {
        match self {
            Self::Ok { payload, .. } | Self::Degraded { payload, .. } => Ok(payload),
            Self::Failed(err) => Err(err),
        }
    }
}

/// One value that disagreed between two providers.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Discrepancy {
    /// Aligned candle open time; `None` for quotes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_time: Option<EpochMillis>,
    pub primary: Decimal,
    pub secondary: Decimal,
    /// `|primary - secondary| / |primary| * 100`
    pub diff_pct: Decimal,
}

/// Cross-source validation annotation. Never changes the payload.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Validation {
    /// Validation was not asked for.
    NotRequested,
    /// Only one source produced usable data.
    Unvalidated { reason: String },
    /// Every compared value was within the threshold.
    Agreed { compared: usize },
    /// At least one compared value exceeded the threshold.
    Disagreement {
        compared: usize,
        discrepancies: Vec<Discrepancy>,
    },
}

impl Validation {
    pub fn unvalidated(reason: impl Into<String>) -> Self {
        Self::Unvalidated {
            reason: reason.into(),
        }
    }

    pub fn is_disagreement(&self) -> bool {
        matches!(self, Self::Disagreement { .. })
    }

    pub fn discrepancies(&self) -> &[Discrepancy] {
        match self {
            Self::Disagreement { discrepancies, .. } => discrepancies,
            _ => &[],
        }
    }

    /// Whether the candle opening at `open_time` was flagged.
    pub fn is_flagged(&self, open_time: EpochMillis) -> bool {
        self.discrepancies()
            .iter()
            .any(|d| d.open_time == Some(open_time))
    }
}

/// Payload together with its validation annotation.
#[derive(Clone, Debug, PartialEq)]
pub struct Validated<T> {
    pub value: T,
    pub validation: Validation,
}

impl<T> Validated<T> {
    pub fn new(value: T, validation: Validation) -> Self {
        Self { value, validation }
    }

    pub fn not_requested(value: T) -> Self {
        Self::new(value, Validation::NotRequested)
    }
}

/// Per-symbol outcomes of a batch call.
///
/// Always holds one entry per requested symbol.
#[derive(Clone, Debug)]
pub struct BatchResult<T> {
    pub results: BTreeMap<Symbol, FetchResult<T>>,
}

impl<T> BatchResult<T> {
    pub fn new() -> Self {
        Self {
            results: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, symbol: Symbol, result: FetchResult<T>) {
        self.results.insert(symbol, result);
    }

    pub fn get(&self, symbol: &Symbol) -> Option<&FetchResult<T>> {
        self.results.get(symbol)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Symbols that produced data (fresh or degraded).
    pub fn succeeded(&self) -> impl Iterator<Item = (&Symbol, &T)> {
        self.results
            .iter()
            .filter_map(|(symbol, result)| result.payload().map(|p| (symbol, p)))
    }

    /// Per-symbol error map.
    pub fn errors(&self) -> BTreeMap<Symbol, MarketDataError> {
        self.results
            .iter()
            .filter_map(|(symbol, result)| result.error().map(|e| (symbol.clone(), e.clone())))
            .collect()
    }
}

impl<T> Default for BatchResult<T> {
    fn default() -> Self {
        Self::new()
    }
}
