//! Persistence sink interface.
//!
//! The engine hands normalized records to a [`RecordSink`] together with a
//! logical key; the on-disk layout belongs to the sink implementation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;

use crate::models::{Candle, Quote, Symbol, Timeframe};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Candles,
    Quotes,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Candles => write!(f, "candles"),
            Self::Quotes => write!(f, "quotes"),
        }
    }
}

/// Logical location of a record set.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct SinkKey {
    pub symbol: Symbol,
    pub data_type: DataType,
    pub timeframe: Option<Timeframe>,
    pub date: NaiveDate,
}

impl SinkKey {
    pub fn candles(symbol: Symbol, timeframe: Timeframe, date: NaiveDate) -> Self {
        Self {
            symbol,
            data_type: DataType::Candles,
            timeframe: Some(timeframe),
            date,
        }
    }

    pub fn quotes(symbol: Symbol, date: NaiveDate) -> Self {
        Self {
            symbol,
            data_type: DataType::Quotes,
            timeframe: None,
            date,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RecordSet {
    Candles(Vec<Candle>),
    Quotes(Vec<Quote>),
}

impl RecordSet {
    pub fn len(&self) -> usize {
        match self {
            Self::Candles(c) => c.len(),
            Self::Quotes(q) => q.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Sink write failed for {key}: {message}")]
pub struct SinkError {
    pub key: String,
    pub message: String,
}

impl SinkError {
    pub fn new(key: &SinkKey, message: impl Into<String>) -> Self {
        Self {
            key: format!(
                "{}/{}/{}/{}",
                key.symbol,
                key.data_type,
                key.timeframe.map(|t| t.as_str()).unwrap_or("-"),
                key.date
            ),
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Append `records` under `key`.
    async fn write(&self, key: &SinkKey, records: &RecordSet) -> Result<(), SinkError>;
}

/// Sink that keeps everything in memory. Used by tests and dry runs.
#[derive(Default)]
pub struct MemorySink {
    written: Mutex<HashMap<SinkKey, Vec<RecordSet>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record set written under `key`, oldest first.
    pub fn records(&self, key: &SinkKey) -> Vec<RecordSet> {
        self.written
            .lock()
            .map(|w| w.get(key).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn keys(&self) -> Vec<SinkKey> {
        self.written
            .lock()
            .map(|w| w.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn write(&self, key: &SinkKey, records: &RecordSet) -> Result<(), SinkError> {
        let mut written = self
            .written
            .lock()
            .map_err(|_| SinkError::new(key, "memory sink lock poisoned"))?;
        written
            .entry(key.clone())
            .or_default()
            .push(records.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_sink_appends_per_key() {
        let sink = MemorySink::new();
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let key = SinkKey::candles(Symbol::parse("BTC").unwrap(), Timeframe::H1, date);

        sink.write(&key, &RecordSet::Candles(vec![])).await.unwrap();
        sink.write(&key, &RecordSet::Candles(vec![])).await.unwrap();

        assert_eq!(sink.records(&key).len(), 2);
        assert_eq!(sink.keys(), vec![key]);
    }

    #[test]
    fn test_sink_error_names_key() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let key = SinkKey::quotes(Symbol::parse("ETH").unwrap(), date);
        let err = SinkError::new(&key, "disk full");
        assert_eq!(
            err.to_string(),
            "Sink write failed for ETH/quotes/-/2024-03-01: disk full"
        );
    }
}
