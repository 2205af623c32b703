//! JSON-lines record sink.
//!
//! Layout: `{root}/{symbol}/{data_type}/{timeframe}/{date}.jsonl`, one
//! record per line. Quotes have no timeframe and use `snapshot` instead.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use masterdata_market_data::{RecordSet, RecordSink, SinkError, SinkKey};
use serde::Serialize;
use tokio::io::AsyncWriteExt;

pub struct JsonLinesSink {
    root: PathBuf,
}

impl JsonLinesSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, key: &SinkKey) -> PathBuf {
        self.root
            .join(key.symbol.as_str())
            .join(key.data_type.to_string())
            .join(key.timeframe.map(|t| t.as_str()).unwrap_or("snapshot"))
            .join(format!("{}.jsonl", key.date))
    }
}

fn encode_lines<T: Serialize>(records: &[T]) -> Result<Vec<u8>, serde_json::Error> {
    let mut buf = Vec::new();
    for record in records {
        serde_json::to_writer(&mut buf, record)?;
        buf.push(b'\n');
    }
    Ok(buf)
}

async fn append(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await
}

#[async_trait]
impl RecordSink for JsonLinesSink {
    async fn write(&self, key: &SinkKey, records: &RecordSet) -> Result<(), SinkError> {
        if records.is_empty() {
            return Ok(());
        }

        let bytes = match records {
            RecordSet::Candles(candles) => encode_lines(candles),
            RecordSet::Quotes(quotes) => encode_lines(quotes),
        }
        .map_err(|e| SinkError::new(key, e.to_string()))?;

        let path = self.path_for(key);
        append(&path, &bytes)
            .await
            .map_err(|e| SinkError::new(key, format!("{}: {}", path.display(), e)))?;

        tracing::debug!("Wrote {} records to {}", records.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use masterdata_market_data::{Candle, Symbol, Timeframe};
    use rust_decimal_macros::dec;

    fn candle(open_time: i64) -> Candle {
        let p = dec!(100);
        Candle::new(
            Symbol::parse("BTC").unwrap(),
            Timeframe::H1,
            open_time,
            p,
            p,
            p,
            p,
            dec!(1),
        )
    }

    #[tokio::test]
    async fn test_appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonLinesSink::new(dir.path());
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let key = SinkKey::candles(Symbol::parse("BTC").unwrap(), Timeframe::H1, date);

        sink.write(&key, &RecordSet::Candles(vec![candle(0), candle(3_600_000)]))
            .await
            .unwrap();
        sink.write(&key, &RecordSet::Candles(vec![candle(7_200_000)]))
            .await
            .unwrap();

        let path = sink.path_for(&key);
        assert!(path.ends_with("BTC/candles/1h/2024-03-01.jsonl"));
        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["openTime"], 0);
    }

    #[tokio::test]
    async fn test_quotes_use_snapshot_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonLinesSink::new(dir.path());
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let key = SinkKey::quotes(Symbol::parse("ETH").unwrap(), date);

        assert!(sink
            .path_for(&key)
            .ends_with("ETH/quotes/snapshot/2024-03-01.jsonl"));

        sink.write(&key, &RecordSet::Quotes(vec![])).await.unwrap();
        assert!(!sink.path_for(&key).exists());
    }
}
