//! Bar data loading
//!
//! Reads OHLCV bars from CSV files with a header row:
//! `datetime,open,high,low,close,volume`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::{info, warn};

use crate::Bar;

fn parse_datetime(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // Without timezone, assume UTC
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
        })
        .or_else(|_| {
            // Epoch milliseconds, as exchanges export them
            raw.parse::<i64>()
                .ok()
                .and_then(DateTime::<Utc>::from_timestamp_millis)
                .context("not an epoch timestamp")
        })
        .with_context(|| format!("Failed to parse datetime: {}", raw))
}

fn parse_field(record: &csv::StringRecord, idx: usize, name: &str) -> Result<f64> {
    record
        .get(idx)
        .with_context(|| format!("Missing {} column", name))?
        .trim()
        .parse()
        .with_context(|| format!("Failed to parse {}", name))
}

/// Load OHLCV bars from a CSV file.
///
/// Rows that fail bar validation are skipped with a warning; malformed rows
/// are an error.
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Bar>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    let mut bars = Vec::new();
    let mut skipped = 0usize;

    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;

        let datetime = parse_datetime(record.get(0).context("Missing datetime column")?.trim())?;
        let bar = Bar {
            datetime,
            open: parse_field(&record, 1, "open")?,
            high: parse_field(&record, 2, "high")?,
            low: parse_field(&record, 3, "low")?,
            close: parse_field(&record, 4, "close")?,
            volume: parse_field(&record, 5, "volume")?,
        };

        if let Err(e) = bar.validate() {
            warn!("Skipping row {}: {}", row_idx + 1, e);
            skipped += 1;
            continue;
        }
        bars.push(bar);
    }

    if bars.is_empty() {
        anyhow::bail!("No valid bars in {}", path.display());
    }

    info!(
        "Loaded {} bars from {} ({} skipped)",
        bars.len(),
        path.display(),
        skipped
    );
    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn temp_csv(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "trailing_guard_{}_{}.csv",
            name,
            std::process::id()
        ));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_csv_formats() {
        let path = temp_csv(
            "formats",
            "datetime,open,high,low,close,volume\n\
             2024-01-01T00:00:00Z,100,101,99,100.5,10\n\
             2024-01-01 00:05:00,100.5,102,100,101.5,12\n\
             1704068100000,101.5,103,101,102.5,8\n",
        );
        let bars = load_csv(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].high, 101.0);
        assert_eq!(bars[2].datetime.timestamp_millis(), 1_704_068_100_000);
    }

    #[test]
    fn test_invalid_rows_are_skipped() {
        let path = temp_csv(
            "skip",
            "datetime,open,high,low,close,volume\n\
             2024-01-01T00:00:00Z,100,99,101,100,10\n\
             2024-01-01T00:05:00Z,100,101,99,100,10\n",
        );
        let bars = load_csv(&path).unwrap();
        fs::remove_file(&path).ok();
        assert_eq!(bars.len(), 1);
    }

    #[test]
    fn test_malformed_row_is_error() {
        let path = temp_csv(
            "malformed",
            "datetime,open,high,low,close,volume\n2024-01-01T00:00:00Z,abc,1,1,1,1\n",
        );
        let result = load_csv(&path);
        fs::remove_file(&path).ok();
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(load_csv("/nonexistent/bars.csv").is_err());
    }
}
