//! CSV Persistence Module
//!
//! Loads kline files into candle series, merges per-period exports into one
//! file, and writes backtest trades and reports.

use anyhow::{Context, Result};
use chrono::DateTime;
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::backtesting::BacktestReport;
use crate::error::Error;
use crate::types::{Candle, CandleSeries};

/// Dukascopy timestamp layout, e.g. `01.01.2022 00:15:00.000 GMT+0100`
const DUKASCOPY_TIME_FORMAT: &str = "%d.%m.%Y %H:%M:%S%.f GMT%z";

/// Epoch values at or above these are milliseconds / microseconds
const MILLIS_THRESHOLD: i64 = 100_000_000_000;
const MICROS_THRESHOLD: i64 = 100_000_000_000_000;

/// Source layout of a kline CSV file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandleFormat {
    /// `open_time,open,high,low,close,volume,...` with epoch timestamps
    #[default]
    Binance,
    /// `dd.mm.YYYY HH:MM:SS.fff GMT+hhmm,open,high,low,close,volume`
    Dukascopy,
}

impl std::str::FromStr for CandleFormat {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "binance" => Ok(CandleFormat::Binance),
            "dukascopy" | "swiss" => Ok(CandleFormat::Dukascopy),
            other => Err(Error::invalid_config(format!("unknown candle format '{}'", other))),
        }
    }
}

/// Row written by `write_candles_csv`
#[derive(Debug, Serialize)]
struct CandleRow {
    timestamp: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl From<&Candle> for CandleRow {
    fn from(c: &Candle) -> Self {
        Self {
            timestamp: c.timestamp,
            open: c.open,
            high: c.high,
            low: c.low,
            close: c.close,
            volume: c.volume,
        }
    }
}

/// Parse kline rows from any reader. A leading header row is skipped.
pub fn parse_candles<R: Read>(reader: R, format: CandleFormat) -> crate::error::Result<CandleSeries> {
    let mut csv = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut candles = Vec::new();
    for (row, record) in csv.records().enumerate() {
        let record = record?;
        if row == 0 && is_header(&record) {
            continue;
        }
        if record.iter().all(str::is_empty) {
            continue;
        }
        candles.push(parse_row(&record, candles.len(), format)?);
    }

    CandleSeries::new(candles)
}

/// Load one kline file.
pub fn load_candles(path: impl AsRef<Path>, format: CandleFormat) -> Result<CandleSeries> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let series = parse_candles(file, format)
        .with_context(|| format!("Failed to parse candles from {}", path.display()))?;
    info!("Loaded {} candles from {}", series.len(), path.display());
    Ok(series)
}

/// Load every `*.csv` in `dir` in file-name order and concatenate them.
pub fn merge_csv_dir(dir: impl AsRef<Path>, format: CandleFormat) -> Result<CandleSeries> {
    let dir = dir.as_ref();
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed reading {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().map_or(false, |ext| ext == "csv"))
        .collect();
    files.sort();

    if files.is_empty() {
        warn!("No CSV files found in {}", dir.display());
    }

    let mut merged = CandleSeries::default();
    for path in &files {
        let part = load_candles(path, format)?;
        debug!("Merging {} ({} candles)", path.display(), part.len());
        for candle in part.iter() {
            merged
                .push(*candle)
                .with_context(|| format!("{} overlaps the previous file", path.display()))?;
        }
    }

    info!("Merged {} files into {} candles", files.len(), merged.len());
    Ok(merged)
}

/// Write candles as `timestamp,open,high,low,close,volume` with epoch seconds.
pub fn write_candles_csv(series: &CandleSeries, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let file = create_file(path)?;
    let mut writer = WriterBuilder::new().has_headers(true).from_writer(file);
    for candle in series {
        writer
            .serialize(CandleRow::from(candle))
            .context("Failed to write candle row")?;
    }
    writer.flush().context("Failed to flush candle writer")?;
    info!("Wrote {} candles to {}", series.len(), path.display());
    Ok(())
}

/// Export closed trades to CSV
pub fn export_trades_csv(report: &BacktestReport, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let file = create_file(path)?;
    let mut writer = WriterBuilder::new().has_headers(true).from_writer(file);
    for trade in &report.trades {
        writer
            .serialize(trade)
            .context("Failed to write trade record")?;
    }
    writer.flush().context("Failed to flush trade writer")?;
    info!("Exported {} trades to {}", report.trades.len(), path.display());
    Ok(())
}

/// Write the full report (statistics, trades, open positions) as JSON
pub fn write_report_json(report: &BacktestReport, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let file = create_file(path)?;
    serde_json::to_writer_pretty(file, report)
        .with_context(|| format!("Failed to write report {}", path.display()))?;
    info!("Wrote report to {}", path.display());
    Ok(())
}

fn create_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed creating {}", parent.display()))?;
    }
    File::create(path).with_context(|| format!("Failed to create {}", path.display()))
}

fn is_header(record: &StringRecord) -> bool {
    record
        .get(1)
        .map_or(false, |field| field.parse::<f64>().is_err())
}

fn parse_row(record: &StringRecord, index: usize, format: CandleFormat) -> crate::error::Result<Candle> {
    let timestamp = parse_timestamp(field(record, index, 0, "timestamp")?, index, format)?;

    Ok(Candle::new(
        timestamp,
        number(record, index, 1, "open")?,
        number(record, index, 2, "high")?,
        number(record, index, 3, "low")?,
        number(record, index, 4, "close")?,
        number(record, index, 5, "volume")?,
    ))
}

fn field<'r>(record: &'r StringRecord, index: usize, i: usize, name: &str) -> crate::error::Result<&'r str> {
    record
        .get(i)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::data_integrity(index, format!("missing {} field", name)))
}

fn number(record: &StringRecord, index: usize, i: usize, name: &str) -> crate::error::Result<f64> {
    let raw = field(record, index, i, name)?;
    raw.parse::<f64>()
        .map_err(|_| Error::data_integrity(index, format!("{} '{}' is not a number", name, raw)))
}

fn parse_timestamp(raw: &str, index: usize, format: CandleFormat) -> crate::error::Result<i64> {
    match format {
        CandleFormat::Binance => {
            let value = raw.parse::<i64>().map_err(|_| {
                Error::data_integrity(index, format!("timestamp '{}' is not an integer", raw))
            })?;
            Ok(normalise_epoch(value))
        }
        CandleFormat::Dukascopy => DateTime::parse_from_str(raw, DUKASCOPY_TIME_FORMAT)
            .map(|dt| dt.timestamp())
            .map_err(|e| Error::data_integrity(index, format!("timestamp '{}': {}", raw, e))),
    }
}

/// Epoch seconds from a seconds, milliseconds or microseconds value
fn normalise_epoch(value: i64) -> i64 {
    if value.abs() >= MICROS_THRESHOLD {
        value / 1_000_000
    } else if value.abs() >= MILLIS_THRESHOLD {
        value / 1_000
    } else {
        value
    }
}
