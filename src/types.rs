//! Core types used throughout KnnBot
//!
//! Defines candles, the ordered candle store and trade direction.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

use crate::error::{Error, Result};

/// Trading direction
///
/// Signed convention: long = +1, short = -1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Long,
    Short,
}

impl Direction {
    /// Signed multiplier applied to percentage offsets
    pub fn sign(&self) -> i8 {
        match self {
            Direction::Long => 1,
            Direction::Short => -1,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "long" | "buy" | "1" => Some(Direction::Long),
            "short" | "sell" | "-1" => Some(Direction::Short),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// Candle field selector (used by moving averages)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandleField {
    Open,
    High,
    Low,
    Close,
    Volume,
}

/// OHLCV candle ("kline")
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time, epoch seconds
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Volume in base currency
    pub volume: f64,
}

impl Candle {
    pub fn new(timestamp: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Read one field
    #[inline]
    pub fn field(&self, field: CandleField) -> f64 {
        match field {
            CandleField::Open => self.open,
            CandleField::High => self.high,
            CandleField::Low => self.low,
            CandleField::Close => self.close,
            CandleField::Volume => self.volume,
        }
    }

    /// (high + low + close) / 3
    #[inline]
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// Raw candle body (close - open)
    #[inline]
    pub fn body(&self) -> f64 {
        self.close - self.open
    }

    /// Check that every field is finite and the wicks enclose the body.
    pub fn validate(&self, index: usize) -> Result<()> {
        let fields = [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
            ("volume", self.volume),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(Error::data_integrity(
                    index,
                    format!("{} is not a finite number ({})", name, value),
                ));
            }
        }
        if self.volume < 0.0 {
            return Err(Error::data_integrity(index, "negative volume"));
        }
        if self.low > self.high {
            return Err(Error::data_integrity(index, "low above high"));
        }
        if self.high < self.open.max(self.close) || self.low > self.open.min(self.close) {
            return Err(Error::data_integrity(
                index,
                "open/close outside the high-low range",
            ));
        }
        Ok(())
    }
}

/// Ordered, validated candle sequence.
///
/// Index within the series is the identity every other component uses;
/// indices are only meaningful within the series they came from.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CandleSeries {
    candles: Vec<Candle>,
}

impl CandleSeries {
    /// Validate and wrap a candle vector. Timestamps must be strictly increasing.
    pub fn new(candles: Vec<Candle>) -> Result<Self> {
        for (i, candle) in candles.iter().enumerate() {
            candle.validate(i)?;
            if i > 0 && candle.timestamp <= candles[i - 1].timestamp {
                return Err(Error::data_integrity(
                    i,
                    format!(
                        "timestamp {} is not after previous {}",
                        candle.timestamp,
                        candles[i - 1].timestamp
                    ),
                ));
            }
        }
        Ok(Self { candles })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.candles.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&Candle> {
        self.candles.get(index)
    }

    pub fn as_slice(&self) -> &[Candle] {
        &self.candles
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Candle> {
        self.candles.iter()
    }

    /// Append a candle, keeping the series ordered and valid.
    pub fn push(&mut self, candle: Candle) -> Result<()> {
        let index = self.candles.len();
        candle.validate(index)?;
        if let Some(last) = self.candles.last() {
            if candle.timestamp <= last.timestamp {
                return Err(Error::data_integrity(index, "timestamp out of order"));
            }
        }
        self.candles.push(candle);
        Ok(())
    }

    /// Copy a sub-range into a new series (indices restart at 0).
    pub fn slice(&self, range: Range<usize>) -> Self {
        let end = range.end.min(self.candles.len());
        let start = range.start.min(end);
        Self {
            candles: self.candles[start..end].to_vec(),
        }
    }

    /// Split into (train, live) at `at`.
    pub fn split_at(&self, at: usize) -> (Self, Self) {
        (self.slice(0..at), self.slice(at..self.candles.len()))
    }
}

impl std::ops::Index<usize> for CandleSeries {
    type Output = Candle;

    fn index(&self, index: usize) -> &Candle {
        &self.candles[index]
    }
}

impl<'a> IntoIterator for &'a CandleSeries {
    type Item = &'a Candle;
    type IntoIter = std::slice::Iter<'a, Candle>;

    fn into_iter(self) -> Self::IntoIter {
        self.candles.iter()
    }
}
