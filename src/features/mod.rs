//! Feature Engine - per-candle feature vectors for neighbour search
//!
//! Maps each candle index to a fixed-arity numeric vector:
//! - Price change (raw candle body, close - open)
//! - SMA difference (SMA of close - SMA of open, a proxy for local slope)
//! - Volume
//! - Typical-price SMA
//! - CCI (commodity channel index on typical price)
//!
//! A vector is all-or-nothing: if any component lacks history the whole
//! vector is `None`. Definedness is monotonic in the index.

use serde::{Deserialize, Serialize};

use crate::config::{validate_features, FeatureConfig};
use crate::error::{Error, Result};
use crate::types::{Candle, CandleField};

/// CCI scaling constant (Lambert)
const CCI_CONSTANT: f64 = 0.015;

/// One dimension of the feature vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureKind {
    /// close - open
    PriceChange,
    /// SMA(close, window) - SMA(open, window)
    SmaDiff { window: usize },
    /// Raw volume
    Volume,
    /// SMA of (high + low + close) / 3
    TypicalPriceSma { window: usize },
    /// Commodity channel index
    Cci { window: usize },
}

impl FeatureKind {
    /// Candles of history this feature needs (1 = current candle only)
    pub fn window(&self) -> usize {
        match self {
            FeatureKind::PriceChange | FeatureKind::Volume => 1,
            FeatureKind::SmaDiff { window }
            | FeatureKind::TypicalPriceSma { window }
            | FeatureKind::Cci { window } => *window,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FeatureKind::PriceChange => "price_change",
            FeatureKind::SmaDiff { .. } => "sma_diff",
            FeatureKind::Volume => "volume",
            FeatureKind::TypicalPriceSma { .. } => "typical_price_sma",
            FeatureKind::Cci { .. } => "cci",
        }
    }

    /// Value at `index`. Caller guarantees the window is full.
    fn compute(&self, candles: &[Candle], index: usize) -> Option<f64> {
        let candle = &candles[index];
        match *self {
            FeatureKind::PriceChange => Some(candle.body()),
            FeatureKind::Volume => Some(candle.volume),
            FeatureKind::SmaDiff { window } => {
                let close = sma(candles, index, window, CandleField::Close)?;
                let open = sma(candles, index, window, CandleField::Open)?;
                Some(close - open)
            }
            FeatureKind::TypicalPriceSma { window } => {
                sma_by(candles, index, window, Candle::typical_price)
            }
            FeatureKind::Cci { window } => cci(candles, index, window),
        }
    }
}

/// Derived feature vector of one candle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(Vec<f64>);

impl FeatureVector {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    #[inline]
    pub fn dimensions(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }
}

impl From<Vec<f64>> for FeatureVector {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

/// Simple moving average of `field` over the `window` candles ending at `index`.
///
/// `None` before the window is full.
pub fn sma(candles: &[Candle], index: usize, window: usize, field: CandleField) -> Option<f64> {
    sma_by(candles, index, window, |c| c.field(field))
}

/// Simple moving average of an arbitrary candle projection
pub fn sma_by<F>(candles: &[Candle], index: usize, window: usize, value: F) -> Option<f64>
where
    F: Fn(&Candle) -> f64,
{
    if window == 0 || index >= candles.len() || index + 1 < window {
        return None;
    }
    let start = index + 1 - window;
    let sum: f64 = candles[start..=index].iter().map(value).sum();
    Some(sum / window as f64)
}

fn cci(candles: &[Candle], index: usize, window: usize) -> Option<f64> {
    let mean = sma_by(candles, index, window, Candle::typical_price)?;
    let start = index + 1 - window;
    let mean_dev = candles[start..=index]
        .iter()
        .map(|c| (c.typical_price() - mean).abs())
        .sum::<f64>()
        / window as f64;

    if mean_dev == 0.0 {
        // No dispersion: price sits exactly on its mean
        return Some(0.0);
    }
    Some((candles[index].typical_price() - mean) / (CCI_CONSTANT * mean_dev))
}

/// Feature extractor for a fixed vector layout
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    kinds: Vec<FeatureKind>,
    /// Largest window among `kinds`
    max_window: usize,
}

impl FeatureExtractor {
    pub fn new(config: &FeatureConfig) -> Result<Self> {
        validate_features(config)?;
        let max_window = config.kinds.iter().map(|k| k.window()).max().unwrap_or(1);
        Ok(Self {
            kinds: config.kinds.clone(),
            max_window,
        })
    }

    /// Vector arity
    pub fn dimensions(&self) -> usize {
        self.kinds.len()
    }

    pub fn kinds(&self) -> &[FeatureKind] {
        &self.kinds
    }

    /// First index with a defined vector
    pub fn warmup(&self) -> usize {
        self.max_window - 1
    }

    /// One vector per candle, same length and order as the input.
    pub fn extract(&self, candles: &[Candle]) -> Result<Vec<Option<FeatureVector>>> {
        for (i, candle) in candles.iter().enumerate() {
            candle.validate(i)?;
        }
        Ok((0..candles.len())
            .map(|i| self.compute_unchecked(candles, i))
            .collect())
    }

    /// Vector for a single index (only the candles in its window are read).
    pub fn extract_at(&self, candles: &[Candle], index: usize) -> Result<Option<FeatureVector>> {
        if index >= candles.len() {
            return Err(Error::data_integrity(
                index,
                format!("index out of range for {} candles", candles.len()),
            ));
        }
        if index < self.warmup() {
            return Ok(None);
        }
        let start = index + 1 - self.max_window;
        for (offset, candle) in candles[start..=index].iter().enumerate() {
            candle.validate(start + offset)?;
        }
        Ok(self.compute_unchecked(candles, index))
    }

    fn compute_unchecked(&self, candles: &[Candle], index: usize) -> Option<FeatureVector> {
        if index < self.warmup() {
            return None;
        }
        let values: Option<Vec<f64>> = self
            .kinds
            .iter()
            .map(|kind| kind.compute(candles, index))
            .collect();
        values.map(FeatureVector)
    }
}
