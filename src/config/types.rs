//! Configuration section types
//!
//! Each component receives its section by value; there is no process-wide
//! mutable configuration.

use serde::{Deserialize, Serialize};

use crate::features::FeatureKind;
use crate::neighbours::DistanceMetric;
use crate::persistence::CandleFormat;

/// Input data selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Candle CSV file (or directory of CSV files to merge)
    pub path: Option<String>,
    /// Row layout of the CSV source
    pub format: CandleFormat,
    /// Fraction of candles used to build the neighbour index
    pub train_ratio: f64,
    /// Explicit training candle count (overrides `train_ratio`)
    pub train_candles: Option<usize>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            path: None,
            format: CandleFormat::Binance,
            train_ratio: 0.8,
            train_candles: None,
        }
    }
}

impl DataConfig {
    /// Number of training candles for a series of `total` candles
    pub fn train_len(&self, total: usize) -> usize {
        match self.train_candles {
            Some(n) => n.min(total),
            None => ((total as f64) * self.train_ratio).floor() as usize,
        }
    }
}

/// Feature vector layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Ordered feature kinds; the vector has one dimension per entry
    pub kinds: Vec<FeatureKind>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            kinds: vec![FeatureKind::PriceChange, FeatureKind::SmaDiff { window: 5 }],
        }
    }
}

/// Spatial grid over the feature space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Bucket width per dimension. One value is broadcast to every
    /// dimension; empty falls back to `knn.threshold`.
    pub bucket_widths: Vec<f64>,
    /// Distance used to rank candidates
    pub metric: DistanceMetric,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            bucket_widths: Vec::new(),
            metric: DistanceMetric::Euclidean,
        }
    }
}

impl GridConfig {
    /// Resolve the per-dimension widths for a `dims`-dimensional index.
    pub fn resolve_widths(&self, dims: usize, threshold: f64) -> Vec<f64> {
        match self.bucket_widths.len() {
            0 => vec![threshold; dims],
            1 => vec![self.bucket_widths[0]; dims],
            _ => self.bucket_widths.clone(),
        }
    }
}

/// Nearest-neighbour consensus parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnnConfig {
    /// Neighbour count
    pub k: usize,
    /// Maximum acceptable mean neighbour distance
    pub threshold: f64,
    /// Minimum majority share among neighbour outcomes (0.5 - 1.0)
    pub same_direction_ratio: f64,
}

impl Default for KnnConfig {
    fn default() -> Self {
        Self {
            k: 5,
            threshold: 1.0,
            same_direction_ratio: 0.75,
        }
    }
}

/// Stop-loss / take-profit geometry of a position.
///
/// Used twice: once to classify neighbour outcomes (`simulation`) and once
/// for the positions the backtest actually opens (`trading`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionConfig {
    /// Stop-loss distance in percent of entry price
    pub stop_loss_pct: f64,
    /// Take-profit distance in percent of entry price
    pub take_profit_pct: f64,
    /// Forward candles a simulated position may stay open
    pub max_position_length: usize,
    /// Earliest forward candle at which a simulated outcome counts
    pub min_position_length: usize,
    /// Reserved, currently inert
    pub max_chop: f64,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            stop_loss_pct: 0.1,
            take_profit_pct: 0.1,
            max_position_length: 15,
            min_position_length: 1,
            max_chop: 1.0,
        }
    }
}

/// Portfolio-level backtest parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    /// Commission in percent of position size, charged on entry and exit
    pub commission_fee: f64,
    /// Maximum concurrently open positions
    pub max_open_positions: usize,
    /// Notional size of every position
    pub position_size: f64,
    /// Log progress every N candles (0 disables)
    pub progress_every: usize,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            commission_fee: 0.0,
            max_open_positions: 1,
            position_size: 100.0,
            progress_every: 10_000,
        }
    }
}
