//! Parallel prediction stage
//!
//! Predictions for different candles are independent of each other, so they
//! can be computed up front across threads against the shared read-only
//! index. The backtest still consumes them strictly in order.

use rayon::prelude::*;
use tracing::info;

use crate::error::{Error, Result};
use crate::types::CandleSeries;

use super::{DecisionMaker, Prediction};

/// Cached predictions for every index of one candle series
#[derive(Debug, Clone)]
pub struct PrecomputedSignals {
    name: String,
    predictions: Vec<Prediction>,
}

impl PrecomputedSignals {
    /// Evaluate `source` for every index of `candles` in parallel.
    pub fn compute<D>(source: &D, candles: &CandleSeries) -> Result<Self>
    where
        D: DecisionMaker + ?Sized,
    {
        let predictions = (0..candles.len())
            .into_par_iter()
            .map(|index| source.predict(candles, index))
            .collect::<Result<Vec<_>>>()?;

        let emitted = predictions.iter().filter(|p| p.is_some()).count();
        info!(
            "Precomputed {} predictions ({} positions) with {}",
            predictions.len(),
            emitted,
            source.name()
        );

        Ok(Self {
            name: format!("{}+precomputed", source.name()),
            predictions,
        })
    }

    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }

    pub fn predictions(&self) -> &[Prediction] {
        &self.predictions
    }
}

impl DecisionMaker for PrecomputedSignals {
    fn predict(&self, candles: &CandleSeries, index: usize) -> Result<Prediction> {
        if candles.len() != self.predictions.len() {
            return Err(Error::data_integrity(
                index,
                format!(
                    "signals were computed for {} candles, series has {}",
                    self.predictions.len(),
                    candles.len()
                ),
            ));
        }
        Ok(self.predictions.get(index).cloned().unwrap_or_default())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
