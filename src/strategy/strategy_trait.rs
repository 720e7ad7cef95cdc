//! Strategy Trait - the seam between predictors and the backtest engine

use serde::Serialize;

use crate::error::Result;
use crate::neighbours::Neighbour;
use crate::simulator::SimulatedPosition;
use crate::types::CandleSeries;

/// Output of one prediction request
#[derive(Debug, Clone, Default, Serialize)]
pub struct Prediction {
    /// Position to open at the next candle, if any
    pub predicted: Option<SimulatedPosition>,
    /// Simulated outcome of every neighbour, in neighbour order
    pub considered: Vec<Option<SimulatedPosition>>,
    /// Neighbours the decision was based on
    pub neighbours: Vec<Neighbour>,
    pub mean_distance: Option<f64>,
}

impl Prediction {
    /// No position and nothing considered
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_some(&self) -> bool {
        self.predicted.is_some()
    }
}

/// Any predictor the backtest can drive.
///
/// `predict` answers for the candle at `index` using only candles up to and
/// including `index + 1` (the entry candle). Insufficient data is a
/// `Prediction` with `predicted: None`; errors are fatal.
pub trait DecisionMaker: Send + Sync {
    fn predict(&self, candles: &CandleSeries, index: usize) -> Result<Prediction>;

    /// Label used in logs and reports
    fn name(&self) -> &str {
        "decision_maker"
    }
}

impl<T: DecisionMaker + ?Sized> DecisionMaker for &T {
    fn predict(&self, candles: &CandleSeries, index: usize) -> Result<Prediction> {
        (**self).predict(candles, index)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<T: DecisionMaker + ?Sized> DecisionMaker for Box<T> {
    fn predict(&self, candles: &CandleSeries, index: usize) -> Result<Prediction> {
        (**self).predict(candles, index)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
