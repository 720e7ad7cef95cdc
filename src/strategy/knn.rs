//! Signal Aggregator - nearest-neighbour consensus predictor
//!
//! For a live candle: extract its feature vector, fetch k neighbours from
//! the training grid, simulate each neighbour's outcome on the training
//! candles and emit a position only when every neighbour resolved and a
//! large enough majority agrees on direction.

use tracing::{debug, trace};

use crate::config::{FeatureConfig, GridConfig, KnnConfig, PositionConfig};
use crate::error::Result;
use crate::features::FeatureExtractor;
use crate::neighbours::GridIndex;
use crate::simulator::{OutcomeSimulator, SimulatedPosition, SimulationParams};
use crate::types::{CandleSeries, Direction};

use super::{DecisionMaker, Prediction};

/// Nearest-neighbour decision maker over a fixed training set
#[derive(Debug, Clone)]
pub struct KnnDecisionMaker {
    train: CandleSeries,
    extractor: FeatureExtractor,
    index: GridIndex,
    simulator: OutcomeSimulator,
    knn: KnnConfig,
    /// Geometry of emitted positions
    trading: PositionConfig,
}

impl KnnDecisionMaker {
    /// Extract training features and build the grid once.
    pub fn new(
        train: CandleSeries,
        features: &FeatureConfig,
        grid: &GridConfig,
        knn: KnnConfig,
        simulation: &PositionConfig,
        trading: PositionConfig,
    ) -> Result<Self> {
        crate::config::validate_knn(&knn)?;
        crate::config::validate_position("simulation", simulation)?;
        crate::config::validate_position("trading", &trading)?;

        let extractor = FeatureExtractor::new(features)?;
        let vectors = extractor.extract(train.as_slice())?;
        let index = GridIndex::from_config(&vectors, extractor.dimensions(), grid, &knn)?;

        debug!(
            "kNN model ready: {} training candles, {} indexed vectors, {} buckets",
            train.len(),
            index.len(),
            index.bucket_count()
        );

        Ok(Self {
            train,
            extractor,
            index,
            simulator: OutcomeSimulator::new(SimulationParams::from(simulation)),
            knn,
            trading,
        })
    }

    pub fn index(&self) -> &GridIndex {
        &self.index
    }

    pub fn train(&self) -> &CandleSeries {
        &self.train
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }
}

impl DecisionMaker for KnnDecisionMaker {
    fn predict(&self, candles: &CandleSeries, index: usize) -> Result<Prediction> {
        let live = candles.as_slice();

        // Entry is the next candle's open
        let Some(entry_candle) = live.get(index + 1) else {
            return Ok(Prediction::none());
        };

        let Some(query) = self.extractor.extract_at(live, index)? else {
            return Ok(Prediction::none());
        };

        let neighbours = self.index.query(query.as_slice(), self.knn.k)?;
        if neighbours.is_empty() {
            return Ok(Prediction::none());
        }

        let mean_distance =
            neighbours.iter().map(|n| n.distance).sum::<f64>() / neighbours.len() as f64;
        if mean_distance > self.knn.threshold {
            return Ok(Prediction {
                neighbours,
                mean_distance: Some(mean_distance),
                ..Prediction::none()
            });
        }

        let considered: Vec<Option<SimulatedPosition>> = neighbours
            .iter()
            .map(|n| self.simulator.simulate(n.index, self.train.as_slice()))
            .collect();

        let mut prediction = Prediction {
            predicted: None,
            considered,
            neighbours,
            mean_distance: Some(mean_distance),
        };

        // Any inconclusive neighbour voids the whole candle
        if prediction.considered.iter().any(Option::is_none) {
            return Ok(prediction);
        }

        let longs = prediction
            .considered
            .iter()
            .flatten()
            .filter(|p| p.direction == Direction::Long)
            .count();
        let total = prediction.considered.len();
        let shorts = total - longs;

        if longs == shorts {
            return Ok(prediction);
        }

        let (direction, majority) = if longs > shorts {
            (Direction::Long, longs)
        } else {
            (Direction::Short, shorts)
        };
        let ratio = majority as f64 / total as f64;
        if ratio < self.knn.same_direction_ratio {
            return Ok(prediction);
        }

        trace!(
            "candle {}: {} consensus {:.2} over {} neighbours",
            index,
            direction,
            ratio,
            total
        );

        prediction.predicted = Some(SimulatedPosition {
            open_index: index + 1,
            close_index: None,
            direction,
            entry_price: entry_candle.open,
            exit_price: None,
            stop_loss_pct: self.trading.stop_loss_pct,
            take_profit_pct: self.trading.take_profit_pct,
        });

        Ok(prediction)
    }

    fn name(&self) -> &str {
        "knn"
    }
}
