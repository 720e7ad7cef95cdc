//! Outcome Simulator - classifies what a position opened at a historical
//! candle would have done
//!
//! At `open_index` four reference prices are derived from the close:
//! long TP/SL and short TP/SL, symmetric around the close. The walk forward
//! latches stops first, then tests take-profits. Both stops latching means
//! the candle is ambiguous and no outcome is produced.

use serde::{Deserialize, Serialize};

use crate::config::PositionConfig;
use crate::types::{Candle, Direction};

/// Parameters shaping neighbour classification
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationParams {
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    /// Forward candles before the outcome is declared inconclusive
    pub max_length: usize,
    /// Resolutions before this forward step are inconclusive
    pub min_length: usize,
}

impl From<&PositionConfig> for SimulationParams {
    fn from(config: &PositionConfig) -> Self {
        Self {
            take_profit_pct: config.take_profit_pct,
            stop_loss_pct: config.stop_loss_pct,
            max_length: config.max_position_length,
            min_length: config.min_position_length,
        }
    }
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self::from(&PositionConfig::default())
    }
}

/// A position with a known (or pending) outcome.
///
/// Produced by the simulator to classify a neighbour, and by the signal
/// aggregator as a prediction the backtest may open.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulatedPosition {
    pub open_index: usize,
    pub close_index: Option<usize>,
    pub direction: Direction,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
}

impl SimulatedPosition {
    /// Absolute stop-loss price: entry offset against the direction
    pub fn stop_loss_price(&self) -> f64 {
        self.entry_price * (1.0 - f64::from(self.direction.sign()) * self.stop_loss_pct / 100.0)
    }

    /// Absolute take-profit price: entry offset with the direction
    pub fn take_profit_price(&self) -> f64 {
        self.entry_price * (1.0 + f64::from(self.direction.sign()) * self.take_profit_pct / 100.0)
    }

    pub fn is_closed(&self) -> bool {
        self.close_index.is_some()
    }
}

/// Replays forward candles from a historical index
#[derive(Debug, Clone, Copy, Default)]
pub struct OutcomeSimulator {
    params: SimulationParams,
}

impl OutcomeSimulator {
    pub fn new(params: SimulationParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SimulationParams {
        &self.params
    }

    /// Outcome of a position opened at the close of `open_index`.
    ///
    /// `None` when both stops latch, when nothing resolves within
    /// `max_length` candles, when history runs out, or when the resolution
    /// comes before `min_length`.
    pub fn simulate(&self, open_index: usize, candles: &[Candle]) -> Option<SimulatedPosition> {
        let entry = candles.get(open_index)?.close;
        let p = &self.params;

        let long = Levels::new(entry, Direction::Long, p);
        let short = Levels::new(entry, Direction::Short, p);

        let mut long_stopped = false;
        let mut short_stopped = false;

        for step in 1..=p.max_length {
            let index = open_index + step;
            let candle = candles.get(index)?;

            // Stops latch before any take-profit is tested
            if candle.low <= long.stop_loss {
                long_stopped = true;
            }
            if candle.high >= short.stop_loss {
                short_stopped = true;
            }
            if long_stopped && short_stopped {
                return None;
            }

            let resolved = if !short_stopped && candle.low <= short.take_profit {
                Some((Direction::Short, short.take_profit))
            } else if !long_stopped && candle.high >= long.take_profit {
                Some((Direction::Long, long.take_profit))
            } else {
                None
            };

            if let Some((direction, exit_price)) = resolved {
                if step < p.min_length {
                    return None;
                }
                return Some(SimulatedPosition {
                    open_index,
                    close_index: Some(index),
                    direction,
                    entry_price: entry,
                    exit_price: Some(exit_price),
                    stop_loss_pct: p.stop_loss_pct,
                    take_profit_pct: p.take_profit_pct,
                });
            }
        }

        None
    }
}

/// Reference prices for one direction
struct Levels {
    take_profit: f64,
    stop_loss: f64,
}

impl Levels {
    fn new(entry: f64, direction: Direction, params: &SimulationParams) -> Self {
        let sign = f64::from(direction.sign());
        Self {
            take_profit: entry * (1.0 + sign * params.take_profit_pct / 100.0),
            stop_loss: entry * (1.0 - sign * params.stop_loss_pct / 100.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(high: f64, low: f64) -> Candle {
        let mid = (high + low) / 2.0;
        Candle::new(0, mid, high, low, mid, 1.0)
    }

    fn sim(tp: f64, sl: f64, max_length: usize) -> OutcomeSimulator {
        OutcomeSimulator::new(SimulationParams {
            take_profit_pct: tp,
            stop_loss_pct: sl,
            max_length,
            min_length: 1,
        })
    }

    fn flat_open() -> Candle {
        Candle::new(0, 100.0, 100.0, 100.0, 100.0, 1.0)
    }

    #[test]
    fn test_rising_series_is_long_win() {
        let candles = vec![flat_open(), c(100.5, 99.95), c(101.5, 100.4)];
        let result = sim(1.0, 1.0, 10).simulate(0, &candles).unwrap();
        assert_eq!(result.direction, Direction::Long);
        assert_eq!(result.close_index, Some(2));
        assert!((result.exit_price.unwrap() - 101.0).abs() < 1e-9);
        assert_eq!(result.entry_price, 100.0);
    }

    #[test]
    fn test_falling_series_is_short_win() {
        let candles = vec![flat_open(), c(100.2, 98.8)];
        let result = sim(1.0, 1.0, 10).simulate(0, &candles).unwrap();
        assert_eq!(result.direction, Direction::Short);
        assert!((result.exit_price.unwrap() - 99.0).abs() < 1e-9);
    }

    #[test]
    fn test_both_stops_in_one_candle_is_ambiguous() {
        // Spans both stops (and both targets) in a single candle
        let candles = vec![flat_open(), c(103.0, 97.0), c(110.0, 100.0)];
        assert!(sim(1.0, 1.0, 10).simulate(0, &candles).is_none());
    }

    #[test]
    fn test_stops_latched_on_different_candles_still_void() {
        // Long stop latches first, short stop later
        let candles = vec![flat_open(), c(100.0, 98.9), c(101.1, 99.5), c(99.0, 90.0)];
        assert!(sim(5.0, 1.0, 10).simulate(0, &candles).is_none());
    }

    #[test]
    fn test_short_target_after_long_stop() {
        // Candle 1 latches the long stop only; the short target comes later
        let candles = vec![flat_open(), c(100.0, 98.95), c(100.0, 97.5)];
        let result = sim(2.0, 1.0, 10).simulate(0, &candles).unwrap();
        assert_eq!(result.direction, Direction::Short);
        assert_eq!(result.close_index, Some(2));
    }

    #[test]
    fn test_quiet_series_is_inconclusive() {
        let candles: Vec<Candle> = (0..30).map(|_| c(100.05, 99.95)).collect();
        assert!(sim(1.0, 1.0, 15).simulate(0, &candles).is_none());
    }

    #[test]
    fn test_running_off_history_is_inconclusive() {
        let candles = vec![flat_open(), c(100.1, 99.9)];
        assert!(sim(1.0, 1.0, 15).simulate(0, &candles).is_none());
        assert!(sim(1.0, 1.0, 15).simulate(5, &candles).is_none());
    }

    #[test]
    fn test_max_length_cuts_walk() {
        let candles = vec![flat_open(), c(100.1, 99.9), c(100.1, 99.9), c(102.0, 100.0)];
        assert!(sim(1.0, 1.0, 2).simulate(0, &candles).is_none());
        assert!(sim(1.0, 1.0, 3).simulate(0, &candles).is_some());
    }

    #[test]
    fn test_min_length_rejects_quick_resolution() {
        let candles = vec![flat_open(), c(102.0, 100.0)];
        let simulator = OutcomeSimulator::new(SimulationParams {
            take_profit_pct: 1.0,
            stop_loss_pct: 1.0,
            max_length: 5,
            min_length: 2,
        });
        assert!(simulator.simulate(0, &candles).is_none());
    }

    #[test]
    fn test_absolute_levels() {
        let long = SimulatedPosition {
            open_index: 0,
            close_index: None,
            direction: Direction::Long,
            entry_price: 200.0,
            exit_price: None,
            stop_loss_pct: 1.0,
            take_profit_pct: 2.0,
        };
        assert!((long.take_profit_price() - 204.0).abs() < 1e-9);
        assert!((long.stop_loss_price() - 198.0).abs() < 1e-9);

        let short = SimulatedPosition {
            direction: Direction::Short,
            ..long
        };
        assert!((short.take_profit_price() - 196.0).abs() < 1e-9);
        assert!((short.stop_loss_price() - 202.0).abs() < 1e-9);
    }
}
