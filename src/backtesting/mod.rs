//! Backtesting Module
//!
//! Replays a prediction stream over a candle series:
//! - Capacity-gated position opening
//! - Stop-loss / take-profit tracking against each candle's extremes
//! - Net profit, drawdown, win/loss and profit factor statistics

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use crate::config::{validate_backtest, BacktestConfig};
use crate::error::{Error, Result};
use crate::simulator::SimulatedPosition;
use crate::strategy::DecisionMaker;
use crate::types::{Candle, CandleSeries, Direction};

/// Profit factor reported when there are no losses
pub const PROFIT_FACTOR_SENTINEL: f64 = 1.0e6;

/// Reason for exiting a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "STOP_LOSS"),
            ExitReason::TakeProfit => write!(f, "TAKE_PROFIT"),
        }
    }
}

/// A position the engine has opened and not yet closed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedPosition {
    pub open_index: usize,
    pub open_timestamp: i64,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    /// Absolute stop price
    pub stop_loss_price: f64,
    /// Absolute target price
    pub take_profit_price: f64,
}

impl TrackedPosition {
    /// Open a predicted position against the candle it enters on.
    fn open(predicted: &SimulatedPosition, candles: &[Candle], at: usize) -> Result<Self> {
        let entry_candle = candles.get(predicted.open_index).ok_or_else(|| {
            Error::data_integrity(
                at,
                format!(
                    "prediction opens at {} beyond the last candle {}",
                    predicted.open_index,
                    candles.len().saturating_sub(1)
                ),
            )
        })?;

        if !predicted.entry_price.is_finite() || predicted.entry_price <= 0.0 {
            return Err(Error::data_integrity(
                at,
                format!("prediction has entry price {}", predicted.entry_price),
            ));
        }

        Ok(Self {
            open_index: predicted.open_index,
            open_timestamp: entry_candle.timestamp,
            direction: predicted.direction,
            entry_price: predicted.entry_price,
            stop_loss_pct: predicted.stop_loss_pct,
            take_profit_pct: predicted.take_profit_pct,
            stop_loss_price: predicted.stop_loss_price(),
            take_profit_price: predicted.take_profit_price(),
        })
    }

    /// Exit triggered by `candle`, stop checked before target
    pub fn check_exit(&self, candle: &Candle) -> Option<ExitReason> {
        let (stopped, target_hit) = match self.direction {
            Direction::Long => (
                candle.low <= self.stop_loss_price,
                candle.high >= self.take_profit_price,
            ),
            Direction::Short => (
                candle.high >= self.stop_loss_price,
                candle.low <= self.take_profit_price,
            ),
        };

        if stopped {
            Some(ExitReason::StopLoss)
        } else if target_hit {
            Some(ExitReason::TakeProfit)
        } else {
            None
        }
    }

    /// Terminal transition into a trade record
    fn close(
        self,
        index: usize,
        candle: &Candle,
        reason: ExitReason,
        config: &BacktestConfig,
    ) -> ClosedPosition {
        let (exit_price, pnl) = match reason {
            ExitReason::StopLoss => (
                self.stop_loss_price,
                -config.position_size * self.stop_loss_pct / 100.0,
            ),
            ExitReason::TakeProfit => (
                self.take_profit_price,
                config.position_size * self.take_profit_pct / 100.0,
            ),
        };

        ClosedPosition {
            direction: self.direction,
            open_index: self.open_index,
            close_index: index,
            open_timestamp: self.open_timestamp,
            close_timestamp: candle.timestamp,
            entry_price: self.entry_price,
            exit_price,
            exit_reason: reason,
            pnl,
            fees: 2.0 * config.position_size * config.commission_fee / 100.0,
        }
    }
}

/// Trade record of a closed position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub direction: Direction,
    pub open_index: usize,
    pub close_index: usize,
    pub open_timestamp: i64,
    pub close_timestamp: i64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub exit_reason: ExitReason,
    /// Gross PnL, before fees
    pub pnl: f64,
    pub fees: f64,
}

impl ClosedPosition {
    pub fn is_win(&self) -> bool {
        self.exit_reason == ExitReason::TakeProfit
    }

    pub fn net_pnl(&self) -> f64 {
        self.pnl - self.fees
    }
}

/// Aggregate backtest statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BacktestStatistics {
    pub tot_positions: usize,
    pub long_positions: usize,
    pub short_positions: usize,
    pub winning_positions: usize,
    pub losing_positions: usize,
    /// Positions never closed before the data ran out
    pub open_at_end: usize,
    pub gross_profit: f64,
    /// Sum of losses, as a positive amount
    pub gross_loss: f64,
    pub total_fees: f64,
    pub net_profit: f64,
    /// Net profit after every processed candle
    pub net_profit_series: Vec<f64>,
    pub peak_net_profit: f64,
    /// Worst decline from the running peak (non-positive)
    pub max_drawdown: f64,
    pub profit_factor: f64,
    pub win_rate: f64,
}

impl BacktestStatistics {
    fn record_open(&mut self, direction: Direction) {
        self.tot_positions += 1;
        match direction {
            Direction::Long => self.long_positions += 1,
            Direction::Short => self.short_positions += 1,
        }
    }

    fn record_close(&mut self, trade: &ClosedPosition) {
        if trade.is_win() {
            self.winning_positions += 1;
            self.gross_profit += trade.pnl;
        } else {
            self.losing_positions += 1;
            self.gross_loss += trade.pnl.abs();
        }
        self.total_fees += trade.fees;
        self.net_profit += trade.net_pnl();
    }

    /// Append the current net profit and update peak and drawdown
    fn mark(&mut self) {
        self.net_profit_series.push(self.net_profit);
        self.peak_net_profit = self.peak_net_profit.max(self.net_profit);
        self.max_drawdown = self.max_drawdown.min(self.net_profit - self.peak_net_profit);
    }

    fn finalize(&mut self, open_at_end: usize) {
        self.open_at_end = open_at_end;
        self.profit_factor = if self.gross_loss == 0.0 {
            PROFIT_FACTOR_SENTINEL
        } else {
            (self.gross_profit / self.gross_loss).abs()
        };
        let closed = self.winning_positions + self.losing_positions;
        self.win_rate = if closed > 0 {
            self.winning_positions as f64 / closed as f64
        } else {
            0.0
        };
    }
}

impl fmt::Display for BacktestStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Net profit:      {:.4}", self.net_profit)?;
        writeln!(f, "Gross profit:    {:.4}", self.gross_profit)?;
        writeln!(f, "Gross loss:      {:.4}", self.gross_loss)?;
        writeln!(f, "Fees:            {:.4}", self.total_fees)?;
        if self.profit_factor >= PROFIT_FACTOR_SENTINEL {
            writeln!(f, "Profit factor:   n/a (no losses)")?;
        } else {
            writeln!(f, "Profit factor:   {:.3}", self.profit_factor)?;
        }
        writeln!(f, "Max drawdown:    {:.4}", self.max_drawdown)?;
        writeln!(
            f,
            "Positions:       {} ({} long / {} short)",
            self.tot_positions, self.long_positions, self.short_positions
        )?;
        writeln!(
            f,
            "Closed:          {} won / {} lost ({:.1}% win rate)",
            self.winning_positions,
            self.losing_positions,
            self.win_rate * 100.0
        )?;
        write!(f, "Open at end:     {}", self.open_at_end)
    }
}

/// Everything a backtest run produces
#[derive(Debug, Clone, Default, Serialize)]
pub struct BacktestReport {
    pub strategy: String,
    pub statistics: BacktestStatistics,
    pub trades: Vec<ClosedPosition>,
    pub open_positions: Vec<TrackedPosition>,
}

/// Sequential backtest loop
#[derive(Debug, Clone, Copy)]
pub struct BacktestEngine {
    config: BacktestConfig,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Result<Self> {
        validate_backtest(&config)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Run `source` over `candles` in order.
    pub fn run<D>(&self, candles: &CandleSeries, source: &D) -> Result<BacktestReport>
    where
        D: DecisionMaker + ?Sized,
    {
        let data = candles.as_slice();
        let mut stats = BacktestStatistics::default();
        let mut open: Vec<TrackedPosition> = Vec::new();
        let mut trades: Vec<ClosedPosition> = Vec::new();

        info!(
            "Backtesting {} on {} candles (max {} open, size {})",
            source.name(),
            data.len(),
            self.config.max_open_positions,
            self.config.position_size
        );

        for (index, candle) in data.iter().enumerate() {
            // Capacity gate: no prediction is requested while full
            if open.len() < self.config.max_open_positions {
                let prediction = source.predict(candles, index)?;
                if let Some(predicted) = prediction.predicted {
                    let position = TrackedPosition::open(&predicted, data, index)?;
                    debug!(
                        "candle {}: open {} at {:.5} (sl {:.5}, tp {:.5})",
                        index,
                        position.direction,
                        position.entry_price,
                        position.stop_loss_price,
                        position.take_profit_price
                    );
                    stats.record_open(position.direction);
                    open.push(position);
                }
            }

            let mut still_open = Vec::with_capacity(open.len());
            for position in open.drain(..) {
                let exit = if position.open_index <= index {
                    position.check_exit(candle)
                } else {
                    None
                };
                match exit {
                    Some(reason) => {
                        let trade = position.close(index, candle, reason, &self.config);
                        debug!(
                            "candle {}: {} closed by {} pnl {:.4}",
                            index,
                            trade.direction,
                            trade.exit_reason,
                            trade.pnl
                        );
                        stats.record_close(&trade);
                        trades.push(trade);
                    }
                    None => still_open.push(position),
                }
            }
            open = still_open;

            stats.mark();

            if self.config.progress_every > 0 && (index + 1) % self.config.progress_every == 0 {
                info!(
                    "Progress {}/{}: {} positions, net profit {:.4}",
                    index + 1,
                    data.len(),
                    stats.tot_positions,
                    stats.net_profit
                );
            }
        }

        stats.finalize(open.len());

        info!(
            "Backtest done: {} positions, {} closed, net profit {:.4}, drawdown {:.4}",
            stats.tot_positions,
            trades.len(),
            stats.net_profit,
            stats.max_drawdown
        );

        Ok(BacktestReport {
            strategy: source.name().to_string(),
            statistics: stats,
            trades,
            open_positions: open,
        })
    }
}
