//! KnnBot Library
//!
//! Nearest-neighbour kline prediction and backtesting engine

pub mod backtesting;
pub mod config;
pub mod error;
pub mod features;
pub mod neighbours;
pub mod persistence;
pub mod simulator;
pub mod strategy;
pub mod types;

pub use error::{Error, Result};
