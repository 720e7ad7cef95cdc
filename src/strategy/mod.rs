//! Strategy Engine - turns candles into position predictions
//!
//! - `DecisionMaker`: the capability the backtest drives
//! - `KnnDecisionMaker`: nearest-neighbour consensus over simulated outcomes
//! - `PrecomputedSignals`: parallel prediction stage replayed in order

pub mod knn;
pub mod precomputed;
pub mod strategy_trait;

pub use knn::KnnDecisionMaker;
pub use precomputed::PrecomputedSignals;
pub use strategy_trait::{DecisionMaker, Prediction};
