//! Configuration management for KnnBot
//!
//! Loads from YAML/TOML files + environment variables via .env

mod types;

pub use types::*;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Error;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub data: DataConfig,
    pub features: FeatureConfig,
    pub grid: GridConfig,
    pub knn: KnnConfig,
    /// Geometry used to classify neighbour outcomes
    pub simulation: PositionConfig,
    /// Geometry of the positions the backtest opens
    pub trading: PositionConfig,
    pub backtest: BacktestConfig,
}

impl AppConfig {
    /// Load configuration from defaults, config files and environment.
    ///
    /// Sources, later ones winning: built-in defaults, `config/default`,
    /// `config/local`, `explicit` (required when given), `KNNBOT__*` env vars.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let mut builder = Config::builder()
            .set_default("data.format", "binance")?
            .set_default("data.train_ratio", 0.8)?
            // Neighbour defaults
            .set_default("knn.k", 5)?
            .set_default("knn.threshold", 1.0)?
            .set_default("knn.same_direction_ratio", 0.75)?
            .set_default("grid.metric", "euclidean")?
            // Position geometry defaults
            .set_default("simulation.stop_loss_pct", 0.1)?
            .set_default("simulation.take_profit_pct", 0.1)?
            .set_default("simulation.max_position_length", 15)?
            .set_default("simulation.min_position_length", 1)?
            .set_default("simulation.max_chop", 1.0)?
            .set_default("trading.stop_loss_pct", 0.1)?
            .set_default("trading.take_profit_pct", 0.1)?
            .set_default("trading.max_position_length", 15)?
            .set_default("trading.min_position_length", 1)?
            .set_default("trading.max_chop", 1.0)?
            // Backtest defaults
            .set_default("backtest.commission_fee", 0.0)?
            .set_default("backtest.max_open_positions", 1)?
            .set_default("backtest.position_size", 100.0)?
            .set_default("backtest.progress_every", 10_000)?
            // Load config files if they exist
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false));

        if let Some(path) = explicit {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config = builder
            // Override with environment variables (KNNBOT__SECTION__KEY)
            .add_source(Environment::with_prefix("KNNBOT").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config
            .validate()
            .context("Configuration rejected")?;

        Ok(app_config)
    }

    /// Reject out-of-range parameters. Nothing is clamped.
    pub fn validate(&self) -> std::result::Result<(), Error> {
        if !(self.data.train_ratio > 0.0 && self.data.train_ratio < 1.0) {
            return Err(Error::invalid_config(format!(
                "data.train_ratio must be in (0, 1), got {}",
                self.data.train_ratio
            )));
        }

        validate_features(&self.features)?;
        validate_knn(&self.knn)?;

        let dims = self.features.kinds.len();
        let widths = &self.grid.bucket_widths;
        if widths.len() > 1 && widths.len() != dims {
            return Err(Error::DimensionMismatch {
                expected: dims,
                found: widths.len(),
            });
        }
        if let Some(w) = widths.iter().find(|w| !(w.is_finite() && **w > 0.0)) {
            return Err(Error::invalid_config(format!(
                "grid.bucket_widths must be positive, got {}",
                w
            )));
        }

        validate_position("simulation", &self.simulation)?;
        validate_position("trading", &self.trading)?;
        validate_backtest(&self.backtest)?;

        Ok(())
    }

    /// Short summary for logging
    pub fn digest(&self) -> String {
        format!(
            "features={} k={} threshold={} ratio={:.2} sim_sl/tp={}/{}% trade_sl/tp={}/{}% max_open={} size={}",
            self.features.kinds.len(),
            self.knn.k,
            self.knn.threshold,
            self.knn.same_direction_ratio,
            self.simulation.stop_loss_pct,
            self.simulation.take_profit_pct,
            self.trading.stop_loss_pct,
            self.trading.take_profit_pct,
            self.backtest.max_open_positions,
            self.backtest.position_size,
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

pub fn validate_features(config: &FeatureConfig) -> std::result::Result<(), Error> {
    if config.kinds.is_empty() {
        return Err(Error::invalid_config("features.kinds must not be empty"));
    }
    for kind in &config.kinds {
        if kind.window() == 0 {
            return Err(Error::invalid_config(format!(
                "feature {:?} needs a window of at least 1",
                kind
            )));
        }
    }
    Ok(())
}

pub fn validate_knn(config: &KnnConfig) -> std::result::Result<(), Error> {
    if config.k == 0 {
        return Err(Error::invalid_config("knn.k must be at least 1"));
    }
    if !(config.threshold.is_finite() && config.threshold > 0.0) {
        return Err(Error::invalid_config(format!(
            "knn.threshold must be positive, got {}",
            config.threshold
        )));
    }
    if !(0.5..=1.0).contains(&config.same_direction_ratio) {
        return Err(Error::invalid_config(format!(
            "knn.same_direction_ratio must be in [0.5, 1.0], got {}",
            config.same_direction_ratio
        )));
    }
    Ok(())
}

pub fn validate_position(section: &str, config: &PositionConfig) -> std::result::Result<(), Error> {
    if !(config.stop_loss_pct.is_finite() && config.stop_loss_pct > 0.0) {
        return Err(Error::invalid_config(format!(
            "{}.stop_loss_pct must be positive",
            section
        )));
    }
    if !(config.take_profit_pct.is_finite() && config.take_profit_pct > 0.0) {
        return Err(Error::invalid_config(format!(
            "{}.take_profit_pct must be positive",
            section
        )));
    }
    if !(config.max_chop.is_finite() && config.max_chop >= 0.0) {
        return Err(Error::invalid_config(format!(
            "{}.max_chop must be non-negative",
            section
        )));
    }
    if config.min_position_length == 0 || config.max_position_length == 0 {
        return Err(Error::invalid_config(format!(
            "{}: position lengths must be at least 1",
            section
        )));
    }
    if config.min_position_length > config.max_position_length {
        return Err(Error::invalid_config(format!(
            "{}.min_position_length exceeds max_position_length",
            section
        )));
    }
    Ok(())
}

pub fn validate_backtest(config: &BacktestConfig) -> std::result::Result<(), Error> {
    if config.max_open_positions == 0 {
        return Err(Error::invalid_config(
            "backtest.max_open_positions must be at least 1",
        ));
    }
    if !(config.position_size.is_finite() && config.position_size > 0.0) {
        return Err(Error::invalid_config("backtest.position_size must be positive"));
    }
    if !(config.commission_fee.is_finite() && config.commission_fee >= 0.0) {
        return Err(Error::invalid_config(
            "backtest.commission_fee must be non-negative",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.knn.k, 5);
        assert_eq!(config.features.kinds.len(), 2);
    }

    #[test]
    fn test_ratio_below_half_rejected() {
        let mut config = AppConfig::default();
        config.knn.same_direction_ratio = 0.4;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_non_positive_threshold_rejected() {
        let mut config = AppConfig::default();
        config.knn.threshold = 0.0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_bucket_width_arity_checked() {
        let mut config = AppConfig::default();
        config.grid.bucket_widths = vec![1.0, 2.0, 3.0];
        assert!(matches!(
            config.validate(),
            Err(Error::DimensionMismatch {
                expected: 2,
                found: 3
            })
        ));

        config.grid.bucket_widths = vec![-1.0];
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_position_lengths_checked() {
        let mut config = AppConfig::default();
        config.simulation.min_position_length = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_widths() {
        let grid = GridConfig::default();
        assert_eq!(grid.resolve_widths(3, 0.5), vec![0.5, 0.5, 0.5]);

        let grid = GridConfig {
            bucket_widths: vec![2.0],
            ..Default::default()
        };
        assert_eq!(grid.resolve_widths(2, 0.5), vec![2.0, 2.0]);
    }

    #[test]
    fn test_train_len() {
        let data = DataConfig::default();
        assert_eq!(data.train_len(100), 80);

        let data = DataConfig {
            train_candles: Some(500),
            ..Default::default()
        };
        assert_eq!(data.train_len(100), 100);
    }

    #[test]
    fn test_max_chop_checked() {
        let mut config = AppConfig::default();
        config.trading.max_chop = -0.5;
        assert!(config.validate().is_err());

        config.trading.max_chop = f64::NAN;
        assert!(config.validate().is_err());

        config.trading.max_chop = 0.0;
        assert!(config.validate().is_ok());
    }
}
