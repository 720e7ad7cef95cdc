//! KnnBot - nearest-neighbour kline backtester
//!
//! Usage:
//!   knnbot backtest --candles data/BTCUSDT-1m-2023.csv
//!   knnbot merge --dir klines/ --out data/merged.csv

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::info;

use knnbot::backtesting::BacktestEngine;
use knnbot::config::AppConfig;
use knnbot::persistence::{self, CandleFormat};
use knnbot::strategy::{KnnDecisionMaker, PrecomputedSignals};
use knnbot::types::CandleSeries;

#[derive(Parser)]
#[command(name = "knnbot", about = "Nearest-neighbour kline prediction backtester")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Build the index on the training split and backtest the rest
    Backtest {
        /// Extra configuration file layered over config/default and config/local
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Candle CSV file or directory of CSV files (overrides data.path)
        #[arg(long)]
        candles: Option<PathBuf>,
        /// binance | dukascopy (overrides data.format)
        #[arg(short, long)]
        format: Option<CandleFormat>,
        /// Training candle count (overrides data.train_ratio)
        #[arg(short, long)]
        train: Option<usize>,
        /// Compute predictions across threads before replaying them
        #[arg(long)]
        parallel: bool,
        /// Write closed trades to this CSV file
        #[arg(long)]
        trades_out: Option<PathBuf>,
        /// Write the full report to this JSON file
        #[arg(long)]
        report_out: Option<PathBuf>,
    },
    /// Merge a directory of kline CSV files into one file
    Merge {
        #[arg(short, long)]
        dir: PathBuf,
        #[arg(short, long)]
        out: PathBuf,
        #[arg(short, long, default_value = "binance")]
        format: CandleFormat,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    match cli.command {
        Commands::Backtest {
            config,
            candles,
            format,
            train,
            parallel,
            trades_out,
            report_out,
        } => {
            let mut app = AppConfig::load(config.as_deref())?;
            if let Some(format) = format {
                app.data.format = format;
            }
            if let Some(train) = train {
                app.data.train_candles = Some(train);
            }
            let source = match candles {
                Some(path) => path,
                None => match &app.data.path {
                    Some(path) => PathBuf::from(path),
                    None => bail!("No candle data given: pass --candles or set data.path"),
                },
            };
            run_backtest(
                &app,
                &source,
                parallel,
                trades_out.as_deref(),
                report_out.as_deref(),
            )?;
        }
        Commands::Merge { dir, out, format } => {
            let merged = persistence::merge_csv_dir(&dir, format)?;
            persistence::write_candles_csv(&merged, &out)?;
            println!("Merged {} candles into {}", merged.len(), out.display());
        }
    }

    Ok(())
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_series(path: &Path, format: CandleFormat) -> Result<CandleSeries> {
    if path.is_dir() {
        persistence::merge_csv_dir(path, format)
    } else {
        persistence::load_candles(path, format)
    }
}

fn run_backtest(
    app: &AppConfig,
    source: &Path,
    parallel: bool,
    trades_out: Option<&Path>,
    report_out: Option<&Path>,
) -> Result<()> {
    info!("Configuration: {}", app);

    let series = load_series(source, app.data.format)?;
    let train_len = app.data.train_len(series.len());
    if train_len == 0 || train_len >= series.len() {
        bail!(
            "Training split of {} leaves nothing to train on or test with ({} candles)",
            train_len,
            series.len()
        );
    }
    let (train, live) = series.split_at(train_len);
    info!("Split {} candles: {} train / {} live", series.len(), train.len(), live.len());

    let model = KnnDecisionMaker::new(
        train,
        &app.features,
        &app.grid,
        app.knn,
        &app.simulation,
        app.trading,
    )
    .context("Failed to build nearest-neighbour model")?;

    let engine = BacktestEngine::new(app.backtest)?;
    let report = if parallel {
        let signals = PrecomputedSignals::compute(&model, &live)?;
        engine.run(&live, &signals)?
    } else {
        engine.run(&live, &model)?
    };

    println!("{}", report.statistics);

    if let Some(path) = trades_out {
        persistence::export_trades_csv(&report, path)?;
    }
    if let Some(path) = report_out {
        persistence::write_report_json(&report, path)?;
    }

    Ok(())
}
