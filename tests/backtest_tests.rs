//! End-to-end tests: features, grid index, aggregator and backtest together

#[cfg(test)]
mod tests {
    use knnbot::backtesting::BacktestEngine;
    use knnbot::config::{
        AppConfig, BacktestConfig, FeatureConfig, GridConfig, KnnConfig, PositionConfig,
    };
    use knnbot::features::{FeatureExtractor, FeatureKind, FeatureVector};
    use knnbot::neighbours::{DistanceMetric, GridIndex};
    use knnbot::simulator::SimulatedPosition;
    use knnbot::strategy::{DecisionMaker, KnnDecisionMaker, PrecomputedSignals, Prediction};
    use knnbot::types::{Candle, CandleSeries, Direction};
    use knnbot::Result;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn series(candles: Vec<Candle>) -> CandleSeries {
        CandleSeries::new(
            candles
                .into_iter()
                .enumerate()
                .map(|(i, mut c)| {
                    c.timestamp = 1_700_000_000 + i as i64 * 60;
                    c
                })
                .collect(),
        )
        .unwrap()
    }

    fn flat(price: f64) -> Candle {
        Candle::new(0, price, price, price, price, 1.0)
    }

    fn random_walk(seed: u64, n: usize) -> CandleSeries {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut price = 100.0;
        let candles = (0..n)
            .map(|_| {
                let open: f64 = price;
                let close: f64 = open * (1.0 + rng.gen_range(-0.01..0.01));
                let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.004));
                let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.004));
                price = close;
                Candle::new(0, open, high, low, close, rng.gen_range(1.0..100.0))
            })
            .collect();
        series(candles)
    }

    fn price_change_only() -> FeatureConfig {
        FeatureConfig {
            kinds: vec![FeatureKind::PriceChange],
        }
    }

    fn geometry(tp: f64, sl: f64) -> PositionConfig {
        PositionConfig {
            take_profit_pct: tp,
            stop_loss_pct: sl,
            ..Default::default()
        }
    }

    /// Long on every request, 0.5% target / 5% stop
    struct AlwaysLong;

    impl DecisionMaker for AlwaysLong {
        fn predict(&self, candles: &CandleSeries, index: usize) -> Result<Prediction> {
            let Some(next) = candles.get(index + 1) else {
                return Ok(Prediction::none());
            };
            Ok(Prediction {
                predicted: Some(SimulatedPosition {
                    open_index: index + 1,
                    close_index: None,
                    direction: Direction::Long,
                    entry_price: next.open,
                    exit_price: None,
                    stop_loss_pct: 5.0,
                    take_profit_pct: 0.5,
                }),
                ..Prediction::none()
            })
        }

        fn name(&self) -> &str {
            "always_long"
        }
    }

    // ============================================================================
    // Scenarios
    // ============================================================================

    #[test]
    fn test_flat_candles_predict_none() {
        let train = series(vec![flat(100.0); 20]);
        let model = KnnDecisionMaker::new(
            train,
            &price_change_only(),
            &GridConfig::default(),
            KnnConfig {
                k: 3,
                threshold: 1.0,
                same_direction_ratio: 0.5,
            },
            &geometry(1.0, 1.0),
            geometry(1.0, 1.0),
        )
        .unwrap();

        let live = series(vec![flat(100.0); 3]);
        for i in 0..live.len() {
            let prediction = model.predict(&live, i).unwrap();
            assert!(prediction.predicted.is_none());
            assert!(prediction.neighbours.iter().all(|n| n.distance == 0.0));
        }

        let report = BacktestEngine::new(BacktestConfig::default())
            .unwrap()
            .run(&live, &model)
            .unwrap();
        assert_eq!(report.statistics.tot_positions, 0);
        assert_eq!(report.statistics.net_profit, 0.0);
    }

    #[test]
    fn test_breakout_neighbour_drives_winning_trade() {
        let mut train = vec![flat(100.0), Candle::new(0, 100.0, 105.0, 100.0, 105.0, 5.0)];
        for i in 1..=10 {
            let p = 105.0 + i as f64;
            train.push(Candle::new(0, p - 1.0, p, p - 1.0, p, 1.0));
        }
        let model = KnnDecisionMaker::new(
            series(train),
            &price_change_only(),
            &GridConfig {
                bucket_widths: vec![0.5],
                ..Default::default()
            },
            KnnConfig {
                k: 1,
                threshold: 1.0,
                same_direction_ratio: 0.5,
            },
            &geometry(1.0, 1.0),
            geometry(2.0, 0.5),
        )
        .unwrap();

        let live = series(vec![
            Candle::new(0, 200.0, 210.0, 200.0, 205.0, 1.0),
            Candle::new(0, 205.5, 206.0, 205.0, 205.5, 1.0),
            Candle::new(0, 205.5, 210.0, 205.5, 209.8, 1.0),
        ]);

        let prediction = model.predict(&live, 0).unwrap();
        assert_eq!(prediction.neighbours[0].index, 1);
        assert_eq!(prediction.neighbours[0].distance, 0.0);
        assert_eq!(prediction.considered[0].unwrap().direction, Direction::Long);

        let report = BacktestEngine::new(BacktestConfig::default())
            .unwrap()
            .run(&live, &model)
            .unwrap();
        let stats = &report.statistics;
        assert_eq!(stats.tot_positions, 1);
        assert_eq!(stats.long_positions, 1);
        assert_eq!(stats.winning_positions, 1);
        assert!((stats.net_profit - 2.0).abs() < 1e-9);
        assert_eq!(report.strategy, "knn");
    }

    #[test]
    fn test_single_slot_serialises_positions() {
        let candles: Vec<Candle> = (0..40)
            .map(|i| {
                let p = 100.0 + i as f64;
                Candle::new(0, p, p + 1.0, p, p + 1.0, 1.0)
            })
            .collect();
        let live = series(candles);
        let report = BacktestEngine::new(BacktestConfig::default())
            .unwrap()
            .run(&live, &AlwaysLong)
            .unwrap();

        assert!(report.trades.len() > 5);
        for pair in report.trades.windows(2) {
            assert!(pair[1].open_index > pair[0].close_index);
        }
    }

    // ============================================================================
    // Invariants
    // ============================================================================

    #[test]
    fn test_capacity_never_exceeded() {
        let live = random_walk(7, 500);
        for max_open in [1, 2, 5] {
            let report = BacktestEngine::new(BacktestConfig {
                max_open_positions: max_open,
                ..Default::default()
            })
            .unwrap()
            .run(&live, &AlwaysLong)
            .unwrap();

            // A position occupies a slot from its prediction candle to its close
            let mut occupied = vec![0usize; live.len()];
            for trade in &report.trades {
                for slot in &mut occupied[trade.open_index - 1..=trade.close_index] {
                    *slot += 1;
                }
            }
            for position in &report.open_positions {
                for slot in &mut occupied[position.open_index - 1..] {
                    *slot += 1;
                }
            }
            assert!(occupied.iter().all(|&n| n <= max_open));
            assert!(report.open_positions.len() <= max_open);
        }
    }

    #[test]
    fn test_drawdown_never_recovers() {
        let live = random_walk(11, 800);
        let report = BacktestEngine::new(BacktestConfig {
            max_open_positions: 3,
            ..Default::default()
        })
        .unwrap()
        .run(&live, &AlwaysLong)
        .unwrap();

        let mut peak: f64 = 0.0;
        let mut drawdown: f64 = 0.0;
        for &net in &report.statistics.net_profit_series {
            peak = peak.max(net);
            let next = drawdown.min(net - peak);
            assert!(next <= drawdown);
            drawdown = next;
        }
        assert_eq!(drawdown, report.statistics.max_drawdown);
    }

    #[test]
    fn test_parallel_predictions_match_sequential() {
        let data = random_walk(3, 1200);
        let (train, live) = data.split_at(900);
        let model = KnnDecisionMaker::new(
            train,
            &FeatureConfig::default(),
            &GridConfig {
                bucket_widths: vec![0.5],
                ..Default::default()
            },
            KnnConfig {
                k: 3,
                threshold: 1.0,
                same_direction_ratio: 0.6,
            },
            &geometry(0.5, 0.5),
            geometry(0.5, 0.5),
        )
        .unwrap();

        let engine = BacktestEngine::new(BacktestConfig {
            max_open_positions: 2,
            ..Default::default()
        })
        .unwrap();
        let sequential = engine.run(&live, &model).unwrap();
        let signals = PrecomputedSignals::compute(&model, &live).unwrap();
        let parallel = engine.run(&live, &signals).unwrap();

        assert_eq!(
            sequential.statistics.tot_positions,
            parallel.statistics.tot_positions
        );
        assert_eq!(
            sequential.statistics.net_profit_series,
            parallel.statistics.net_profit_series
        );
        assert_eq!(sequential.trades.len(), parallel.trades.len());
    }

    // ============================================================================
    // Feature and grid properties
    // ============================================================================

    #[test]
    fn test_vector_defined_from_window_boundary() {
        let extractor = FeatureExtractor::new(&FeatureConfig {
            kinds: vec![FeatureKind::PriceChange, FeatureKind::SmaDiff { window: 5 }],
        })
        .unwrap();
        let data = random_walk(5, 20);
        let vectors = extractor.extract(data.as_slice()).unwrap();
        assert!(vectors[3].is_none());
        assert!(vectors[4].is_some());
        assert!(vectors[5..].iter().all(Option::is_some));
    }

    #[test]
    fn test_bucketing_has_no_false_negatives() {
        let mut rng = StdRng::seed_from_u64(42);
        let width = 0.25;
        let points: Vec<Vec<f64>> = (0..300)
            .map(|_| vec![rng.gen_range(-2.0..2.0), rng.gen_range(-2.0..2.0)])
            .collect();
        let vectors: Vec<Option<FeatureVector>> = points
            .iter()
            .map(|p| Some(FeatureVector::new(p.clone())))
            .collect();
        let index = GridIndex::build(&vectors, vec![width; 2], DistanceMetric::Euclidean).unwrap();

        let mut close_pairs = 0;
        for (i, a) in points.iter().enumerate() {
            let candidates = index.candidates(a).unwrap();
            for (j, b) in points.iter().enumerate() {
                if DistanceMetric::Euclidean.distance(a, b) <= width {
                    close_pairs += 1;
                    assert!(candidates.contains(&j), "{} missing {}", i, j);
                }
            }
        }
        assert!(close_pairs > points.len());
    }

    #[test]
    fn test_grid_query_matches_exhaustive_within_width() {
        let mut rng = StdRng::seed_from_u64(9);
        let width = 1.0;
        let centres = [[0.0, 0.0], [5.0, 5.0], [-4.0, 6.0]];
        let mut vectors = Vec::new();
        for centre in &centres {
            for _ in 0..40 {
                vectors.push(Some(FeatureVector::new(vec![
                    centre[0] + rng.gen_range(-0.3..0.3),
                    centre[1] + rng.gen_range(-0.3..0.3),
                ])));
            }
        }
        let index = GridIndex::build(&vectors, vec![width; 2], DistanceMetric::Euclidean).unwrap();

        for centre in &centres {
            for k in [1, 5, 20] {
                let exact = index.query_exhaustive(centre, k).unwrap();
                let grid = index.query(centre, k).unwrap();
                assert_eq!(exact.len(), k);
                assert!(exact.last().unwrap().distance <= width);
                assert_eq!(grid, exact);
                assert!(grid.windows(2).all(|w| w[0].distance <= w[1].distance));
            }
        }
    }

    #[test]
    fn test_rebuilt_index_answers_identically() {
        let data = random_walk(21, 400);
        let extractor = FeatureExtractor::new(&FeatureConfig::default()).unwrap();
        let vectors = extractor.extract(data.as_slice()).unwrap();
        let grid = GridConfig {
            bucket_widths: vec![0.4],
            ..Default::default()
        };
        let knn = KnnConfig::default();
        let first = GridIndex::from_config(&vectors, 2, &grid, &knn).unwrap();
        let second = GridIndex::from_config(&vectors, 2, &grid, &knn).unwrap();

        for vector in vectors.iter().flatten().take(50) {
            let a = first.query(vector.as_slice(), knn.k).unwrap();
            let b = second.query(vector.as_slice(), knn.k).unwrap();
            assert_eq!(a, b);
            assert!(a.len() <= knn.k);
        }
    }

    #[test]
    fn test_default_configuration_is_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }
}
