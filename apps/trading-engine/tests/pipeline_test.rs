//! Full-pipeline test: bundle archive on disk, warmup fast-forward,
//! tick-driven bar detection, prediction, and execution against the
//! mock broker.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use trading_engine::broker::{BrokerConnector, BrokerEvent, MockConnector};
use trading_engine::config::{SymbolConfig, SymbolFile};
use trading_engine::execution::Executor;
use trading_engine::models::{Bar, SymbolInfo, Tick, Timeframe};
use trading_engine::predictor::Predictor;
use trading_engine::risk::{RiskConfig, SpreadMap};

const BUFFER: usize = 6;
// 6 market + 2 one-hot states + 3 position features.
const POLICY_INPUT: usize = 11;

/// Write a v2.0 bundle whose policy always favors one action.
fn write_bundle(path: &Path, favored_action: usize) {
    let metadata = serde_json::json!({
        "format_version": "2.0",
        "symbol": {"name": "EURUSD", "timeframe": "M15"},
        "training_config": {
            "point": 0.00001,
            "pip_value": 10.0,
            "spread_points": 7.0,
            "slippage_points": 2.0,
            "commission_per_lot": 7.0,
            "digits": 5,
            "lot_sizes": [0.0, 0.01, 0.03, 0.05],
            "initial_balance": 10000.0,
            "total_timesteps": 500000
        },
        "hmm_config": {
            "n_states": 2,
            "momentum_period": 3,
            "consistency_period": 3,
            "range_period": 4
        },
        "rl_config": {
            "roc_period": 2,
            "atr_period": 3,
            "ema_period": 5,
            "range_period": 4,
            "volume_ma_period": 3
        },
        "actions": {
            "0": {"name": "WAIT", "direction": 0, "intensity": 0},
            "1": {"name": "LONG_WEAK", "direction": 1, "intensity": 1},
            "2": {"name": "LONG_MODERATE", "direction": 1, "intensity": 2},
            "3": {"name": "LONG_STRONG", "direction": 1, "intensity": 3},
            "4": {"name": "SHORT_WEAK", "direction": -1, "intensity": 1},
            "5": {"name": "SHORT_MODERATE", "direction": -1, "intensity": 2},
            "6": {"name": "SHORT_STRONG", "direction": -1, "intensity": 3}
        },
        "state_analysis": {"bull_states": [0], "bear_states": [1], "range_states": []},
        "data_info": {
            "date_start": "2023-01-01",
            "date_end": "2024-12-31",
            "bars": {"train": 60000, "val": 10000, "test": 10000}
        },
        "min_bars": BUFFER
    });

    let hmm = serde_json::json!({
        "start_prob": [0.5, 0.5],
        "means": [[1.0, 0.5, 0.5], [-1.0, -0.5, -0.5]],
        "variances": [[1.0, 1.0, 1.0], [1.0, 1.0, 1.0]]
    });

    let mut weights = vec![vec![0.0; POLICY_INPUT]; 7];
    let mut bias = vec![0.0; 7];
    bias[favored_action] = 1.0;
    weights[favored_action][0] = 0.1;
    let policy = serde_json::json!({
        "layers": [{"weights": weights, "bias": bias, "activation": "linear"}]
    });

    let file = std::fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    writer.start_file("EURUSD_M15_hmm.json", options).unwrap();
    writer
        .write_all(&serde_json::to_vec(&hmm).unwrap())
        .unwrap();
    writer.start_file("EURUSD_M15_policy.json", options).unwrap();
    writer
        .write_all(&serde_json::to_vec(&policy).unwrap())
        .unwrap();
    writer.set_comment(serde_json::to_string(&metadata).unwrap());
    writer.finish().unwrap();
}

fn history(count: usize) -> Vec<Bar> {
    (0..count)
        .map(|i| {
            let close = 1.1 + (i % 7) as f64 * 0.0002;
            Bar {
                symbol: "EURUSD".to_string(),
                time: i as i64 * 900,
                open: close,
                high: close + 0.0004,
                low: close - 0.0004,
                close,
                volume: 50.0,
            }
        })
        .collect()
}

fn executor_for(mock: &Arc<MockConnector>) -> Executor {
    let spreads = Arc::new(SpreadMap::new());
    spreads.publish("EURUSD", 1.0);
    let mut file = SymbolFile::default();
    file.symbols
        .insert("EURUSD".to_string(), SymbolConfig::default());
    file.risk = RiskConfig {
        initial_balance: 10_000.0,
        ..RiskConfig::default()
    };
    Executor::new(
        Arc::clone(mock) as Arc<dyn BrokerConnector>,
        file,
        spreads,
        false,
    )
}

#[tokio::test]
async fn pipeline_warmup_then_missed_entry_on_first_live_bar() {
    let dir = tempfile::tempdir().unwrap();
    let bundle = dir.path().join("EURUSD_M15.zip");
    write_bundle(&bundle, 1); // policy always LONG_WEAK

    let mut predictor = Predictor::new();
    let symbol = predictor.load_model(&bundle).unwrap();
    assert_eq!(symbol, "EURUSD");
    assert_eq!(predictor.timeframe("EURUSD"), Some(Timeframe::M15));

    // Warmup: the always-long policy leaves a virtual long, exactly
    // what the training environment would hold.
    let bars = history(20);
    let predicted = predictor.warmup("EURUSD", &bars);
    assert_eq!(predicted, 20 - BUFFER + 1);
    assert_eq!(predictor.virtual_direction("EURUSD"), Some(1));

    // First live bar emits a LONG signal; the broker is flat, so the
    // executor latches instead of chasing the move.
    let mock = Arc::new(MockConnector::new());
    mock.set_price("EURUSD", 1.1);
    mock.set_symbol_info(SymbolInfo {
        symbol: "EURUSD".to_string(),
        point: 0.00001,
        digits: 5,
        pip_value_per_lot: Some(10.0),
        spread_points: 7.0,
        min_volume: 0.01,
        step_volume: 0.01,
        max_volume: 100.0,
    });
    let mut executor = executor_for(&mock);

    let live_bar = Bar {
        symbol: "EURUSD".to_string(),
        time: 20 * 900,
        open: 1.1,
        high: 1.1005,
        low: 1.0995,
        close: 1.1002,
        volume: 40.0,
    };
    let signal = predictor.process_bar(&live_bar).expect("buffer is warm");
    assert_eq!(signal.direction().value(), 1);

    let ack = executor.process_signal(&signal, live_bar.close).await;
    assert_eq!(ack.code(), "OK/WAITING_SYNC");
    assert!(mock.orders().is_empty());
}

#[tokio::test]
async fn pipeline_ticks_to_bars_to_signals() {
    let dir = tempfile::tempdir().unwrap();
    let bundle = dir.path().join("EURUSD_M15.zip");
    write_bundle(&bundle, 0); // policy always WAIT

    let mut predictor = Predictor::new();
    predictor.load_model(&bundle).unwrap();

    let mock = Arc::new(MockConnector::new());
    let mut events = mock.take_events().unwrap();
    mock.connect().await.unwrap();
    mock.subscribe_bars(&["EURUSD".to_string()], Timeframe::M15)
        .await
        .unwrap();

    // Two ticks per period; each period change closes a bar.
    let mut signals = Vec::new();
    for period in 0..(BUFFER as i64 + 3) {
        for (offset, price) in [(10, 1.1000), (500, 1.1004)] {
            mock.push_tick(Tick {
                symbol: "EURUSD".to_string(),
                time: period * 900 + offset,
                bid: price,
                ask: price + 0.0002,
            })
            .await;
        }
        while let Ok(event) = events.try_recv() {
            if let BrokerEvent::BarClosed(bar) = event {
                assert_eq!(bar.time % 900, 0);
                if let Some(signal) = predictor.process_bar(&bar) {
                    signals.push(signal);
                }
            }
        }
    }

    // Bars close only on period change, so one fewer than periods; the
    // first BUFFER-1 bars warm the buffer silently.
    assert!(!signals.is_empty());
    for signal in &signals {
        assert_eq!(signal.direction().value(), 0);
        assert_eq!(signal.intensity(), 0);
    }
    // Virtual position stayed flat under a WAIT-only policy.
    assert_eq!(predictor.virtual_direction("EURUSD"), Some(0));
}

#[tokio::test]
async fn pipeline_corrupt_bundle_skips_symbol() {
    let dir = tempfile::tempdir().unwrap();
    let bundle = dir.path().join("EURUSD_M15.zip");
    std::fs::write(&bundle, b"not a zip archive").unwrap();

    let mut predictor = Predictor::new();
    assert!(predictor.load_model(&bundle).is_err());
    assert!(predictor.symbols().is_empty());
}
