//! The predictor: digital twin of the training environment.
//!
//! Blind to reality by design — it never sees the real account, real
//! positions, or executor acknowledgements. Per closed bar it updates
//! the symbol's bar buffer, infers the regime and the policy action,
//! applies the action to the virtual position, and emits a [`Signal`].
//!
//! All per-symbol state here is single-writer: the bar-processing task
//! for that symbol. Different symbols may be driven concurrently.

pub mod buffer;
pub mod bundle;
pub mod features;
pub mod virtual_position;

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::models::{Action, Bar, Signal, Timeframe};

use buffer::{BarBuffer, BufferError};
use bundle::{ModelBundle, ModelError};
use features::FeatureParams;
use virtual_position::VirtualPosition;

/// Per-symbol predictor state.
struct SymbolState {
    bundle: ModelBundle,
    params: FeatureParams,
    buffer: BarBuffer,
    virtual_position: VirtualPosition,
}

/// Multi-symbol predictor. One model bundle per symbol.
#[derive(Default)]
pub struct Predictor {
    symbols: HashMap<String, SymbolState>,
}

impl Predictor {
    /// Empty predictor with no models loaded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a bundle archive and initialize fresh per-symbol state:
    /// empty buffer, flat virtual position, feature params from the
    /// bundle metadata.
    ///
    /// # Errors
    ///
    /// Propagates [`ModelError`] from the loader; the caller decides
    /// whether to skip the symbol or abort.
    pub fn load_model(&mut self, path: &Path) -> Result<String, ModelError> {
        let bundle = ModelBundle::load(path)?;
        let symbol = bundle.symbol.clone();
        let params = bundle.metadata.feature_params();
        let capacity = bundle
            .metadata
            .min_bars
            .unwrap_or(BarBuffer::DEFAULT_CAPACITY);
        let costs = bundle.metadata.training_config.costs.clone();

        info!(
            symbol = %symbol,
            timeframe = %bundle.timeframe,
            buffer = capacity,
            n_states = params.n_states,
            "predictor armed"
        );

        self.symbols.insert(
            symbol.clone(),
            SymbolState {
                bundle,
                params,
                buffer: BarBuffer::new(capacity),
                virtual_position: VirtualPosition::new(costs),
            },
        );
        Ok(symbol)
    }

    /// Drop a symbol's model and all its state.
    pub fn unload_model(&mut self, symbol: &str) -> bool {
        self.symbols.remove(symbol).is_some()
    }

    /// Symbols with loaded models.
    #[must_use]
    pub fn symbols(&self) -> Vec<String> {
        let mut names: Vec<String> = self.symbols.keys().cloned().collect();
        names.sort();
        names
    }

    /// Timeframe of a loaded symbol.
    #[must_use]
    pub fn timeframe(&self, symbol: &str) -> Option<Timeframe> {
        self.symbols.get(symbol).map(|s| s.bundle.timeframe)
    }

    /// Current virtual direction for a symbol (-1, 0, +1).
    #[must_use]
    pub fn virtual_direction(&self, symbol: &str) -> Option<i8> {
        self.symbols.get(symbol).map(|s| s.virtual_position.direction())
    }

    /// Training-time cost parameters frozen into a symbol's bundle
    /// (consumed by the paper trader).
    #[must_use]
    pub fn training_costs(&self, symbol: &str) -> Option<virtual_position::TrainingCosts> {
        self.symbols
            .get(symbol)
            .map(|s| s.bundle.metadata.training_config.costs.clone())
    }

    /// Process one closed bar. Returns `None` while the buffer is still
    /// filling, when no model is loaded for the symbol, or when the bar
    /// arrives out of order (dropped with a warning).
    pub fn process_bar(&mut self, bar: &Bar) -> Option<Signal> {
        let state = match self.symbols.get_mut(&bar.symbol) {
            Some(state) => state,
            None => {
                warn!(symbol = %bar.symbol, "bar for symbol without a model");
                return None;
            }
        };

        match state.buffer.push(bar.clone()) {
            Ok(()) => {}
            Err(BufferError::OutOfOrderBar { time, last }) => {
                warn!(symbol = %bar.symbol, time, last, "out-of-order bar dropped");
                return None;
            }
        }

        if !state.buffer.ready() {
            return None;
        }

        let (action, hmm_state) = state.predict(bar);
        let signal = Signal {
            symbol: bar.symbol.clone(),
            action,
            hmm_state,
            virtual_pnl: state.virtual_position.current_pnl(),
            timestamp: bar.time,
        };
        debug!(
            symbol = %signal.symbol,
            action = %signal.action,
            hmm_state,
            virtual_pnl = signal.virtual_pnl,
            "signal emitted"
        );
        Some(signal)
    }

    /// Fast-forward a symbol through historical bars so the virtual
    /// position ends where the training environment would be.
    ///
    /// Bars below buffer capacity only stabilize the buffer; each bar
    /// after that runs a silent prediction (no signal is emitted).
    /// Returns the number of silent predictions run.
    pub fn warmup(&mut self, symbol: &str, bars: &[Bar]) -> usize {
        let state = match self.symbols.get_mut(symbol) {
            Some(state) => state,
            None => {
                warn!(symbol, "warmup requested for symbol without a model");
                return 0;
            }
        };

        let mut predicted = 0;
        for bar in bars {
            match state.buffer.push(bar.clone()) {
                Ok(()) => {}
                Err(BufferError::OutOfOrderBar { time, last }) => {
                    warn!(symbol, time, last, "out-of-order warmup bar dropped");
                    continue;
                }
            }
            if state.buffer.ready() {
                state.predict(bar);
                predicted += 1;
            }
        }

        info!(
            symbol,
            bars = bars.len(),
            predicted,
            virtual_direction = state.virtual_position.direction(),
            virtual_pnl = state.virtual_position.current_pnl(),
            "warmup complete"
        );
        predicted
    }
}

impl SymbolState {
    /// Full prediction for the last buffered bar, updating the virtual
    /// position. Shared by warmup and the live path.
    fn predict(&mut self, bar: &Bar) -> (Action, usize) {
        let window = self.buffer.snapshot();

        let hmm_features = self.params.hmm_features(&window);
        let hmm_state = self.bundle.hmm_predict(&hmm_features);

        let policy_features =
            self.params
                .policy_features(&window, hmm_state, self.virtual_position.features());
        let action = Action::from_index(self.bundle.policy_predict(&policy_features));

        let previous_direction = self.virtual_position.direction();
        let realized = self.virtual_position.update(action, bar.close);
        if previous_direction != self.virtual_position.direction() {
            debug!(
                symbol = %bar.symbol,
                from = previous_direction,
                to = self.virtual_position.direction(),
                realized,
                "virtual position changed"
            );
        }

        (action, hmm_state)
    }
}

#[cfg(test)]
mod tests {
    use super::bundle::test_support::{hmm_json, metadata_json, policy_json, write_bundle};
    use super::*;

    fn bar(symbol: &str, i: i64, close: f64) -> Bar {
        Bar {
            symbol: symbol.to_string(),
            time: i * 900,
            open: close,
            high: close + 0.0004,
            low: close - 0.0004,
            close,
            volume: 10.0,
        }
    }

    fn predictor_with_model(favored_action: usize, min_bars: usize) -> Predictor {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("EURUSD_M15.zip");
        let mut metadata = metadata_json("EURUSD", "M15");
        metadata["min_bars"] = serde_json::json!(min_bars);
        write_bundle(
            &path,
            "EURUSD",
            "M15",
            &metadata,
            &hmm_json(),
            &policy_json(11, favored_action),
        );
        let mut predictor = Predictor::new();
        predictor.load_model(&path).unwrap();
        predictor
    }

    #[test]
    fn test_no_signal_until_buffer_ready() {
        let mut predictor = predictor_with_model(1, 5);
        for i in 0..4 {
            assert!(predictor.process_bar(&bar("EURUSD", i, 1.1)).is_none());
        }
        let signal = predictor.process_bar(&bar("EURUSD", 4, 1.1));
        assert!(signal.is_some());
    }

    #[test]
    fn test_signal_reflects_virtual_update() {
        let mut predictor = predictor_with_model(2, 5);
        let mut signal = None;
        for i in 0..6i64 {
            #[allow(clippy::cast_precision_loss)]
            let close = 1.1 + i as f64 * 0.001;
            signal = predictor.process_bar(&bar("EURUSD", i, close));
        }
        let signal = signal.unwrap();
        assert_eq!(signal.action, Action::LongModerate);
        assert_eq!(predictor.virtual_direction("EURUSD"), Some(1));
        // Emitted after the update: floating PnL reflects the open.
        assert!(signal.virtual_pnl != 0.0 || signal.intensity() == 0);
    }

    #[test]
    fn test_unknown_symbol_ignored() {
        let mut predictor = predictor_with_model(1, 5);
        assert!(predictor.process_bar(&bar("GBPUSD", 0, 1.3)).is_none());
    }

    #[test]
    fn test_out_of_order_bar_dropped() {
        let mut predictor = predictor_with_model(1, 3);
        for i in 0..3 {
            predictor.process_bar(&bar("EURUSD", i, 1.1));
        }
        // Same timestamp again: dropped, no signal.
        assert!(predictor.process_bar(&bar("EURUSD", 2, 1.1)).is_none());
        // Next in-order bar still works.
        assert!(predictor.process_bar(&bar("EURUSD", 3, 1.1)).is_some());
    }

    #[test]
    fn test_warmup_counts_silent_predictions() {
        let mut predictor = predictor_with_model(1, 5);
        let bars: Vec<Bar> = (0..12).map(|i| bar("EURUSD", i, 1.1)).collect();
        let predicted = predictor.warmup("EURUSD", &bars);
        // 5 stabilization bars, then one silent prediction per bar.
        assert_eq!(predicted, 8);
        // Policy always favors LONG_WEAK: warmup leaves a virtual long.
        assert_eq!(predictor.virtual_direction("EURUSD"), Some(1));
    }

    #[test]
    fn test_unload_model() {
        let mut predictor = predictor_with_model(1, 5);
        assert!(predictor.unload_model("EURUSD"));
        assert!(!predictor.unload_model("EURUSD"));
        assert!(predictor.symbols().is_empty());
    }
}
