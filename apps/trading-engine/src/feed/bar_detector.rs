//! Closed-bar detection from a tick stream.
//!
//! The broker pushes ticks, not bar-close events. A bar is known to be
//! closed only when the first tick of the *next* period arrives: each
//! tick is bucketed to its aligned period start, and a bucket change
//! emits the accumulated bar. Market gaps (weekends) simply skip
//! periods; nothing synthetic is emitted, so per symbol the emitted
//! start times are strictly increasing and always on the grid.

use std::collections::HashMap;

use crate::models::{Bar, Tick, Timeframe};

/// OHLCV accumulator for the bar in progress.
#[derive(Debug, Clone)]
struct PendingBar {
    start: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl PendingBar {
    fn new(start: i64, price: f64) -> Self {
        Self {
            start,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 1.0,
        }
    }

    fn update(&mut self, price: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += 1.0;
    }

    fn finalize(&self, symbol: &str) -> Bar {
        Bar {
            symbol: symbol.to_string(),
            time: self.start,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

/// Per-symbol tick-to-bar state machine.
#[derive(Debug, Default)]
pub struct BarDetector {
    timeframes: HashMap<String, Timeframe>,
    pending: HashMap<String, PendingBar>,
}

impl BarDetector {
    /// Detector with no symbols registered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a symbol at a timeframe. Re-registering resets
    /// the in-progress accumulator.
    pub fn register(&mut self, symbol: &str, timeframe: Timeframe) {
        self.timeframes.insert(symbol.to_string(), timeframe);
        self.pending.remove(symbol);
    }

    /// Stop tracking a symbol.
    pub fn unregister(&mut self, symbol: &str) {
        self.timeframes.remove(symbol);
        self.pending.remove(symbol);
    }

    /// Registered symbols.
    #[must_use]
    pub fn symbols(&self) -> Vec<String> {
        let mut names: Vec<String> = self.timeframes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Feed one tick. Returns the previous bar when this tick opens a
    /// new period; the first tick for a symbol only initializes state.
    pub fn on_tick(&mut self, tick: &Tick) -> Option<Bar> {
        let timeframe = *self.timeframes.get(&tick.symbol)?;
        let period = timeframe.seconds();
        let bar_start = tick.time.div_euclid(period) * period;
        let price = tick.mid();

        match self.pending.get_mut(&tick.symbol) {
            None => {
                self.pending
                    .insert(tick.symbol.clone(), PendingBar::new(bar_start, price));
                None
            }
            Some(pending) if bar_start > pending.start => {
                let completed = pending.finalize(&tick.symbol);
                *pending = PendingBar::new(bar_start, price);
                Some(completed)
            }
            Some(pending) => {
                // Late ticks for an already-emitted period fold into the
                // current accumulator rather than rewriting history.
                pending.update(price);
                None
            }
        }
    }

    /// The in-progress bar for a symbol, if any.
    #[must_use]
    pub fn pending_bar(&self, symbol: &str) -> Option<Bar> {
        self.pending.get(symbol).map(|p| p.finalize(symbol))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(symbol: &str, time: i64, price: f64) -> Tick {
        Tick {
            symbol: symbol.to_string(),
            time,
            bid: price - 0.0001,
            ask: price + 0.0001,
        }
    }

    #[test]
    fn test_first_tick_initializes_without_emitting() {
        let mut detector = BarDetector::new();
        detector.register("EURUSD", Timeframe::M15);
        assert!(detector.on_tick(&tick("EURUSD", 905, 1.1)).is_none());
        assert!(detector.pending_bar("EURUSD").is_some());
    }

    #[test]
    fn test_bar_emitted_on_period_change() {
        let mut detector = BarDetector::new();
        detector.register("EURUSD", Timeframe::M15);

        detector.on_tick(&tick("EURUSD", 910, 1.1000));
        detector.on_tick(&tick("EURUSD", 1000, 1.1010));
        detector.on_tick(&tick("EURUSD", 1100, 1.0990));

        let bar = detector.on_tick(&tick("EURUSD", 1805, 1.1005)).unwrap();
        assert_eq!(bar.time, 900);
        assert!((bar.open - 1.1000).abs() < 1e-12);
        assert!((bar.high - 1.1010).abs() < 1e-12);
        assert!((bar.low - 1.0990).abs() < 1e-12);
        assert!((bar.close - 1.0990).abs() < 1e-12);
        assert!((bar.volume - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_gap_skips_periods_without_synthetic_bars() {
        let mut detector = BarDetector::new();
        detector.register("EURUSD", Timeframe::M15);

        detector.on_tick(&tick("EURUSD", 100, 1.1));
        // Weekend gap: next tick is many periods later.
        let bar = detector.on_tick(&tick("EURUSD", 100 + 900 * 10, 1.2)).unwrap();
        assert_eq!(bar.time, 0);

        // New accumulator starts at the gap tick's aligned period.
        let pending = detector.pending_bar("EURUSD").unwrap();
        assert_eq!(pending.time, 9000);
    }

    #[test]
    fn test_emitted_bars_strictly_increasing_and_aligned() {
        let mut detector = BarDetector::new();
        detector.register("EURUSD", Timeframe::M1);

        let mut emitted = Vec::new();
        for i in 0..600 {
            let t = 17 + i * 13; // irregular tick cadence
            if let Some(bar) = detector.on_tick(&tick("EURUSD", t, 1.1)) {
                emitted.push(bar);
            }
        }
        assert!(!emitted.is_empty());
        assert!(emitted.windows(2).all(|w| w[0].time < w[1].time));
        assert!(emitted.iter().all(|b| b.time % 60 == 0));
    }

    #[test]
    fn test_unregistered_symbol_ignored() {
        let mut detector = BarDetector::new();
        assert!(detector.on_tick(&tick("EURUSD", 100, 1.1)).is_none());
        assert!(detector.pending_bar("EURUSD").is_none());
    }

    #[test]
    fn test_symbols_isolated() {
        let mut detector = BarDetector::new();
        detector.register("EURUSD", Timeframe::M1);
        detector.register("USDJPY", Timeframe::M1);

        detector.on_tick(&tick("EURUSD", 10, 1.1));
        detector.on_tick(&tick("USDJPY", 10, 150.0));

        let bar = detector.on_tick(&tick("EURUSD", 70, 1.1)).unwrap();
        assert_eq!(bar.symbol, "EURUSD");
        // USDJPY still pending.
        assert!(detector.pending_bar("USDJPY").is_some());
    }
}
