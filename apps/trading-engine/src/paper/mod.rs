//! Paper execution of the live signal stream.
//!
//! Receives exactly the signals the executor receives, at the same
//! point in the pipeline, and simulates them against a separate
//! account using training-time costs. Paper trades are persisted next
//! to real trades (flagged `is_paper`), so divergence between
//! model-as-trained and execution-as-delivered can be quantified.

pub mod account;
pub mod stats;

use std::collections::HashMap;

use serde::Serialize;
use tracing::info;

use crate::models::{Bar, Signal};
use crate::predictor::virtual_position::TrainingCosts;

pub use account::{PaperAccount, PaperTrade};

/// Aggregated paper metrics across all symbols.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PaperMetrics {
    pub total_trades: usize,
    pub total_pnl: f64,
    pub win_rate: f64,
    pub expectancy: f64,
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profit_factor: Option<f64>,
    pub total_commission: f64,
}

/// Paper-versus-real comparison for the drift report.
#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    pub paper_trades: usize,
    pub real_trades: usize,
    pub paper_pnl: f64,
    pub real_pnl: f64,
    pub pnl_drift: f64,
}

/// One simulated account per symbol, all seeded with the same balance.
pub struct PaperTrader {
    initial_balance: f64,
    accounts: HashMap<String, PaperAccount>,
}

impl PaperTrader {
    /// Trader with no symbols configured.
    #[must_use]
    pub fn new(initial_balance: f64) -> Self {
        Self {
            initial_balance,
            accounts: HashMap::new(),
        }
    }

    /// Register a symbol with its training costs (call after the model
    /// bundle loads).
    pub fn register(&mut self, symbol: &str, costs: TrainingCosts) {
        info!(
            symbol,
            spread_points = costs.spread_points,
            "paper account registered"
        );
        self.accounts
            .insert(symbol.to_string(), PaperAccount::new(self.initial_balance, costs));
    }

    /// Apply one signal at its bar. Returns the closed trade, if the
    /// signal closed one.
    ///
    /// Mirrors the training environment's action semantics: any change
    /// of direction or intensity closes and (for non-flat targets)
    /// reopens; an unchanged action holds.
    pub fn process_signal(&mut self, signal: &Signal, bar: &Bar) -> Option<PaperTrade> {
        let account = self.accounts.get_mut(&signal.symbol)?;
        let price = bar.close;
        let timestamp = bar.time;

        let target_direction = signal.direction().value();
        let target_intensity = signal.intensity();

        let current = account.position(&signal.symbol);
        let current_direction = current.map_or(0, |p| p.direction);
        let current_intensity = current.map(|p| p.intensity);

        if current_direction == target_direction {
            // Same direction: only an intensity change re-fills.
            if target_direction != 0 && current_intensity != Some(target_intensity) {
                let trade =
                    account.close_position(&signal.symbol, price, timestamp, signal.hmm_state);
                account.open_position(
                    &signal.symbol,
                    target_direction,
                    target_intensity,
                    price,
                    timestamp,
                );
                return trade;
            }
            return None;
        }

        let trade = if current_direction != 0 {
            account.close_position(&signal.symbol, price, timestamp, signal.hmm_state)
        } else {
            None
        };

        if target_direction != 0 && target_intensity > 0 {
            account.open_position(
                &signal.symbol,
                target_direction,
                target_intensity,
                price,
                timestamp,
            );
        }

        trade
    }

    /// All closed trades across symbols, ordered by exit time.
    #[must_use]
    pub fn trades(&self) -> Vec<PaperTrade> {
        let mut trades: Vec<PaperTrade> = self
            .accounts
            .values()
            .flat_map(|a| a.closed_trades().iter().cloned())
            .collect();
        trades.sort_by_key(|t| t.exit_time);
        trades
    }

    /// Consolidated metrics snapshot.
    #[must_use]
    pub fn metrics(&self) -> PaperMetrics {
        let trades = self.trades();
        if trades.is_empty() {
            return PaperMetrics::default();
        }
        PaperMetrics {
            total_trades: trades.len(),
            total_pnl: trades.iter().map(|t| t.pnl).sum(),
            win_rate: stats::win_rate(&trades),
            expectancy: stats::expectancy(&trades),
            max_drawdown: stats::max_drawdown(&trades, self.initial_balance),
            sharpe_ratio: stats::sharpe_ratio(&trades),
            profit_factor: stats::profit_factor(&trades),
            total_commission: self.accounts.values().map(|a| a.total_commission).sum(),
        }
    }

    /// Compare paper PnL against a list of real trade PnLs.
    #[must_use]
    pub fn drift_report(&self, real_pnls: &[f64]) -> DriftReport {
        let trades = self.trades();
        let paper_pnl: f64 = trades.iter().map(|t| t.pnl).sum();
        let real_pnl: f64 = real_pnls.iter().sum();
        DriftReport {
            paper_trades: trades.len(),
            real_trades: real_pnls.len(),
            paper_pnl,
            real_pnl,
            pnl_drift: paper_pnl - real_pnl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Action;

    fn signal(action: Action, state: usize) -> Signal {
        Signal {
            symbol: "EURUSD".to_string(),
            action,
            hmm_state: state,
            virtual_pnl: 0.0,
            timestamp: 0,
        }
    }

    fn bar(time: i64, close: f64) -> Bar {
        Bar {
            symbol: "EURUSD".to_string(),
            time,
            open: close,
            high: close,
            low: close,
            close,
            volume: 0.0,
        }
    }

    fn trader() -> PaperTrader {
        let mut trader = PaperTrader::new(10_000.0);
        trader.register("EURUSD", TrainingCosts::default());
        trader
    }

    #[test]
    fn test_entry_then_exit_produces_one_trade() {
        let mut trader = trader();
        assert!(trader
            .process_signal(&signal(Action::LongWeak, 1), &bar(900, 1.1))
            .is_none());
        let trade = trader
            .process_signal(&signal(Action::Wait, 1), &bar(1800, 1.101))
            .unwrap();
        assert_eq!(trade.direction, 1);
        assert_eq!(trader.metrics().total_trades, 1);
    }

    #[test]
    fn test_hold_produces_no_trade() {
        let mut trader = trader();
        trader.process_signal(&signal(Action::LongWeak, 1), &bar(900, 1.1));
        assert!(trader
            .process_signal(&signal(Action::LongWeak, 1), &bar(1800, 1.2))
            .is_none());
    }

    #[test]
    fn test_intensity_change_closes_and_reopens() {
        let mut trader = trader();
        trader.process_signal(&signal(Action::LongWeak, 1), &bar(900, 1.1));
        let trade = trader
            .process_signal(&signal(Action::LongStrong, 1), &bar(1800, 1.11))
            .unwrap();
        assert_eq!(trade.intensity, 1);
        // Reopened at strong.
        let account = trader.accounts.get("EURUSD").unwrap();
        assert_eq!(account.position("EURUSD").unwrap().intensity, 3);
    }

    #[test]
    fn test_inversion_closes_and_reopens_opposite() {
        let mut trader = trader();
        trader.process_signal(&signal(Action::LongModerate, 0), &bar(900, 1.1));
        let trade = trader
            .process_signal(&signal(Action::ShortModerate, 0), &bar(1800, 1.09))
            .unwrap();
        assert_eq!(trade.direction, 1);
        let account = trader.accounts.get("EURUSD").unwrap();
        assert_eq!(account.position("EURUSD").unwrap().direction, -1);
    }

    #[test]
    fn test_unregistered_symbol_ignored() {
        let mut trader = PaperTrader::new(10_000.0);
        assert!(trader
            .process_signal(&signal(Action::LongWeak, 0), &bar(900, 1.1))
            .is_none());
    }

    #[test]
    fn test_drift_report() {
        let mut trader = trader();
        trader.process_signal(&signal(Action::LongWeak, 0), &bar(900, 1.1));
        trader.process_signal(&signal(Action::Wait, 0), &bar(1800, 1.12));
        let report = trader.drift_report(&[5.0]);
        assert_eq!(report.paper_trades, 1);
        assert_eq!(report.real_trades, 1);
        assert!((report.pnl_drift - (report.paper_pnl - 5.0)).abs() < 1e-12);
    }
}
