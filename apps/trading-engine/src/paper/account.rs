//! Simulated account for paper execution.
//!
//! Fills use the frozen training-time costs (spread, slippage,
//! commission, training lot table) with no rejections, mirroring the
//! environment the policy was trained in. Divergence between these
//! fills and real fills is exactly the drift being measured.

use std::collections::HashMap;

use serde::Serialize;

use crate::predictor::virtual_position::TrainingCosts;

/// An open simulated position.
#[derive(Debug, Clone)]
pub struct PaperPosition {
    pub symbol: String,
    pub direction: i8,
    pub intensity: u8,
    pub volume: f64,
    pub entry_price: f64,
    pub entry_time: i64,
    pub current_pnl: f64,
}

/// A closed simulated trade.
#[derive(Debug, Clone, Serialize)]
pub struct PaperTrade {
    pub symbol: String,
    pub direction: i8,
    pub intensity: u8,
    pub volume: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_time: i64,
    pub exit_time: i64,
    pub pnl: f64,
    pub pnl_pips: f64,
    /// Round-trip commission.
    pub commission: f64,
    pub hmm_state: usize,
}

/// One symbol's simulated account.
#[derive(Debug)]
pub struct PaperAccount {
    costs: TrainingCosts,
    pub balance: f64,
    pub equity: f64,
    positions: HashMap<String, PaperPosition>,
    closed_trades: Vec<PaperTrade>,
    pub total_commission: f64,
}

impl PaperAccount {
    /// Account seeded with the configured balance and training costs.
    #[must_use]
    pub fn new(initial_balance: f64, costs: TrainingCosts) -> Self {
        Self {
            costs,
            balance: initial_balance,
            equity: initial_balance,
            positions: HashMap::new(),
            closed_trades: Vec::new(),
            total_commission: 0.0,
        }
    }

    /// Open position for a symbol, if any.
    #[must_use]
    pub fn position(&self, symbol: &str) -> Option<&PaperPosition> {
        self.positions.get(symbol)
    }

    /// All closed trades, in close order.
    #[must_use]
    pub fn closed_trades(&self) -> &[PaperTrade] {
        &self.closed_trades
    }

    /// Open at the training-cost fill price. Returns false when a
    /// position already exists or the intensity maps to a zero lot.
    pub fn open_position(
        &mut self,
        symbol: &str,
        direction: i8,
        intensity: u8,
        price: f64,
        timestamp: i64,
    ) -> bool {
        if self.positions.contains_key(symbol) {
            return false;
        }
        let volume = self.costs.lot_for(intensity);
        if volume <= 0.0 {
            return false;
        }

        let spread_cost = self.costs.spread_points * self.costs.point;
        let slippage = self.costs.slippage_points * self.costs.point;
        let entry_price = if direction == 1 {
            price + spread_cost + slippage
        } else {
            price - spread_cost - slippage
        };

        // Entry commission is half the round trip.
        let commission = self.costs.commission_per_lot * volume / 2.0;
        self.balance -= commission;
        self.total_commission += commission;

        self.positions.insert(
            symbol.to_string(),
            PaperPosition {
                symbol: symbol.to_string(),
                direction,
                intensity,
                volume,
                entry_price,
                entry_time: timestamp,
                current_pnl: 0.0,
            },
        );
        true
    }

    /// Close the symbol's position at the training-cost exit price.
    pub fn close_position(
        &mut self,
        symbol: &str,
        price: f64,
        timestamp: i64,
        hmm_state: usize,
    ) -> Option<PaperTrade> {
        let position = self.positions.remove(symbol)?;

        let slippage = self.costs.slippage_points * self.costs.point;
        let exit_price = if position.direction == 1 {
            price - slippage
        } else {
            price + slippage
        };

        let price_diff = (exit_price - position.entry_price) * f64::from(position.direction);
        let pips = price_diff / self.costs.point / self.costs.points_per_pip();
        let mut pnl = pips * self.costs.pip_value * position.volume;

        let commission = self.costs.commission_per_lot * position.volume / 2.0;
        pnl -= commission;
        self.total_commission += commission;

        self.balance += pnl;
        self.equity = self.balance;

        let trade = PaperTrade {
            symbol: position.symbol,
            direction: position.direction,
            intensity: position.intensity,
            volume: position.volume,
            entry_price: position.entry_price,
            exit_price,
            entry_time: position.entry_time,
            exit_time: timestamp,
            pnl,
            pnl_pips: pips,
            commission: commission * 2.0,
            hmm_state,
        };
        self.closed_trades.push(trade.clone());
        Some(trade)
    }

    /// Refresh equity with floating PnL at the given prices.
    pub fn update_equity(&mut self, prices: &HashMap<String, f64>) {
        let mut floating = 0.0;
        for (symbol, position) in &mut self.positions {
            if let Some(&price) = prices.get(symbol) {
                let diff = (price - position.entry_price) * f64::from(position.direction);
                let pips = diff / self.costs.point / self.costs.points_per_pip();
                position.current_pnl = pips * self.costs.pip_value * position.volume;
                floating += position.current_pnl;
            }
        }
        self.equity = self.balance + floating;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> PaperAccount {
        PaperAccount::new(10_000.0, TrainingCosts::default())
    }

    #[test]
    fn test_open_debits_entry_commission() {
        let mut account = account();
        assert!(account.open_position("EURUSD", 1, 2, 1.10000, 0));
        // Half of 7 USD/lot at 0.03 lots.
        assert!((account.balance - (10_000.0 - 7.0 * 0.03 / 2.0)).abs() < 1e-9);
        let position = account.position("EURUSD").unwrap();
        assert!((position.entry_price - 1.10009).abs() < 1e-12);
    }

    #[test]
    fn test_double_open_refused() {
        let mut account = account();
        assert!(account.open_position("EURUSD", 1, 1, 1.1, 0));
        assert!(!account.open_position("EURUSD", -1, 1, 1.1, 0));
    }

    #[test]
    fn test_zero_intensity_refused() {
        let mut account = account();
        assert!(!account.open_position("EURUSD", 1, 0, 1.1, 0));
    }

    #[test]
    fn test_close_produces_trade_with_costs() {
        let mut account = account();
        account.open_position("EURUSD", 1, 1, 1.10000, 100);
        let trade = account.close_position("EURUSD", 1.10100, 200, 2).unwrap();

        let entry = 1.10009;
        let exit = 1.10100 - 0.00002;
        let pips = (exit - entry) / 0.00001 / 10.0;
        let expected_pnl = pips * 10.0 * 0.01 - 7.0 * 0.01 / 2.0;
        assert!((trade.pnl - expected_pnl).abs() < 1e-9);
        assert!((trade.commission - 7.0 * 0.01).abs() < 1e-12);
        assert_eq!(trade.hmm_state, 2);
        assert!(account.position("EURUSD").is_none());
    }

    #[test]
    fn test_update_equity_tracks_floating() {
        let mut account = account();
        account.open_position("EURUSD", 1, 1, 1.10000, 0);
        let mut prices = HashMap::new();
        prices.insert("EURUSD".to_string(), 1.10109);
        account.update_equity(&prices);
        // 10 pips at 10 USD/pip/lot, 0.01 lots = 1 USD floating.
        assert!((account.equity - (account.balance + 1.0)).abs() < 1e-9);
    }
}
