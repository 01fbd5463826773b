//! Broker-authoritative views: positions, account, symbol metadata,
//! order results. The engine holds these only as short-lived snapshots.

use serde::{Deserialize, Serialize};

use super::Direction;

/// Snapshot of the trading account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub balance: f64,
    /// `balance + sum(floating_pnl)`.
    pub equity: f64,
    /// Margin currently in use.
    pub margin: f64,
    /// `equity - margin`.
    pub free_margin: f64,
    /// Percent: `equity / margin * 100`, 0 when no margin is used.
    pub margin_level: f64,
    pub currency: String,
}

/// An open position as reported by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub ticket: u64,
    pub symbol: String,
    pub direction: Direction,
    /// Volume in lots.
    pub volume: f64,
    pub open_price: f64,
    pub current_price: f64,
    /// Floating PnL in account currency.
    pub pnl: f64,
    /// Stop loss price, 0 when not set.
    pub sl: f64,
    /// Take profit price, 0 when not set.
    pub tp: f64,
    /// Unix timestamp, seconds UTC.
    pub open_time: i64,
    /// Audit comment attached at open.
    pub comment: String,
}

/// Broker-provided symbol metadata, cached with a TTL by the connector.
///
/// `spread_points` is a point-in-time reading and is deliberately not
/// served from the cache; the spread refresh loop re-reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    /// Smallest price increment (e.g. 0.00001 for a 5-digit pair).
    pub point: f64,
    /// Price decimal places.
    pub digits: u32,
    /// Monetary value of one pip for one standard lot.
    pub pip_value_per_lot: Option<f64>,
    /// Current spread in points.
    pub spread_points: f64,
    pub min_volume: f64,
    pub step_volume: f64,
    pub max_volume: f64,
}

impl SymbolInfo {
    /// Points per pip: 10 for 5-digit and 3-digit (JPY) pricing, else 1.
    #[must_use]
    pub const fn points_per_pip(&self) -> f64 {
        if self.digits == 5 || self.digits == 3 {
            10.0
        } else {
            1.0
        }
    }

    /// Pip size in price units.
    #[must_use]
    pub const fn pip_size(&self) -> f64 {
        self.point * self.points_per_pip()
    }

    /// Current spread converted to pips.
    #[must_use]
    pub const fn spread_pips(&self) -> f64 {
        self.spread_points / self.points_per_pip()
    }
}

/// Result of an order operation. Immutable after return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub success: bool,
    /// Broker ticket on success.
    pub ticket: Option<u64>,
    /// Executed price on success.
    pub price: Option<f64>,
    /// Compact error category on failure.
    pub error: Option<String>,
}

impl OrderResult {
    /// Successful fill.
    #[must_use]
    pub const fn filled(ticket: u64, price: f64) -> Self {
        Self {
            success: true,
            ticket: Some(ticket),
            price: Some(price),
            error: None,
        }
    }

    /// Rejected with a reason code.
    #[must_use]
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            ticket: None,
            price: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(digits: u32, point: f64) -> SymbolInfo {
        SymbolInfo {
            symbol: "X".to_string(),
            point,
            digits,
            pip_value_per_lot: None,
            spread_points: 12.0,
            min_volume: 0.01,
            step_volume: 0.01,
            max_volume: 100.0,
        }
    }

    #[test]
    fn test_pip_size_five_digits() {
        let i = info(5, 0.00001);
        assert!((i.pip_size() - 0.0001).abs() < 1e-12);
        assert!((i.spread_pips() - 1.2).abs() < 1e-12);
    }

    #[test]
    fn test_pip_size_jpy() {
        let i = info(3, 0.001);
        assert!((i.pip_size() - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_pip_size_four_digits() {
        let i = info(4, 0.0001);
        assert!((i.pip_size() - 0.0001).abs() < 1e-12);
        assert!((i.spread_pips() - 12.0).abs() < 1e-12);
    }

    #[test]
    fn test_order_result_constructors() {
        let ok = OrderResult::filled(42, 1.1);
        assert!(ok.success);
        assert_eq!(ok.ticket, Some(42));

        let err = OrderResult::rejected("ORDER_REJECTED");
        assert!(!err.success);
        assert_eq!(err.error.as_deref(), Some("ORDER_REJECTED"));
    }
}
