//! Statistics over closed paper trades.

use super::account::PaperTrade;

/// Maximum peak-to-trough drawdown of the equity curve implied by the
/// trade sequence, in account currency.
#[must_use]
pub fn max_drawdown(trades: &[PaperTrade], initial_balance: f64) -> f64 {
    let mut equity = initial_balance;
    let mut peak = initial_balance;
    let mut worst = 0.0f64;
    for trade in trades {
        equity += trade.pnl;
        peak = peak.max(equity);
        worst = worst.max(peak - equity);
    }
    worst
}

/// Gross profit over gross loss. `None` while undefined (no losing
/// trades yet).
#[must_use]
pub fn profit_factor(trades: &[PaperTrade]) -> Option<f64> {
    let gross_profit: f64 = trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).sum();
    let gross_loss: f64 = trades
        .iter()
        .filter(|t| t.pnl < 0.0)
        .map(|t| -t.pnl)
        .sum();
    if gross_loss > 0.0 {
        Some(gross_profit / gross_loss)
    } else {
        None
    }
}

/// Per-trade Sharpe ratio: mean over standard deviation of trade PnL.
/// 0 when fewer than two trades or zero variance.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn sharpe_ratio(trades: &[PaperTrade]) -> f64 {
    if trades.len() < 2 {
        return 0.0;
    }
    let n = trades.len() as f64;
    let mean = trades.iter().map(|t| t.pnl).sum::<f64>() / n;
    let variance = trades
        .iter()
        .map(|t| (t.pnl - mean).powi(2))
        .sum::<f64>()
        / (n - 1.0);
    let std = variance.sqrt();
    if std == 0.0 {
        0.0
    } else {
        mean / std
    }
}

/// Percentage of winning trades (0-100).
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn win_rate(trades: &[PaperTrade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let wins = trades.iter().filter(|t| t.pnl > 0.0).count();
    wins as f64 / trades.len() as f64 * 100.0
}

/// Average PnL per trade.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn expectancy(trades: &[PaperTrade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    trades.iter().map(|t| t.pnl).sum::<f64>() / trades.len() as f64
}
