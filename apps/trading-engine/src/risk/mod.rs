//! Pre-trade risk gates.
//!
//! Gates run in a fixed order and the first failure short-circuits:
//! drawdown, margin, spread, circuit breaker. A failed gate never hides
//! a more severe one behind it — drawdown is always evaluated first.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::config::SymbolConfig;
use crate::models::AccountInfo;

/// Risk parameters from the `_risk` entry of the symbol config file.
#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_dd_limit")]
    pub dd_limit_pct: f64,
    #[serde(default = "default_dd_emergency")]
    pub dd_emergency_pct: f64,
    #[serde(default)]
    pub initial_balance: f64,
    #[serde(default = "default_max_losses")]
    pub max_consecutive_losses: u32,
    /// Conservative margin estimate per lot, account currency.
    #[serde(default = "default_margin_per_lot")]
    pub margin_per_lot: f64,
    /// Circuit-breaker cooldown before the loss counter re-arms.
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u64,
    /// Development escape hatch: treat an unknown spread as passing.
    /// Production stays fail-closed.
    #[serde(default)]
    pub spread_fail_open: bool,
}

fn default_dd_limit() -> f64 {
    5.0
}
fn default_dd_emergency() -> f64 {
    10.0
}
fn default_max_losses() -> u32 {
    5
}
fn default_margin_per_lot() -> f64 {
    1000.0
}
fn default_cooldown_minutes() -> u64 {
    60
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            dd_limit_pct: default_dd_limit(),
            dd_emergency_pct: default_dd_emergency(),
            initial_balance: 0.0,
            max_consecutive_losses: default_max_losses(),
            margin_per_lot: default_margin_per_lot(),
            cooldown_minutes: default_cooldown_minutes(),
            spread_fail_open: false,
        }
    }
}

/// Why a gate blocked the open.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskReason {
    /// Emergency drawdown breached: the orchestrator flattens and halts.
    #[error("emergency drawdown {dd_pct:.1}% >= {threshold_pct:.1}%")]
    Emergency { dd_pct: f64, threshold_pct: f64 },

    /// Soft drawdown breached: no new opens, existing positions stay
    /// managed.
    #[error("drawdown {dd_pct:.1}% >= {threshold_pct:.1}%")]
    DrawdownLimit { dd_pct: f64, threshold_pct: f64 },

    /// Estimated margin exceeds free margin.
    #[error("free margin {free:.2} < required {required:.2}")]
    InsufficientMargin { free: f64, required: f64 },

    /// Live spread above the per-symbol ceiling.
    #[error("spread {spread_pips:.1} pips > max {max_pips:.1}")]
    SpreadExceeded { spread_pips: f64, max_pips: f64 },

    /// No live spread reading and the policy is fail-closed.
    #[error("spread unknown")]
    SpreadUnknown,

    /// Too many consecutive losses; cooling down.
    #[error("circuit breaker open after {losses} consecutive losses")]
    CircuitBreakerOpen { losses: u32 },
}

impl RiskReason {
    /// Compact reason code for ACKs and telemetry.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Emergency { .. } => "EMERGENCY",
            Self::DrawdownLimit { .. } => "DD_LIMIT",
            Self::InsufficientMargin { .. } => "MARGIN",
            Self::SpreadExceeded { .. } => "SPREAD",
            Self::SpreadUnknown => "SPREAD_UNKNOWN",
            Self::CircuitBreakerOpen { .. } => "CIRCUIT_BREAKER",
        }
    }
}

/// Live spreads in pips, published by the orchestrator's refresh loop
/// and read by the guard. Eventually consistent.
#[derive(Debug, Default)]
pub struct SpreadMap {
    spreads: RwLock<HashMap<String, f64>>,
}

impl SpreadMap {
    /// Empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a fresh spread reading.
    pub fn publish(&self, symbol: &str, spread_pips: f64) {
        self.spreads.write().insert(symbol.to_string(), spread_pips);
    }

    /// Latest published spread for a symbol.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<f64> {
        self.spreads.read().get(symbol).copied()
    }
}

/// Pre-trade gate evaluator. Owned exclusively by the executor.
#[derive(Debug)]
pub struct RiskGuard {
    config: RiskConfig,
    spreads: Arc<SpreadMap>,
    consecutive_losses: u32,
    tripped_at: Option<Instant>,
}

impl RiskGuard {
    /// Guard reading live spreads from the shared map.
    #[must_use]
    pub const fn new(config: RiskConfig, spreads: Arc<SpreadMap>) -> Self {
        Self {
            config,
            spreads,
            consecutive_losses: 0,
            tripped_at: None,
        }
    }

    /// Configured initial balance for drawdown math.
    #[must_use]
    pub const fn initial_balance(&self) -> f64 {
        self.config.initial_balance
    }

    /// Current drawdown percent against the configured initial balance.
    #[must_use]
    pub fn drawdown_pct(&self, account: &AccountInfo) -> f64 {
        if self.config.initial_balance <= 0.0 {
            return 0.0;
        }
        (self.config.initial_balance - account.equity) / self.config.initial_balance * 100.0
    }

    /// Losses recorded since the last win.
    #[must_use]
    pub const fn consecutive_losses(&self) -> u32 {
        self.consecutive_losses
    }

    /// Run every gate in order; first failure wins.
    ///
    /// # Errors
    ///
    /// The blocking [`RiskReason`].
    pub fn check_all(
        &mut self,
        symbol: &str,
        volume: f64,
        account: &AccountInfo,
        symbol_config: &SymbolConfig,
    ) -> Result<(), RiskReason> {
        self.check_drawdown(account)?;
        self.check_margin(account, volume)?;
        self.check_spread(symbol, symbol_config)?;
        self.check_circuit_breaker()?;
        Ok(())
    }

    fn check_drawdown(&self, account: &AccountInfo) -> Result<(), RiskReason> {
        if self.config.initial_balance <= 0.0 {
            return Ok(());
        }
        let dd_pct = self.drawdown_pct(account);
        if dd_pct >= self.config.dd_emergency_pct {
            return Err(RiskReason::Emergency {
                dd_pct,
                threshold_pct: self.config.dd_emergency_pct,
            });
        }
        if dd_pct >= self.config.dd_limit_pct {
            return Err(RiskReason::DrawdownLimit {
                dd_pct,
                threshold_pct: self.config.dd_limit_pct,
            });
        }
        Ok(())
    }

    fn check_margin(&self, account: &AccountInfo, volume: f64) -> Result<(), RiskReason> {
        let required = volume * self.config.margin_per_lot;
        if account.free_margin < required {
            return Err(RiskReason::InsufficientMargin {
                free: account.free_margin,
                required,
            });
        }
        Ok(())
    }

    fn check_spread(&self, symbol: &str, config: &SymbolConfig) -> Result<(), RiskReason> {
        let Some(spread_pips) = self.spreads.get(symbol) else {
            if self.config.spread_fail_open {
                warn!(symbol, "spread unknown, fail-open policy lets the order pass");
                return Ok(());
            }
            return Err(RiskReason::SpreadUnknown);
        };
        if spread_pips > config.max_spread_pips {
            return Err(RiskReason::SpreadExceeded {
                spread_pips,
                max_pips: config.max_spread_pips,
            });
        }
        Ok(())
    }

    fn check_circuit_breaker(&mut self) -> Result<(), RiskReason> {
        if self.consecutive_losses < self.config.max_consecutive_losses {
            return Ok(());
        }
        let cooldown = Duration::from_secs(self.config.cooldown_minutes * 60);
        match self.tripped_at {
            None => {
                self.tripped_at = Some(Instant::now());
                Err(RiskReason::CircuitBreakerOpen {
                    losses: self.consecutive_losses,
                })
            }
            Some(tripped) if tripped.elapsed() >= cooldown => {
                // Cooldown served: re-arm.
                self.consecutive_losses = 0;
                self.tripped_at = None;
                Ok(())
            }
            Some(_) => Err(RiskReason::CircuitBreakerOpen {
                losses: self.consecutive_losses,
            }),
        }
    }

    /// Feed a realized trade result into the loss counter.
    pub fn record_result(&mut self, pnl: f64) {
        if pnl < 0.0 {
            self.consecutive_losses += 1;
        } else {
            self.consecutive_losses = 0;
            self.tripped_at = None;
        }
    }

    /// Operator override: clear the breaker immediately.
    pub fn reset_circuit_breaker(&mut self) {
        self.consecutive_losses = 0;
        self.tripped_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(equity: f64, free_margin: f64) -> AccountInfo {
        AccountInfo {
            balance: equity,
            equity,
            margin: 0.0,
            free_margin,
            margin_level: 0.0,
            currency: "USD".to_string(),
        }
    }

    fn symbol_config(max_spread: f64) -> SymbolConfig {
        SymbolConfig {
            max_spread_pips: max_spread,
            ..SymbolConfig::default()
        }
    }

    fn guard(config: RiskConfig) -> (RiskGuard, Arc<SpreadMap>) {
        let spreads = Arc::new(SpreadMap::new());
        (RiskGuard::new(config, Arc::clone(&spreads)), spreads)
    }

    fn risk_config() -> RiskConfig {
        RiskConfig {
            initial_balance: 10_000.0,
            ..RiskConfig::default()
        }
    }

    #[test]
    fn test_all_gates_pass() {
        let (mut guard, spreads) = guard(risk_config());
        spreads.publish("EURUSD", 1.0);
        let result = guard.check_all("EURUSD", 0.03, &account(10_000.0, 9_000.0), &symbol_config(2.0));
        assert!(result.is_ok());
    }

    #[test]
    fn test_emergency_drawdown_fires_first() {
        let (mut guard, _spreads) = guard(risk_config());
        // Equity 8,900 of 10,000: dd = 11%. Spread is unknown too, but
        // drawdown is evaluated first.
        let err = guard
            .check_all("EURUSD", 0.03, &account(8_900.0, 0.0), &symbol_config(2.0))
            .unwrap_err();
        assert!(matches!(err, RiskReason::Emergency { .. }));
        assert_eq!(err.code(), "EMERGENCY");
    }

    #[test]
    fn test_soft_drawdown_blocks() {
        let (mut guard, spreads) = guard(risk_config());
        spreads.publish("EURUSD", 1.0);
        // dd = 6%: above the 5% limit, below the 10% emergency.
        let err = guard
            .check_all("EURUSD", 0.03, &account(9_400.0, 9_000.0), &symbol_config(2.0))
            .unwrap_err();
        assert!(matches!(err, RiskReason::DrawdownLimit { .. }));
    }

    #[test]
    fn test_margin_gate() {
        let (mut guard, spreads) = guard(risk_config());
        spreads.publish("EURUSD", 1.0);
        // 0.05 lots * 1000 margin/lot = 50 required, only 30 free.
        let err = guard
            .check_all("EURUSD", 0.05, &account(10_000.0, 30.0), &symbol_config(2.0))
            .unwrap_err();
        assert!(matches!(err, RiskReason::InsufficientMargin { .. }));
    }

    #[test]
    fn test_spread_unknown_fail_closed() {
        let (mut guard, _spreads) = guard(risk_config());
        let err = guard
            .check_all("EURUSD", 0.01, &account(10_000.0, 9_000.0), &symbol_config(2.0))
            .unwrap_err();
        assert_eq!(err, RiskReason::SpreadUnknown);
    }

    #[test]
    fn test_spread_unknown_fail_open_when_configured() {
        let (mut guard, _spreads) = guard(RiskConfig {
            spread_fail_open: true,
            ..risk_config()
        });
        assert!(guard
            .check_all("EURUSD", 0.01, &account(10_000.0, 9_000.0), &symbol_config(2.0))
            .is_ok());
    }

    #[test]
    fn test_spread_ceiling() {
        let (mut guard, spreads) = guard(risk_config());
        spreads.publish("EURUSD", 3.5);
        let err = guard
            .check_all("EURUSD", 0.01, &account(10_000.0, 9_000.0), &symbol_config(2.0))
            .unwrap_err();
        assert!(matches!(err, RiskReason::SpreadExceeded { .. }));
    }

    #[test]
    fn test_circuit_breaker_trips_and_cools_down() {
        let (mut guard, spreads) = guard(RiskConfig {
            max_consecutive_losses: 2,
            cooldown_minutes: 0, // immediate re-arm for the test
            ..risk_config()
        });
        spreads.publish("EURUSD", 1.0);
        let ok_account = account(10_000.0, 9_000.0);
        let config = symbol_config(2.0);

        guard.record_result(-5.0);
        guard.record_result(-3.0);
        // First check trips the breaker and starts the cooldown clock.
        let err = guard.check_all("EURUSD", 0.01, &ok_account, &config).unwrap_err();
        assert!(matches!(err, RiskReason::CircuitBreakerOpen { losses: 2 }));

        // Zero cooldown: next check re-arms.
        assert!(guard.check_all("EURUSD", 0.01, &ok_account, &config).is_ok());
        assert_eq!(guard.consecutive_losses(), 0);
    }

    #[test]
    fn test_breaker_stays_open_during_cooldown() {
        let (mut guard, spreads) = guard(RiskConfig {
            max_consecutive_losses: 1,
            cooldown_minutes: 60,
            ..risk_config()
        });
        spreads.publish("EURUSD", 1.0);
        let ok_account = account(10_000.0, 9_000.0);
        let config = symbol_config(2.0);

        guard.record_result(-5.0);
        assert!(guard.check_all("EURUSD", 0.01, &ok_account, &config).is_err());
        assert!(guard.check_all("EURUSD", 0.01, &ok_account, &config).is_err());
    }

    #[test]
    fn test_win_resets_loss_counter() {
        let (mut guard, _spreads) = guard(risk_config());
        guard.record_result(-1.0);
        guard.record_result(-1.0);
        guard.record_result(2.0);
        assert_eq!(guard.consecutive_losses(), 0);
    }

    #[test]
    fn test_gate_order_margin_before_spread() {
        // Margin fails while spread is unknown: margin reason wins,
        // confirming the fixed ordering.
        let (mut guard, _spreads) = guard(risk_config());
        let err = guard
            .check_all("EURUSD", 1.0, &account(10_000.0, 10.0), &symbol_config(2.0))
            .unwrap_err();
        assert!(matches!(err, RiskReason::InsufficientMargin { .. }));
    }
}
