//! Signal execution against the real broker.
//!
//! Every signal produces exactly one [`Ack`], within the bound of the
//! broker request timeout. Inversions close on the signal bar and leave
//! the reopen to the missed-entry rule on a later bar.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::broker::BrokerConnector;
use crate::config::{SymbolConfig, SymbolFile};
use crate::models::{Position, Signal};
use crate::risk::{RiskGuard, SpreadMap};

/// Reason code of [`crate::risk::RiskReason::Emergency`].
const EMERGENCY_REASON: &str = "EMERGENCY";

use super::comment::AuditComment;
use super::price_converter::{ConvertError, PriceConverter};
use super::sync::{Decision, SyncState};

/// Acknowledgement outcome class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    /// Processed; no error.
    Ok,
    /// Deliberately not executed (gate, config, pause).
    Skip,
    /// Execution attempted and failed.
    Error,
}

impl std::fmt::Display for AckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Skip => write!(f, "SKIP"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// Acknowledgement for one processed signal.
#[derive(Debug, Clone)]
pub struct Ack {
    pub symbol: String,
    pub status: AckStatus,
    /// Compact reason code: `SYNCED`, `WAITING_SYNC`, `OPENED`, ...
    pub reason: String,
    pub ticket: Option<u64>,
    /// Volume involved, for OPENED/CLOSED acks.
    pub volume: Option<f64>,
}

impl Ack {
    fn ok(symbol: &str, reason: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            status: AckStatus::Ok,
            reason: reason.to_string(),
            ticket: None,
            volume: None,
        }
    }

    fn ok_with_ticket(symbol: &str, reason: &str, ticket: u64, volume: f64) -> Self {
        Self {
            ticket: Some(ticket),
            volume: Some(volume),
            ..Self::ok(symbol, reason)
        }
    }

    fn skip(symbol: &str, reason: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            status: AckStatus::Skip,
            reason: reason.to_string(),
            ticket: None,
            volume: None,
        }
    }

    fn error(symbol: &str, reason: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            status: AckStatus::Error,
            reason: reason.to_string(),
            ticket: None,
            volume: None,
        }
    }

    /// `STATUS/REASON` form used in logs and telemetry.
    #[must_use]
    pub fn code(&self) -> String {
        if self.reason.is_empty() {
            self.status.to_string()
        } else {
            format!("{}/{}", self.status, self.reason)
        }
    }
}

/// Executes signals: sync decision, risk gates, lot mapping, stop
/// conversion, order submission.
pub struct Executor {
    connector: Arc<dyn BrokerConnector>,
    symbol_configs: HashMap<String, SymbolConfig>,
    sync_states: HashMap<String, SyncState>,
    risk: RiskGuard,
    paused: bool,
    dry_run: bool,
}

impl Executor {
    /// Executor over a connector and a parsed symbol file.
    #[must_use]
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        symbol_file: SymbolFile,
        spreads: Arc<SpreadMap>,
        dry_run: bool,
    ) -> Self {
        let sync_states = symbol_file
            .symbols
            .keys()
            .map(|symbol| (symbol.clone(), SyncState::new()))
            .collect();
        Self {
            connector,
            symbol_configs: symbol_file.symbols,
            sync_states,
            risk: RiskGuard::new(symbol_file.risk, spreads),
            paused: false,
            dry_run,
        }
    }

    /// Ensure a symbol has a config (used for models without an entry
    /// in the symbol file). Existing entries are kept.
    pub fn ensure_symbol(&mut self, symbol: &str, defaults: SymbolConfig) {
        self.symbol_configs
            .entry(symbol.to_string())
            .or_insert(defaults);
        self.sync_states
            .entry(symbol.to_string())
            .or_insert_with(SyncState::new);
    }

    /// Configured symbols.
    #[must_use]
    pub fn symbols(&self) -> Vec<String> {
        let mut names: Vec<String> = self.symbol_configs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop accepting signals (they ACK `SKIP/PAUSED`).
    pub fn pause(&mut self) {
        self.paused = true;
        info!("executor paused");
    }

    /// Resume signal processing.
    pub fn resume(&mut self) {
        self.paused = false;
        info!("executor resumed");
    }

    /// Whether the executor is paused.
    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    /// Access the risk guard (orchestrator records externally-closed
    /// trade results here).
    pub fn risk_mut(&mut self) -> &mut RiskGuard {
        &mut self.risk
    }

    /// Process one signal at its bar's close price. Exactly one ACK.
    pub async fn process_signal(&mut self, signal: &Signal, close_price: f64) -> Ack {
        let symbol = signal.symbol.as_str();

        let Some(config) = self.symbol_configs.get(symbol).cloned() else {
            warn!(symbol, "no symbol config, skipping signal");
            return Ack::skip(symbol, "NO_CONFIG");
        };
        if !config.enabled {
            return Ack::skip(symbol, "DISABLED");
        }
        if self.paused {
            return Ack::skip(symbol, "PAUSED");
        }

        let real_position = match self.connector.get_position(symbol).await {
            Ok(position) => position,
            Err(e) => return Ack::error(symbol, &error_code(&e)),
        };
        let real_direction = real_position
            .as_ref()
            .map_or(0, |p| p.direction.value());

        let sync = self
            .sync_states
            .entry(symbol.to_string())
            .or_insert_with(SyncState::new);
        let outcome = sync.evaluate(real_direction, signal.direction().value());

        match outcome.decision {
            Decision::Noop => Ack::ok(symbol, "SYNCED"),
            Decision::Close => self.close_position_internal(symbol, real_position).await,
            Decision::WaitSync => {
                if outcome.should_open {
                    self.open_position(signal, &config, close_price).await
                } else {
                    Ack::ok(symbol, "WAITING_SYNC")
                }
            }
        }
    }

    async fn open_position(
        &mut self,
        signal: &Signal,
        config: &SymbolConfig,
        close_price: f64,
    ) -> Ack {
        let symbol = signal.symbol.as_str();

        let volume = config.lot_for(signal.intensity());
        if volume <= 0.0 {
            warn!(symbol, intensity = signal.intensity(), "zero lot mapping");
            return Ack::skip(symbol, "ZERO_LOT");
        }

        let account = match self.connector.get_account().await {
            Ok(account) => account,
            Err(e) => return Ack::error(symbol, &error_code(&e)),
        };
        if let Err(reason) = self.risk.check_all(symbol, volume, &account, config) {
            warn!(symbol, reason = %reason, "risk gate blocked open");
            return Ack::skip(symbol, reason.code());
        }

        let symbol_info = self.connector.get_symbol_info(symbol).await.ok();
        let direction = signal.direction().value();
        let levels = match PriceConverter::stop_levels(
            symbol,
            direction,
            close_price,
            volume,
            config.sl_usd,
            config.tp_usd,
            symbol_info.as_ref(),
        ) {
            Ok(levels) => levels,
            Err(ConvertError::UnknownPipValue(_)) => {
                warn!(symbol, "pip value unknown, refusing to place stops");
                return Ack::skip(symbol, "UNKNOWN_PIP_VALUE");
            }
            Err(e) => return Ack::error(symbol, &format!("CONVERT:{e}")),
        };

        let comment = AuditComment::build(
            signal.hmm_state,
            signal.action.index(),
            signal.intensity(),
            account.balance,
            self.risk.drawdown_pct(&account),
            signal.virtual_pnl,
        );

        if self.dry_run {
            info!(
                symbol,
                direction,
                volume,
                sl = levels.sl,
                tp = levels.tp,
                "dry run, order suppressed"
            );
            return Ack::skip(symbol, "DRY_RUN");
        }

        info!(
            symbol,
            direction,
            volume,
            sl = levels.sl,
            tp = levels.tp,
            price = close_price,
            "opening position"
        );
        match self
            .connector
            .open_order(symbol, direction, volume, levels.sl, levels.tp, &comment)
            .await
        {
            Ok(result) if result.success => {
                let ticket = result.ticket.unwrap_or(0);
                info!(symbol, ticket, "position opened");
                Ack::ok_with_ticket(symbol, "OPENED", ticket, volume)
            }
            Ok(result) => {
                let code = result.error.unwrap_or_else(|| "REJECTED".to_string());
                warn!(symbol, code, "open rejected");
                Ack::error(symbol, &code)
            }
            Err(e) => Ack::error(symbol, &error_code(&e)),
        }
    }

    async fn close_position_internal(&mut self, symbol: &str, position: Option<Position>) -> Ack {
        let Some(position) = position else {
            return Ack::ok(symbol, "ALREADY_FLAT");
        };

        match self.connector.close_order(position.ticket, 0.0).await {
            Ok(result) if result.success => {
                self.risk.record_result(position.pnl);
                info!(
                    symbol,
                    ticket = position.ticket,
                    pnl = position.pnl,
                    "position closed"
                );
                Ack::ok_with_ticket(symbol, "CLOSED", position.ticket, position.volume)
            }
            Ok(result) => {
                let code = result.error.unwrap_or_else(|| "REJECTED".to_string());
                warn!(symbol, ticket = position.ticket, code, "close rejected");
                Ack::error(symbol, &code)
            }
            Err(e) => Ack::error(symbol, &error_code(&e)),
        }
    }

    /// Close the position on one symbol, if any.
    pub async fn close_position(&mut self, symbol: &str) -> bool {
        match self.connector.get_position(symbol).await {
            Ok(Some(position)) => matches!(
                self.connector.close_order(position.ticket, 0.0).await,
                Ok(result) if result.success
            ),
            _ => false,
        }
    }

    /// Flatten everything. Returns how many positions closed.
    pub async fn close_all(&mut self) -> usize {
        let positions = match self.connector.get_positions().await {
            Ok(positions) => positions,
            Err(e) => {
                warn!(error = %e, "close_all: could not list positions");
                return 0;
            }
        };
        let total = positions.len();
        let mut closed = 0;
        for position in positions {
            match self.connector.close_order(position.ticket, 0.0).await {
                Ok(result) if result.success => closed += 1,
                Ok(_) | Err(_) => {
                    warn!(ticket = position.ticket, "close_all: close failed");
                }
            }
        }
        info!(closed, total, "close_all finished");
        closed
    }

    /// Whether an ACK reason is the emergency drawdown code (the
    /// orchestrator reacts by flattening and halting).
    #[must_use]
    pub fn is_emergency_reason(reason: &str) -> bool {
        reason == EMERGENCY_REASON
    }
}

fn error_code(error: &crate::broker::BrokerError) -> String {
    use crate::broker::BrokerError;
    match error {
        BrokerError::ConnectionLost => "CONNECTION_LOST".to_string(),
        BrokerError::RequestTimeout { .. } => "REQUEST_TIMEOUT".to_string(),
        BrokerError::AuthenticationFailed(_) => "AUTH_FAILED".to_string(),
        BrokerError::OrderRejected { code } => format!("REJECTED:{code}"),
        BrokerError::SymbolNotFound(_) => "SYMBOL_NOT_FOUND".to_string(),
        BrokerError::Protocol(code) => format!("PROTOCOL:{code}"),
        BrokerError::NotConnected => "NOT_CONNECTED".to_string(),
        BrokerError::Cancelled => "CANCELLED".to_string(),
    }
}
