//! Trade records, real and paper, into the telemetry store.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;

use crate::models::Signal;
use crate::paper::PaperTrade;

use super::TelemetryStore;

/// Writes real and paper trades under the current session id.
pub struct TradeLogger {
    store: Arc<TelemetryStore>,
    session_id: Mutex<String>,
}

impl TradeLogger {
    /// Logger; the session id is set once the session starts.
    #[must_use]
    pub fn new(store: Arc<TelemetryStore>) -> Self {
        Self {
            store,
            session_id: Mutex::new(String::new()),
        }
    }

    /// Bind the logger to a session.
    pub async fn set_session(&self, session_id: &str) {
        *self.session_id.lock().await = session_id.to_string();
    }

    /// Record a real execution (an OPENED or CLOSED ack).
    pub async fn log_real_trade(
        &self,
        signal: &Signal,
        volume: f64,
        ticket: u64,
        comment: &str,
    ) {
        let session_id = self.session_id.lock().await.clone();
        self.store
            .insert(
                "trades",
                json!({
                    "session_id": session_id,
                    "trade_id": format!("t-{ticket}"),
                    "symbol": signal.symbol,
                    "direction": signal.direction().value(),
                    "intensity": signal.intensity(),
                    "action": signal.action.to_string(),
                    "volume": volume,
                    "hmm_state": signal.hmm_state,
                    "is_paper": false,
                    "comment": comment,
                    "timestamp": Utc::now().to_rfc3339(),
                }),
            )
            .await;
    }

    /// Record a closed paper trade.
    pub async fn log_paper_trade(&self, trade: &PaperTrade) {
        let session_id = self.session_id.lock().await.clone();
        self.store
            .insert(
                "trades",
                json!({
                    "session_id": session_id,
                    "trade_id": format!("p-{}-{}", trade.symbol, trade.exit_time),
                    "symbol": trade.symbol,
                    "direction": trade.direction,
                    "intensity": trade.intensity,
                    "volume": trade.volume,
                    "entry_price": trade.entry_price,
                    "exit_price": trade.exit_price,
                    "pnl": trade.pnl,
                    "pnl_pips": trade.pnl_pips,
                    "commission": trade.commission,
                    "hmm_state": trade.hmm_state,
                    "is_paper": true,
                    "timestamp": Utc::now().to_rfc3339(),
                }),
            )
            .await;
    }
}
