//! Session lifecycle: start, heartbeat, crash recovery, day boundary.
//!
//! A small `.session_state` JSON file survives the process. On startup
//! a file whose status is still RUNNING means the previous run died
//! without a clean shutdown: its session id is recovered so the audit
//! trail stays continuous.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use super::TelemetryStore;

/// Local state file name.
pub const STATE_FILE: &str = ".session_state";

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionEndReason {
    Normal,
    Emergency,
    DayChange,
    Recovered,
    Manual,
    Unknown,
}

impl std::fmt::Display for SessionEndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Normal => "NORMAL",
            Self::Emergency => "EMERGENCY",
            Self::DayChange => "DAY_CHANGE",
            Self::Recovered => "RECOVERED",
            Self::Manual => "MANUAL",
            Self::Unknown => "UNKNOWN",
        };
        write!(f, "{name}")
    }
}

/// Closing statistics reported when a session ends.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    pub balance: f64,
    pub total_trades: usize,
    pub total_pnl: f64,
}

/// Persisted shape of the state file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedSession {
    session_id: String,
    start_time: String,
    initial_balance: f64,
    symbols: Vec<String>,
    status: String,
    #[serde(default)]
    last_heartbeat: Option<String>,
    #[serde(default)]
    current_balance: f64,
}

#[derive(Debug, Default)]
struct SessionData {
    session_id: String,
    start_time: Option<DateTime<Utc>>,
    day_start: Option<DateTime<Utc>>,
    recovered: bool,
    running: bool,
}

/// Process-wide session singleton.
pub struct SessionManager {
    store: Arc<TelemetryStore>,
    state_path: PathBuf,
    data: Mutex<SessionData>,
}

impl SessionManager {
    /// Manager persisting next to `base_dir`.
    #[must_use]
    pub fn new(store: Arc<TelemetryStore>, base_dir: &std::path::Path) -> Self {
        Self {
            store,
            state_path: base_dir.join(STATE_FILE),
            data: Mutex::new(SessionData::default()),
        }
    }

    /// Start or recover a session; returns the session id.
    pub async fn start_session(&self, initial_balance: f64, symbols: Vec<String>) -> String {
        let mut data = self.data.lock().await;
        let now = Utc::now();

        if let Some(previous) = self.load_state() {
            if previous.status == "RUNNING" {
                data.session_id = previous.session_id.clone();
                data.start_time = Some(now);
                data.day_start = Some(day_start(now));
                data.recovered = true;
                data.running = true;
                drop(data);

                warn!(session_id = %previous.session_id, "recovering crashed session");
                self.store
                    .log_event(
                        "SESSION_RECOVERED",
                        json!({"session_id": previous.session_id}),
                        &previous.session_id,
                    )
                    .await;
                return previous.session_id;
            }
        }

        let session_id = Uuid::new_v4().to_string()[..8].to_string();
        data.session_id = session_id.clone();
        data.start_time = Some(now);
        data.day_start = Some(day_start(now));
        data.recovered = false;
        data.running = true;
        drop(data);

        self.save_state(&PersistedSession {
            session_id: session_id.clone(),
            start_time: now.to_rfc3339(),
            initial_balance,
            symbols: symbols.clone(),
            status: "RUNNING".to_string(),
            last_heartbeat: None,
            current_balance: initial_balance,
        });

        self.store
            .insert(
                "sessions",
                json!({
                    "session_id": session_id,
                    "start_time": now.to_rfc3339(),
                    "initial_balance": initial_balance,
                    "symbols": symbols,
                    "status": "RUNNING",
                }),
            )
            .await;

        info!(session_id = %session_id, "session started");
        session_id
    }

    /// End the session, report stats, and clear the local state file.
    pub async fn end_session(&self, stats: SessionStats, reason: SessionEndReason) {
        let session_id = {
            let mut data = self.data.lock().await;
            if !data.running {
                return;
            }
            data.running = false;
            data.session_id.clone()
        };

        self.store
            .insert(
                "sessions",
                json!({
                    "session_id": session_id,
                    "end_time": Utc::now().to_rfc3339(),
                    "final_balance": stats.balance,
                    "total_trades": stats.total_trades,
                    "total_pnl": stats.total_pnl,
                    "end_reason": reason.to_string(),
                    "status": "STOPPED",
                }),
            )
            .await;

        self.clear_state();
        info!(session_id = %session_id, reason = %reason, "session ended");
    }

    /// Current session id (empty before start).
    pub async fn session_id(&self) -> String {
        self.data.lock().await.session_id.clone()
    }

    /// Whether this run recovered a crashed session.
    pub async fn is_recovered(&self) -> bool {
        self.data.lock().await.recovered
    }

    /// Session uptime in seconds.
    pub async fn uptime_secs(&self) -> u64 {
        let data = self.data.lock().await;
        data.start_time
            .map(|start| (Utc::now() - start).num_seconds().max(0))
            .and_then(|secs| u64::try_from(secs).ok())
            .unwrap_or(0)
    }

    /// Refresh the heartbeat fields of the state file.
    pub async fn update_heartbeat(&self, balance: f64) {
        let running = self.data.lock().await.running;
        if !running {
            return;
        }
        if let Some(mut state) = self.load_state() {
            state.last_heartbeat = Some(Utc::now().to_rfc3339());
            state.current_balance = balance;
            state.status = "RUNNING".to_string();
            self.save_state(&state);
        }
    }

    /// True exactly once per UTC day change.
    pub async fn check_day_boundary(&self) -> bool {
        let mut data = self.data.lock().await;
        let today = day_start(Utc::now());
        match data.day_start {
            None => {
                data.day_start = Some(today);
                false
            }
            Some(previous) if today > previous => {
                data.day_start = Some(today);
                true
            }
            Some(_) => false,
        }
    }

    fn load_state(&self) -> Option<PersistedSession> {
        let raw = std::fs::read_to_string(&self.state_path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    fn save_state(&self, state: &PersistedSession) {
        match serde_json::to_string_pretty(state) {
            Ok(raw) => {
                if let Err(e) = std::fs::write(&self.state_path, raw) {
                    warn!(error = %e, "session state write failed");
                }
            }
            Err(e) => warn!(error = %e, "session state serialize failed"),
        }
    }

    fn clear_state(&self) {
        if self.state_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.state_path) {
                warn!(error = %e, "session state remove failed");
            }
        }
    }
}

fn day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map_or(now, |naive| naive.and_utc())
}

/// Convenience for tests and tooling: read the raw persisted state.
#[must_use]
pub fn read_state_file(base_dir: &std::path::Path) -> Option<HashMap<String, serde_json::Value>> {
    let raw = std::fs::read_to_string(base_dir.join(STATE_FILE)).ok()?;
    serde_json::from_str(&raw).ok()
}
