//! System assembly and lifecycle.
//!
//! Bootstrap order matters and is fixed: persistence, predictor
//! (models), connector (bridge installed before any broker call),
//! executor, paper trader, initial position sync, warmup
//! fast-forward, session start, then the concurrent loops. Shutdown is
//! two-phase: cancel stops intake at every suspension point, then the
//! cleanup (optional flatten, session end, disconnect) runs under a
//! grace timeout.

mod health;

pub use health::{HealthMonitor, HealthReport};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::broker::{BrokerConnector, BrokerEvent, MockConnector, RealConnector};
use crate::config::{BrokerSection, Config, SymbolConfig};
use crate::error::FatalError;
use crate::execution::Executor;
use crate::models::Bar;
use crate::paper::PaperTrader;
use crate::persistence::{
    SessionEndReason, SessionManager, SessionStats, TelemetryStore, TradeLogger,
};
use crate::predictor::Predictor;
use crate::risk::SpreadMap;

/// Spread refresh cadence.
const SPREAD_REFRESH_SECS: u64 = 30;
/// Health evaluation cadence.
const HEALTH_CHECK_SECS: u64 = 30;
/// Telemetry retry cadence.
const PERSISTENCE_RETRY_SECS: u64 = 300;
/// Paper analytics cadence inside the heartbeat loop.
const ANALYTICS_SECS: u64 = 30;
/// Shutdown grace bound.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Owns every subsystem and drives the concurrent loops.
pub struct Orchestrator {
    config: Config,
    dry_run: bool,
    cancel: CancellationToken,
    /// Separate token for the broker bridge so the shutdown sequence
    /// (flatten, final account read, disconnect) can still issue
    /// requests after the loops have been cancelled.
    broker_cancel: CancellationToken,
}

struct Runtime {
    connector: Arc<dyn BrokerConnector>,
    predictor: Predictor,
    executor: Arc<Mutex<Executor>>,
    paper: Arc<SyncMutex<PaperTrader>>,
    store: Arc<TelemetryStore>,
    sessions: Arc<SessionManager>,
    trade_logger: Arc<TradeLogger>,
    health: Arc<HealthMonitor>,
    spreads: Arc<SpreadMap>,
}

impl Orchestrator {
    /// Orchestrator for a validated configuration.
    #[must_use]
    pub fn new(config: Config, dry_run: bool) -> Self {
        Self {
            config,
            dry_run,
            cancel: CancellationToken::new(),
            broker_cancel: CancellationToken::new(),
        }
    }

    /// Token external signal handling cancels to request shutdown.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Bring the system up, run until shutdown, clean up. Returns the
    /// session end reason.
    ///
    /// # Errors
    ///
    /// [`FatalError`] when a bootstrap step fails.
    pub async fn run(mut self) -> Result<SessionEndReason, FatalError> {
        info!(version = env!("CARGO_PKG_VERSION"), "trading engine starting");

        // 1. Persistence.
        let store = Arc::new(TelemetryStore::new(self.config.persistence.clone()));
        let sessions = Arc::new(SessionManager::new(Arc::clone(&store), Path::new(".")));
        let trade_logger = Arc::new(TradeLogger::new(Arc::clone(&store)));
        info!("persistence initialized");

        // 2. Predictor: load every bundle in the models directory; a
        // bad bundle skips that symbol, the rest continue.
        let mut predictor = Predictor::new();
        self.load_models(&mut predictor);
        let symbols = predictor.symbols();
        info!(models = symbols.len(), "predictor initialized");
        if symbols.is_empty() {
            warn!("no model bundles loaded, engine will idle");
        }

        // 3. Connector. The bridge's event loop is installed inside
        // connect(), strictly before any other broker call.
        let connector = self.build_connector();
        let mut events = connector
            .take_events()
            .ok_or_else(|| FatalError::Init("broker event stream already taken".to_string()))?;
        connector
            .connect()
            .await
            .map_err(|e| FatalError::Init(format!("broker connect failed: {e}")))?;
        info!("broker connected");

        // 4. Executor.
        let spreads = Arc::new(SpreadMap::new());
        let symbol_file = crate::config::load_symbol_file(&self.config.paths.executor_config)?;
        let mut executor = Executor::new(
            Arc::clone(&connector),
            symbol_file,
            Arc::clone(&spreads),
            self.dry_run,
        );
        for symbol in &symbols {
            executor.ensure_symbol(symbol, SymbolConfig::default());
        }
        let executor = Arc::new(Mutex::new(executor));
        info!("executor initialized");

        // 5. Paper trader, costed from each bundle's metadata.
        let mut paper = PaperTrader::new(self.config.trading.initial_balance);
        for symbol in &symbols {
            if let Some(costs) = predictor.training_costs(symbol) {
                paper.register(symbol, costs);
            }
        }
        let paper = Arc::new(SyncMutex::new(paper));

        // 6. Initial position sync: orphans are surfaced, not touched.
        self.sync_initial_state(connector.as_ref(), &symbols).await;

        // 7. Warmup fast-forward.
        self.warmup(connector.as_ref(), &mut predictor).await;

        // 8. Live subscriptions.
        self.subscribe(connector.as_ref(), &predictor).await?;

        // 9. Session.
        let session_id = sessions
            .start_session(self.config.trading.initial_balance, symbols.clone())
            .await;
        trade_logger.set_session(&session_id).await;

        // 10. Concurrent loops.
        let health = Arc::new(HealthMonitor::new(self.config.health.clone()));
        let runtime = Runtime {
            connector,
            predictor,
            executor,
            paper,
            store,
            sessions,
            trade_logger,
            health,
            spreads,
        };
        self.spawn_spread_loop(&runtime);
        self.spawn_health_loop(&runtime);
        self.spawn_persistence_loop(&runtime);
        self.spawn_heartbeat_loop(&runtime);

        info!(session_id = %session_id, "system ready");
        let reason = self.event_loop(runtime, &mut events).await;
        Ok(reason)
    }

    fn load_models(&self, predictor: &mut Predictor) {
        let dir = &self.config.paths.models_dir;
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "models directory unreadable");
                return;
            }
        };
        let mut archives: Vec<_> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "zip"))
            .collect();
        archives.sort();
        for archive in archives {
            match predictor.load_model(&archive) {
                Ok(symbol) => info!(symbol, archive = %archive.display(), "model loaded"),
                Err(e) => {
                    // One bad bundle must not take the others down.
                    error!(archive = %archive.display(), error = %e, "model load failed, symbol skipped");
                }
            }
        }
    }

    fn build_connector(&self) -> Arc<dyn BrokerConnector> {
        match &self.config.broker {
            BrokerSection::Real(real) => Arc::new(RealConnector::new(
                real.clone(),
                self.broker_cancel.clone(),
            )),
            BrokerSection::Mock => Arc::new(MockConnector::new()),
        }
    }

    async fn sync_initial_state(&self, connector: &dyn BrokerConnector, symbols: &[String]) {
        match connector.get_positions().await {
            Ok(positions) => {
                for position in positions {
                    if symbols.contains(&position.symbol) {
                        info!(
                            symbol = %position.symbol,
                            ticket = position.ticket,
                            direction = position.direction.value(),
                            volume = position.volume,
                            "existing position found"
                        );
                    } else {
                        warn!(
                            symbol = %position.symbol,
                            ticket = position.ticket,
                            "orphan position (no model), leaving untouched"
                        );
                    }
                }
            }
            Err(e) => warn!(error = %e, "initial position sync failed"),
        }
    }

    async fn warmup(&self, connector: &dyn BrokerConnector, predictor: &mut Predictor) {
        let warmup_bars = self.config.trading.warmup_bars;
        for symbol in predictor.symbols() {
            let Some(timeframe) = predictor.timeframe(&symbol) else {
                continue;
            };
            match connector.get_history(&symbol, timeframe, warmup_bars).await {
                Ok(bars) => {
                    let predicted = predictor.warmup(&symbol, &bars);
                    info!(symbol, bars = bars.len(), predicted, "warmup finished");
                }
                Err(e) => warn!(symbol, error = %e, "warmup history fetch failed"),
            }
        }
    }

    async fn subscribe(
        &self,
        connector: &dyn BrokerConnector,
        predictor: &Predictor,
    ) -> Result<(), FatalError> {
        use std::collections::HashMap;
        let mut by_timeframe: HashMap<crate::models::Timeframe, Vec<String>> = HashMap::new();
        for symbol in predictor.symbols() {
            if let Some(timeframe) = predictor.timeframe(&symbol) {
                by_timeframe.entry(timeframe).or_default().push(symbol);
            }
        }
        for (timeframe, symbols) in by_timeframe {
            connector
                .subscribe_bars(&symbols, timeframe)
                .await
                .map_err(|e| FatalError::Init(format!("subscribe failed: {e}")))?;
        }
        Ok(())
    }

    /// Main loop: consumes broker events until cancellation or an
    /// emergency, then runs the bounded shutdown sequence.
    async fn event_loop(
        &mut self,
        mut runtime: Runtime,
        events: &mut mpsc::Receiver<BrokerEvent>,
    ) -> SessionEndReason {
        let mut end_reason = SessionEndReason::Normal;

        loop {
            let event = tokio::select! {
                () = self.cancel.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                warn!("broker event stream closed");
                break;
            };

            match event {
                BrokerEvent::BarClosed(bar) => {
                    if self.process_bar(&mut runtime, &bar).await {
                        end_reason = SessionEndReason::Emergency;
                        break;
                    }
                }
                BrokerEvent::ExternalClose { ticket, symbol, pnl } => {
                    warn!(symbol = %symbol, ticket, pnl, "position closed broker-side");
                    runtime.executor.lock().await.risk_mut().record_result(pnl);
                    let session_id = runtime.sessions.session_id().await;
                    runtime
                        .store
                        .log_event(
                            "EXTERNAL_CLOSE",
                            json!({"symbol": symbol, "ticket": ticket, "pnl": pnl}),
                            &session_id,
                        )
                        .await;
                }
                BrokerEvent::Disconnected => {
                    warn!("broker disconnected, bridge is reconnecting");
                }
                BrokerEvent::Reconnected => {
                    info!("broker reconnected, subscriptions replayed");
                }
                BrokerEvent::Tick(_) => {}
            }
        }

        // Intake is stopped; stop every background loop too (idempotent
        // when shutdown was signal-initiated), then drain bounded. The
        // broker token stays live so the cleanup can still flatten.
        self.cancel.cancel();
        let shutdown = self.shutdown(&runtime, end_reason);
        if tokio::time::timeout(SHUTDOWN_GRACE, shutdown).await.is_err() {
            error!("shutdown grace period exceeded, exiting anyway");
        }
        self.broker_cancel.cancel();
        end_reason
    }

    /// Process one closed bar end to end. Returns true when an
    /// emergency was raised.
    async fn process_bar(&self, runtime: &mut Runtime, bar: &Bar) -> bool {
        let Some(signal) = runtime.predictor.process_bar(bar) else {
            return false;
        };

        let ack = runtime
            .executor
            .lock()
            .await
            .process_signal(&signal, bar.close)
            .await;

        let paper_trade = runtime.paper.lock().process_signal(&signal, bar);
        if let Some(trade) = &paper_trade {
            runtime.trade_logger.log_paper_trade(trade).await;
        }
        if ack.reason == "OPENED" || ack.reason == "CLOSED" {
            runtime
                .trade_logger
                .log_real_trade(
                    &signal,
                    ack.volume.unwrap_or(0.0),
                    ack.ticket.unwrap_or(0),
                    &ack.code(),
                )
                .await;
        }

        info!(
            symbol = %signal.symbol,
            action = %signal.action,
            hmm_state = signal.hmm_state,
            virtual_pnl = format!("{:.2}", signal.virtual_pnl),
            exec = %ack.code(),
            "bar processed"
        );
        runtime.health.update(&signal.symbol);

        if ack.status == crate::execution::AckStatus::Skip && Executor::is_emergency_reason(&ack.reason)
        {
            error!("emergency drawdown tripped, flattening all positions");
            let closed = runtime.executor.lock().await.close_all().await;
            let session_id = runtime.sessions.session_id().await;
            runtime
                .store
                .log_event("EMERGENCY_FLATTEN", json!({"closed": closed}), &session_id)
                .await;
            return true;
        }
        false
    }

    fn spawn_spread_loop(&self, runtime: &Runtime) {
        let connector = Arc::clone(&runtime.connector);
        let spreads = Arc::clone(&runtime.spreads);
        let symbols = runtime.predictor.symbols();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(SPREAD_REFRESH_SECS));
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                for symbol in &symbols {
                    // Spread is live data: bypass the metadata TTL.
                    connector.invalidate_symbol_cache(Some(symbol));
                    match connector.get_symbol_info(symbol).await {
                        Ok(info) => spreads.publish(symbol, info.spread_pips()),
                        Err(e) => {
                            tracing::debug!(symbol, error = %e, "spread refresh failed");
                        }
                    }
                }
            }
        });
    }

    fn spawn_health_loop(&self, runtime: &Runtime) {
        let connector = Arc::clone(&runtime.connector);
        let health = Arc::clone(&runtime.health);
        let store = Arc::clone(&runtime.store);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(HEALTH_CHECK_SECS));
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                let report = health.check(connector.is_connected(), store.pending_count().await);
                if !report.healthy {
                    warn!(issues = ?report.issues, memory_mb = report.memory_mb, "health degraded");
                }
            }
        });
    }

    fn spawn_persistence_loop(&self, runtime: &Runtime) {
        let store = Arc::clone(&runtime.store);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(PERSISTENCE_RETRY_SECS));
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                store.retry_pending().await;
            }
        });
    }

    fn spawn_heartbeat_loop(&self, runtime: &Runtime) {
        let connector = Arc::clone(&runtime.connector);
        let sessions = Arc::clone(&runtime.sessions);
        let executor = Arc::clone(&runtime.executor);
        let paper = Arc::clone(&runtime.paper);
        let store = Arc::clone(&runtime.store);
        let symbols = runtime.predictor.symbols();
        let cancel = self.cancel.clone();
        let interval = Duration::from_secs(self.config.health.heartbeat_interval_s.max(1));
        let close_on_day_change = self.config.trading.close_on_day_change;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut last_analytics = tokio::time::Instant::now();
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    _ = ticker.tick() => {}
                }

                let account = match connector.get_account().await {
                    Ok(account) => account,
                    Err(e) => {
                        tracing::debug!(error = %e, "heartbeat account fetch failed");
                        continue;
                    }
                };
                sessions.update_heartbeat(account.balance).await;

                if sessions.check_day_boundary().await {
                    info!("UTC day boundary crossed");
                    if close_on_day_change {
                        let closed = executor.lock().await.close_all().await;
                        info!(closed, "day-change flatten complete");
                        let metrics = paper.lock().metrics();
                        sessions
                            .end_session(
                                SessionStats {
                                    balance: account.balance,
                                    total_trades: metrics.total_trades,
                                    total_pnl: metrics.total_pnl,
                                },
                                SessionEndReason::DayChange,
                            )
                            .await;
                        sessions
                            .start_session(account.balance, symbols.clone())
                            .await;
                    }
                }

                if last_analytics.elapsed() >= Duration::from_secs(ANALYTICS_SECS) {
                    last_analytics = tokio::time::Instant::now();
                    let metrics = paper.lock().metrics();
                    let session_id = sessions.session_id().await;
                    store
                        .insert(
                            "telemetry",
                            json!({
                                "session_id": session_id,
                                "balance": account.balance,
                                "equity": account.equity,
                                "paper": metrics,
                            }),
                        )
                        .await;
                }
            }
        });
    }

    async fn shutdown(&self, runtime: &Runtime, reason: SessionEndReason) {
        info!(reason = %reason, "shutting down");

        if self.config.trading.close_on_exit && reason != SessionEndReason::Emergency {
            let closed = runtime.executor.lock().await.close_all().await;
            info!(closed, "positions closed on exit");
        }

        let balance = match runtime.connector.get_account().await {
            Ok(account) => account.balance,
            Err(_) => 0.0,
        };
        let metrics = runtime.paper.lock().metrics();
        runtime
            .sessions
            .end_session(
                SessionStats {
                    balance,
                    total_trades: metrics.total_trades,
                    total_pnl: metrics.total_pnl,
                },
                reason,
            )
            .await;

        runtime.store.retry_pending().await;
        runtime.connector.disconnect().await;
        info!("shutdown complete");
    }
}
