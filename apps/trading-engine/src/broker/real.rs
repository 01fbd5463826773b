//! Production broker connector over the bridged wire protocol.
//!
//! Connect sequence (ordering matters): establish the transport link
//! and install the bridge dispatcher *first*, then authenticate, then
//! subscribe. A supervisor task watches for link death and drives
//! backoff reconnection, after which subscriptions are replayed and the
//! symbol metadata cache is invalidated.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::feed::BarDetector;
use crate::models::{AccountInfo, Bar, OrderResult, Position, SymbolInfo, Tick, Timeframe};

use super::auth::{Credentials, TokenManager};
use super::bridge::{Bridge, TcpTransport, Transport};
use super::rate_limiter::RequestBudget;
use super::reconnect::ReconnectPolicy;
use super::symbol_cache::SymbolCache;
use super::{BrokerConnector, BrokerError, BrokerEvent, DEFAULT_REQUEST_TIMEOUT_SECS};

/// Configuration of the real connector, from the `broker` section.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RealBrokerConfig {
    /// `host:port` of the broker gateway.
    pub address: String,
    /// `demo` or `live`; carried in the authenticate request.
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(flatten)]
    pub credentials: Credentials,
}

fn default_environment() -> String {
    "demo".to_string()
}

const fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

#[derive(Default)]
struct SubscriptionState {
    by_symbol: HashMap<String, Timeframe>,
    detector: BarDetector,
}

struct Inner {
    config: RealBrokerConfig,
    bridge: Bridge,
    transport: Arc<dyn Transport>,
    tokens: TokenManager,
    budget: RequestBudget,
    cache: SymbolCache,
    subscriptions: Mutex<SubscriptionState>,
    connected: AtomicBool,
    events_tx: mpsc::Sender<BrokerEvent>,
    cancel: CancellationToken,
}

/// Connector speaking the bridged request/response protocol.
pub struct RealConnector {
    inner: Arc<Inner>,
    events_rx: Mutex<Option<mpsc::Receiver<BrokerEvent>>>,
}

impl RealConnector {
    /// Connector over the default TCP transport.
    #[must_use]
    pub fn new(config: RealBrokerConfig, cancel: CancellationToken) -> Self {
        let transport = Arc::new(TcpTransport::new(config.address.clone()));
        Self::with_transport(config, transport, cancel)
    }

    /// Connector over a custom transport (used by tests).
    #[must_use]
    pub fn with_transport(
        config: RealBrokerConfig,
        transport: Arc<dyn Transport>,
        cancel: CancellationToken,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(1024);
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let inner = Arc::new(Inner {
            tokens: TokenManager::new(config.credentials.clone()),
            bridge: Bridge::new(timeout, cancel.clone()),
            config,
            transport,
            budget: RequestBudget::default(),
            cache: SymbolCache::default(),
            subscriptions: Mutex::new(SubscriptionState::default()),
            connected: AtomicBool::new(false),
            events_tx,
            cancel,
        });
        Self {
            inner,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }
}

impl Inner {
    /// Bring up a session: link, dispatcher, event pump, auth. Returns
    /// the link-death receiver for the supervisor.
    async fn establish_session(self: &Arc<Self>) -> Result<oneshot::Receiver<()>, BrokerError> {
        let link = self.transport.connect().await?;
        let (raw_events, dead) = self.bridge.install(link);
        self.spawn_event_pump(raw_events);
        self.authenticate().await?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(dead)
    }

    async fn authenticate(&self) -> Result<(), BrokerError> {
        let token = self.tokens.valid_token().await?;
        let result = self
            .bridge
            .request(
                "authenticate",
                json!({
                    "access_token": token,
                    "account_id": self.config.credentials.account_id,
                    "environment": self.config.environment,
                }),
            )
            .await
            .map_err(|e| match e {
                BrokerError::Protocol(code) => BrokerError::AuthenticationFailed(code),
                other => other,
            })?;

        if let Some(expires_at) = result.get("expires_at").and_then(Value::as_i64) {
            self.tokens.set_expiry(expires_at).await;
        }
        info!(environment = %self.config.environment, "broker session authenticated");
        Ok(())
    }

    fn spawn_event_pump(self: &Arc<Self>, mut raw_events: mpsc::Receiver<(String, Value)>) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            while let Some((event, payload)) = raw_events.recv().await {
                inner.handle_event(&event, payload).await;
            }
        });
    }

    async fn handle_event(&self, event: &str, payload: Value) {
        match event {
            "tick" => {
                let tick: Tick = match serde_json::from_value(payload) {
                    Ok(tick) => tick,
                    Err(e) => {
                        warn!(error = %e, "malformed tick event");
                        return;
                    }
                };
                let bar = self.subscriptions.lock().detector.on_tick(&tick);
                let _ = self.events_tx.send(BrokerEvent::Tick(tick)).await;
                if let Some(bar) = bar {
                    let _ = self.events_tx.send(BrokerEvent::BarClosed(bar)).await;
                }
            }
            "position_closed" => {
                let ticket = payload.get("ticket").and_then(Value::as_u64).unwrap_or(0);
                let symbol = payload
                    .get("symbol")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let pnl = payload.get("pnl").and_then(Value::as_f64).unwrap_or(0.0);
                let _ = self
                    .events_tx
                    .send(BrokerEvent::ExternalClose { ticket, symbol, pnl })
                    .await;
            }
            other => warn!(event = other, "unhandled broker event"),
        }
    }

    /// Replay stored subscriptions after (re)connect.
    async fn resubscribe(&self) -> Result<(), BrokerError> {
        let by_timeframe: HashMap<Timeframe, Vec<String>> = {
            let state = self.subscriptions.lock();
            let mut grouped: HashMap<Timeframe, Vec<String>> = HashMap::new();
            for (symbol, timeframe) in &state.by_symbol {
                grouped.entry(*timeframe).or_default().push(symbol.clone());
            }
            grouped
        };
        for (timeframe, symbols) in by_timeframe {
            self.bridge
                .request(
                    "subscribe",
                    json!({"symbols": symbols, "timeframe": timeframe.to_string()}),
                )
                .await?;
        }
        Ok(())
    }

    fn spawn_supervisor(self: &Arc<Self>, mut dead: oneshot::Receiver<()>) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let mut policy = ReconnectPolicy::default();
            loop {
                tokio::select! {
                    () = inner.cancel.cancelled() => return,
                    _ = &mut dead => {}
                }

                inner.connected.store(false, Ordering::SeqCst);
                inner.bridge.detach();
                let _ = inner.events_tx.send(BrokerEvent::Disconnected).await;
                warn!("broker transport lost, reconnecting");

                loop {
                    let backoff = policy.next_backoff();
                    tokio::select! {
                        () = inner.cancel.cancelled() => return,
                        () = tokio::time::sleep(backoff) => {}
                    }

                    match inner.establish_session().await {
                        Ok(next_dead) => {
                            if let Err(e) = inner.resubscribe().await {
                                error!(error = %e, "resubscribe failed, retrying session");
                                continue;
                            }
                            // Metadata may have changed server-side while
                            // we were gone.
                            inner.cache.invalidate(None);
                            policy.reset();
                            let _ = inner.events_tx.send(BrokerEvent::Reconnected).await;
                            info!("broker session re-established");
                            dead = next_dead;
                            break;
                        }
                        Err(e) => {
                            warn!(attempt = policy.attempt(), error = %e, "reconnect failed");
                        }
                    }
                }
            }
        });
    }

    fn parse<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, BrokerError> {
        serde_json::from_value(value).map_err(|e| BrokerError::Protocol(e.to_string()))
    }
}

/// For order operations a broker-side error field is an order
/// rejection, not a protocol fault.
fn as_order_rejection(error: BrokerError) -> BrokerError {
    match error {
        BrokerError::Protocol(code) => BrokerError::OrderRejected { code },
        other => other,
    }
}

#[async_trait]
impl BrokerConnector for RealConnector {
    async fn connect(&self) -> Result<(), BrokerError> {
        let dead = self.inner.establish_session().await?;
        self.inner.spawn_supervisor(dead);
        Ok(())
    }

    async fn disconnect(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.bridge.detach();
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn take_events(&self) -> Option<mpsc::Receiver<BrokerEvent>> {
        self.events_rx.lock().take()
    }

    async fn get_history(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bars: usize,
    ) -> Result<Vec<Bar>, BrokerError> {
        self.inner.budget.history.acquire().await;
        let result = self
            .inner
            .bridge
            .request(
                "get_history",
                json!({"symbol": symbol, "timeframe": timeframe.to_string(), "count": bars}),
            )
            .await?;
        Inner::parse(result)
    }

    async fn subscribe_bars(
        &self,
        symbols: &[String],
        timeframe: Timeframe,
    ) -> Result<(), BrokerError> {
        self.inner.budget.trading.acquire().await;
        self.inner
            .bridge
            .request(
                "subscribe",
                json!({"symbols": symbols, "timeframe": timeframe.to_string()}),
            )
            .await?;
        let mut state = self.inner.subscriptions.lock();
        for symbol in symbols {
            state.by_symbol.insert(symbol.clone(), timeframe);
            state.detector.register(symbol, timeframe);
        }
        Ok(())
    }

    async fn unsubscribe_bars(&self, symbols: &[String]) -> Result<(), BrokerError> {
        self.inner.budget.trading.acquire().await;
        self.inner
            .bridge
            .request("unsubscribe", json!({"symbols": symbols}))
            .await?;
        let mut state = self.inner.subscriptions.lock();
        for symbol in symbols {
            state.by_symbol.remove(symbol);
            state.detector.unregister(symbol);
        }
        Ok(())
    }

    async fn get_account(&self) -> Result<AccountInfo, BrokerError> {
        self.inner.budget.trading.acquire().await;
        let result = self.inner.bridge.request("get_account", Value::Null).await?;
        Inner::parse(result)
    }

    async fn get_positions(&self) -> Result<Vec<Position>, BrokerError> {
        self.inner.budget.trading.acquire().await;
        let result = self
            .inner
            .bridge
            .request("get_positions", Value::Null)
            .await?;
        Inner::parse(result)
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<Position>, BrokerError> {
        let positions = self.get_positions().await?;
        Ok(positions.into_iter().find(|p| p.symbol == symbol))
    }

    async fn open_order(
        &self,
        symbol: &str,
        direction: i8,
        volume: f64,
        sl: f64,
        tp: f64,
        comment: &str,
    ) -> Result<OrderResult, BrokerError> {
        self.inner.budget.trading.acquire().await;
        let result = self
            .inner
            .bridge
            .request(
                "open_order",
                json!({
                    "symbol": symbol,
                    "direction": direction,
                    "volume": volume,
                    "sl": sl,
                    "tp": tp,
                    "comment": comment,
                }),
            )
            .await
            .map_err(as_order_rejection)?;
        Inner::parse(result)
    }

    async fn close_order(&self, ticket: u64, volume: f64) -> Result<OrderResult, BrokerError> {
        self.inner.budget.trading.acquire().await;
        let result = self
            .inner
            .bridge
            .request("close_order", json!({"ticket": ticket, "volume": volume}))
            .await
            .map_err(as_order_rejection)?;
        Inner::parse(result)
    }

    async fn modify_order(&self, ticket: u64, sl: f64, tp: f64) -> Result<OrderResult, BrokerError> {
        self.inner.budget.trading.acquire().await;
        let result = self
            .inner
            .bridge
            .request(
                "modify_order",
                json!({"ticket": ticket, "sl": sl, "tp": tp}),
            )
            .await
            .map_err(as_order_rejection)?;
        Inner::parse(result)
    }

    async fn get_symbol_info(&self, symbol: &str) -> Result<SymbolInfo, BrokerError> {
        if let Some(info) = self.inner.cache.get(symbol) {
            return Ok(info);
        }
        self.inner.budget.trading.acquire().await;
        let result = self
            .inner
            .bridge
            .request("get_symbol_info", json!({"symbol": symbol}))
            .await?;
        let info: SymbolInfo = Inner::parse(result)?;
        self.inner.cache.put(info.clone());
        Ok(info)
    }

    fn invalidate_symbol_cache(&self, symbol: Option<&str>) {
        self.inner.cache.invalidate(symbol);
    }
}
