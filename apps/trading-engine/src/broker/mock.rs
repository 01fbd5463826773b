//! Mock broker connector for tests and development.
//!
//! Fills instantly at the last known price, never rejects unless told
//! to, and lets tests drive ticks, positions and account state
//! directly. Selected with `broker.type = "mock"`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::feed::BarDetector;
use crate::models::{
    AccountInfo, Bar, Direction, OrderResult, Position, SymbolInfo, Tick, Timeframe,
};

use super::{BrokerConnector, BrokerError, BrokerEvent};

/// A record of an order the mock accepted or rejected.
#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub symbol: String,
    pub direction: i8,
    pub volume: f64,
    pub sl: f64,
    pub tp: f64,
    pub comment: String,
}

#[derive(Debug, Default)]
struct MockState {
    account: Option<AccountInfo>,
    positions: HashMap<u64, Position>,
    symbol_infos: HashMap<String, SymbolInfo>,
    history: HashMap<String, Vec<Bar>>,
    last_price: HashMap<String, f64>,
    orders: Vec<OrderRecord>,
    fail_next_order: Option<String>,
    detector: BarDetector,
}

/// In-memory broker double.
pub struct MockConnector {
    state: Mutex<MockState>,
    connected: AtomicBool,
    next_ticket: AtomicU64,
    events_tx: mpsc::Sender<BrokerEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<BrokerEvent>>>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    /// Fresh mock with a default 10k USD account.
    #[must_use]
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::channel(1024);
        let connector = Self {
            state: Mutex::new(MockState::default()),
            connected: AtomicBool::new(false),
            next_ticket: AtomicU64::new(1),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        };
        connector.set_account(AccountInfo {
            balance: 10_000.0,
            equity: 10_000.0,
            margin: 0.0,
            free_margin: 10_000.0,
            margin_level: 0.0,
            currency: "USD".to_string(),
        });
        connector
    }

    /// Replace the account snapshot.
    pub fn set_account(&self, account: AccountInfo) {
        self.state.lock().account = Some(account);
    }

    /// Register symbol metadata served by `get_symbol_info`.
    pub fn set_symbol_info(&self, info: SymbolInfo) {
        self.state.lock().symbol_infos.insert(info.symbol.clone(), info);
    }

    /// Register canned history for a symbol.
    pub fn set_history(&self, symbol: &str, bars: Vec<Bar>) {
        self.state.lock().history.insert(symbol.to_string(), bars);
    }

    /// Set the price the next fill uses for a symbol.
    pub fn set_price(&self, symbol: &str, price: f64) {
        self.state.lock().last_price.insert(symbol.to_string(), price);
    }

    /// Make the next order operation fail with the given reason.
    pub fn fail_next_order(&self, reason: &str) {
        self.state.lock().fail_next_order = Some(reason.to_string());
    }

    /// Insert a broker-side position directly.
    pub fn insert_position(&self, position: Position) {
        self.state.lock().positions.insert(position.ticket, position);
    }

    /// Orders recorded so far.
    #[must_use]
    pub fn orders(&self) -> Vec<OrderRecord> {
        self.state.lock().orders.clone()
    }

    /// Drive a tick through the mock: updates the fill price, runs the
    /// bar detector, and emits tick/bar events.
    pub async fn push_tick(&self, tick: Tick) {
        let bar = {
            let mut state = self.state.lock();
            state.last_price.insert(tick.symbol.clone(), tick.mid());
            state.detector.on_tick(&tick)
        };
        let _ = self.events_tx.send(BrokerEvent::Tick(tick)).await;
        if let Some(bar) = bar {
            let _ = self.events_tx.send(BrokerEvent::BarClosed(bar)).await;
        }
    }

    /// Simulate the broker closing a position (stop, target, manual).
    pub async fn external_close(&self, ticket: u64) {
        let removed = self.state.lock().positions.remove(&ticket);
        if let Some(position) = removed {
            let _ = self
                .events_tx
                .send(BrokerEvent::ExternalClose {
                    ticket,
                    symbol: position.symbol,
                    pnl: position.pnl,
                })
                .await;
        }
    }

    fn take_fail(&self) -> Option<String> {
        self.state.lock().fail_next_order.take()
    }
}

#[async_trait]
impl BrokerConnector for MockConnector {
    async fn connect(&self) -> Result<(), BrokerError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn take_events(&self) -> Option<mpsc::Receiver<BrokerEvent>> {
        self.events_rx.lock().take()
    }

    async fn get_history(
        &self,
        symbol: &str,
        _timeframe: Timeframe,
        bars: usize,
    ) -> Result<Vec<Bar>, BrokerError> {
        let state = self.state.lock();
        let history = state
            .history
            .get(symbol)
            .ok_or_else(|| BrokerError::SymbolNotFound(symbol.to_string()))?;
        let start = history.len().saturating_sub(bars);
        Ok(history[start..].to_vec())
    }

    async fn subscribe_bars(
        &self,
        symbols: &[String],
        timeframe: Timeframe,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        for symbol in symbols {
            state.detector.register(symbol, timeframe);
        }
        Ok(())
    }

    async fn unsubscribe_bars(&self, symbols: &[String]) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        for symbol in symbols {
            state.detector.unregister(symbol);
        }
        Ok(())
    }

    async fn get_account(&self) -> Result<AccountInfo, BrokerError> {
        self.state
            .lock()
            .account
            .clone()
            .ok_or(BrokerError::NotConnected)
    }

    async fn get_positions(&self) -> Result<Vec<Position>, BrokerError> {
        let mut positions: Vec<Position> = self.state.lock().positions.values().cloned().collect();
        positions.sort_by_key(|p| p.ticket);
        Ok(positions)
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<Position>, BrokerError> {
        Ok(self
            .state
            .lock()
            .positions
            .values()
            .find(|p| p.symbol == symbol)
            .cloned())
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
        if let Some(reason) = self.take_fail() {
            return Ok(OrderResult::rejected(reason));
        }

        let price = self
            .state
            .lock()
            .last_price
            .get(symbol)
            .copied()
            .unwrap_or(1.0);
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state.lock();
        state.orders.push(OrderRecord {
            symbol: symbol.to_string(),
            direction,
            volume,
            sl,
            tp,
            comment: comment.to_string(),
        });
        state.positions.insert(
            ticket,
            Position {
                ticket,
                symbol: symbol.to_string(),
                direction: Direction::from_value(direction),
                volume,
                open_price: price,
                current_price: price,
                pnl: 0.0,
                sl,
                tp,
                open_time: 0,
                comment: comment.to_string(),
            },
        );
        debug!(symbol, ticket, direction, volume, "mock order filled");
        Ok(OrderResult::filled(ticket, price))
    }

    async fn close_order(&self, ticket: u64, _volume: f64) -> Result<OrderResult, BrokerError> {
        if let Some(reason) = self.take_fail() {
            return Ok(OrderResult::rejected(reason));
        }
        let mut state = self.state.lock();
        match state.positions.remove(&ticket) {
            Some(position) => Ok(OrderResult::filled(ticket, position.current_price)),
            None => Ok(OrderResult::rejected("POSITION_NOT_FOUND")),
        }
    }

    async fn modify_order(&self, ticket: u64, sl: f64, tp: f64) -> Result<OrderResult, BrokerError> {
        let mut state = self.state.lock();
        match state.positions.get_mut(&ticket) {
            Some(position) => {
                position.sl = sl;
                position.tp = tp;
                Ok(OrderResult::filled(ticket, position.current_price))
            }
            None => Ok(OrderResult::rejected("POSITION_NOT_FOUND")),
        }
    }

    async fn get_symbol_info(&self, symbol: &str) -> Result<SymbolInfo, BrokerError> {
        self.state
            .lock()
            .symbol_infos
            .get(symbol)
            .cloned()
            .ok_or_else(|| BrokerError::SymbolNotFound(symbol.to_string()))
    }

    fn invalidate_symbol_cache(&self, _symbol: Option<&str>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_close_round_trip() {
        let mock = MockConnector::new();
        mock.connect().await.unwrap();
        mock.set_price("EURUSD", 1.1);

        let result = mock
            .open_order("EURUSD", 1, 0.03, 1.09, 1.12, "test")
            .await
            .unwrap();
        assert!(result.success);
        let ticket = result.ticket.unwrap();

        let position = mock.get_position("EURUSD").await.unwrap().unwrap();
        assert_eq!(position.ticket, ticket);
        assert_eq!(position.direction, Direction::Long);

        let closed = mock.close_order(ticket, 0.0).await.unwrap();
        assert!(closed.success);
        assert!(mock.get_position("EURUSD").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fail_next_order_rejects_once() {
        let mock = MockConnector::new();
        mock.fail_next_order("MARKET_CLOSED");
        let rejected = mock.open_order("EURUSD", 1, 0.01, 0.0, 0.0, "").await.unwrap();
        assert!(!rejected.success);
        assert_eq!(rejected.error.as_deref(), Some("MARKET_CLOSED"));

        let accepted = mock.open_order("EURUSD", 1, 0.01, 0.0, 0.0, "").await.unwrap();
        assert!(accepted.success);
    }

    #[tokio::test]
    async fn test_tick_stream_emits_bars() {
        let mock = MockConnector::new();
        let mut events = mock.take_events().unwrap();
        mock.subscribe_bars(&["EURUSD".to_string()], Timeframe::M1)
            .await
            .unwrap();

        for (time, price) in [(10, 1.1), (30, 1.2), (70, 1.15)] {
            mock.push_tick(Tick {
                symbol: "EURUSD".to_string(),
                time,
                bid: price,
                ask: price,
            })
            .await;
        }

        let mut bar = None;
        while let Ok(event) = events.try_recv() {
            if let BrokerEvent::BarClosed(b) = event {
                bar = Some(b);
            }
        }
        let bar = bar.unwrap();
        assert_eq!(bar.time, 0);
        assert!((bar.close - 1.2).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_external_close_emits_event() {
        let mock = MockConnector::new();
        let mut events = mock.take_events().unwrap();
        mock.set_price("EURUSD", 1.1);
        let result = mock.open_order("EURUSD", 1, 0.01, 0.0, 0.0, "").await.unwrap();

        mock.external_close(result.ticket.unwrap()).await;

        let mut saw_close = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, BrokerEvent::ExternalClose { .. }) {
                saw_close = true;
            }
        }
        assert!(saw_close);
    }
}
