//! Broker connectivity.
//!
//! Application code sees only the [`BrokerConnector`] capability
//! contract: plain async request/response plus an event stream. The
//! vendor-protocol event loop, request correlation, rate limiting,
//! authentication refresh, and reconnection live behind it.

pub mod auth;
pub mod bridge;
pub mod mock;
pub mod rate_limiter;
pub mod real;
pub mod reconnect;
pub mod symbol_cache;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::models::{AccountInfo, Bar, OrderResult, Position, SymbolInfo, Tick, Timeframe};

pub use mock::MockConnector;
pub use real::RealConnector;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Errors from broker operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Transport dropped; in-flight requests fail with this.
    #[error("connection lost")]
    ConnectionLost,

    /// The broker did not answer within the request bound.
    #[error("request timed out after {timeout_secs}s")]
    RequestTimeout {
        /// Bound that elapsed.
        timeout_secs: u64,
    },

    /// Token refresh was denied or no valid token is available.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The broker refused the order.
    #[error("order rejected: {code}")]
    OrderRejected {
        /// Broker reason code.
        code: String,
    },

    /// Symbol unknown to the broker.
    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    /// Request or response could not be encoded/decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Operation issued while disconnected or shutting down.
    #[error("not connected")]
    NotConnected,

    /// The request was cancelled by shutdown.
    #[error("cancelled")]
    Cancelled,
}

/// Push events surfaced by a connector.
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    /// A market tick for a subscribed symbol.
    Tick(Tick),
    /// A bar closed for a subscribed symbol.
    BarClosed(Bar),
    /// A position was closed on the broker side (stop, target, manual).
    ExternalClose {
        ticket: u64,
        symbol: String,
        pnl: f64,
    },
    /// Transport dropped; reconnection is in progress.
    Disconnected,
    /// Transport re-established; subscriptions were replayed and the
    /// symbol metadata cache invalidated.
    Reconnected,
}

/// Capability contract every broker implementation satisfies.
///
/// Concrete variants: [`RealConnector`] over the bridged wire protocol,
/// [`MockConnector`] for tests and development.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Establish the connection and authenticate.
    async fn connect(&self) -> Result<(), BrokerError>;

    /// Close the connection cleanly.
    async fn disconnect(&self);

    /// Whether the transport is currently up and authenticated.
    fn is_connected(&self) -> bool;

    /// Take the push-event receiver. Yields `None` after first take.
    fn take_events(&self) -> Option<mpsc::Receiver<BrokerEvent>>;

    /// Download recent history, oldest bar first.
    async fn get_history(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bars: usize,
    ) -> Result<Vec<Bar>, BrokerError>;

    /// Subscribe to ticks for symbols; closed bars for the timeframe are
    /// detected locally and surfaced as [`BrokerEvent::BarClosed`].
    async fn subscribe_bars(
        &self,
        symbols: &[String],
        timeframe: Timeframe,
    ) -> Result<(), BrokerError>;

    /// Drop subscriptions for symbols.
    async fn unsubscribe_bars(&self, symbols: &[String]) -> Result<(), BrokerError>;

    /// Current account snapshot.
    async fn get_account(&self) -> Result<AccountInfo, BrokerError>;

    /// All open positions.
    async fn get_positions(&self) -> Result<Vec<Position>, BrokerError>;

    /// Open position for one symbol, `None` when flat.
    async fn get_position(&self, symbol: &str) -> Result<Option<Position>, BrokerError>;

    /// Market order. `sl`/`tp` are absolute prices, 0 meaning unset.
    async fn open_order(
        &self,
        symbol: &str,
        direction: i8,
        volume: f64,
        sl: f64,
        tp: f64,
        comment: &str,
    ) -> Result<OrderResult, BrokerError>;

    /// Close a position by ticket; `volume` 0 closes in full.
    async fn close_order(&self, ticket: u64, volume: f64) -> Result<OrderResult, BrokerError>;

    /// Replace SL/TP on an open position; 0 removes that side.
    async fn modify_order(&self, ticket: u64, sl: f64, tp: f64) -> Result<OrderResult, BrokerError>;

    /// Symbol metadata, served from the TTL cache when fresh.
    async fn get_symbol_info(&self, symbol: &str) -> Result<SymbolInfo, BrokerError>;

    /// Drop a symbol's cached metadata (all symbols when `None`).
    fn invalidate_symbol_cache(&self, symbol: Option<&str>);
}
