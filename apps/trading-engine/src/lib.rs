//! Autonomous model-driven trading execution core.
//!
//! Consumes OHLCV market data from a broker, runs per-symbol
//! predictive models that emit intent signals, and reconciles those
//! intents against real broker positions through a synchronization
//! state machine. The in-process *virtual* trading state stays
//! numerically identical to the training environment (the predictor's
//! digital twin), while the real execution path applies risk gates,
//! lot mapping, and USD-to-price stop conversion before any order is
//! sent.
//!
//! # Subsystems
//!
//! - [`predictor`] — bar buffers, feature computation, virtual
//!   positions, model bundles, signal emission.
//! - [`feed`] — tick-to-bar detection.
//! - [`broker`] — the connector contract, the request/response bridge
//!   over the broker's event protocol, rate limiting, auth refresh,
//!   reconnection, symbol metadata cache, and the mock.
//! - [`risk`] — drawdown, margin, spread, and circuit-breaker gates.
//! - [`execution`] — sync state machine, stop conversion, audit
//!   comments, the executor.
//! - [`paper`] — paper execution of the same signal stream at
//!   training costs, for drift measurement.
//! - [`persistence`] — session state, telemetry egress, trade logs.
//! - [`orchestrator`] — bootstrap, concurrent loops, shutdown.

pub mod broker;
pub mod config;
pub mod error;
pub mod execution;
pub mod feed;
pub mod models;
pub mod orchestrator;
pub mod paper;
pub mod persistence;
pub mod predictor;
pub mod risk;
