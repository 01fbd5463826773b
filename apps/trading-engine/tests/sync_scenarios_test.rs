//! End-to-end synchronization scenarios: executor + risk guard +
//! price converter + mock broker wired together.

use std::sync::Arc;

use trading_engine::broker::{BrokerConnector, MockConnector};
use trading_engine::config::{SymbolConfig, SymbolFile};
use trading_engine::execution::{AuditComment, Executor};
use trading_engine::models::{AccountInfo, Action, Direction, Position, Signal, SymbolInfo};
use trading_engine::risk::{RiskConfig, SpreadMap};

fn signal(action: Action) -> Signal {
    Signal {
        symbol: "EURUSD".to_string(),
        action,
        hmm_state: 2,
        virtual_pnl: 7.5,
        timestamp: 1_700_000_000,
    }
}

fn eurusd_info() -> SymbolInfo {
    SymbolInfo {
        symbol: "EURUSD".to_string(),
        point: 0.00001,
        digits: 5,
        pip_value_per_lot: Some(10.0),
        spread_points: 7.0,
        min_volume: 0.01,
        step_volume: 0.01,
        max_volume: 100.0,
    }
}

fn position(ticket: u64, direction: Direction, pnl: f64) -> Position {
    Position {
        ticket,
        symbol: "EURUSD".to_string(),
        direction,
        volume: 0.03,
        open_price: 1.09,
        current_price: 1.1,
        pnl,
        sl: 0.0,
        tp: 0.0,
        open_time: 0,
        comment: String::new(),
    }
}

fn setup(initial_balance: f64) -> (Executor, Arc<MockConnector>) {
    let mock = Arc::new(MockConnector::new());
    mock.set_price("EURUSD", 1.10000);
    mock.set_symbol_info(eurusd_info());

    let spreads = Arc::new(SpreadMap::new());
    spreads.publish("EURUSD", 1.0);

    let mut file = SymbolFile::default();
    file.symbols
        .insert("EURUSD".to_string(), SymbolConfig::default());
    file.risk = RiskConfig {
        initial_balance,
        ..RiskConfig::default()
    };

    let executor = Executor::new(
        Arc::clone(&mock) as Arc<dyn BrokerConnector>,
        file,
        spreads,
        false,
    );
    (executor, mock)
}

// S1: real flat, signal WAIT: pure no-op, no broker order traffic.
#[tokio::test]
async fn scenario_flat_wait_is_noop() {
    let (mut executor, mock) = setup(10_000.0);
    let ack = executor.process_signal(&signal(Action::Wait), 1.1).await;
    assert_eq!(ack.code(), "OK/SYNCED");
    assert!(mock.orders().is_empty());
}

// S2: missed entry waits for an edge across four bars.
#[tokio::test]
async fn scenario_missed_entry_waits_for_edge() {
    let (mut executor, mock) = setup(10_000.0);

    let ack1 = executor
        .process_signal(&signal(Action::LongModerate), 1.1)
        .await;
    assert_eq!(ack1.code(), "OK/WAITING_SYNC");

    let ack2 = executor
        .process_signal(&signal(Action::LongStrong), 1.1)
        .await;
    assert_eq!(ack2.code(), "OK/WAITING_SYNC");
    assert!(mock.orders().is_empty());

    let ack3 = executor.process_signal(&signal(Action::Wait), 1.1).await;
    assert_eq!(ack3.code(), "OK/SYNCED");
    assert!(mock.orders().is_empty());

    let ack4 = executor
        .process_signal(&signal(Action::ShortWeak), 1.1)
        .await;
    assert_eq!(ack4.code(), "OK/OPENED");
    let orders = mock.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].direction, -1);
}

// S3: an inversion closes on its bar; the reopen falls under the
// missed-entry rule on the next bar.
#[tokio::test]
async fn scenario_inversion_never_reopens_same_bar() {
    let (mut executor, mock) = setup(10_000.0);
    mock.insert_position(position(7, Direction::Long, -12.0));

    let ack = executor
        .process_signal(&signal(Action::ShortStrong), 1.1)
        .await;
    assert_eq!(ack.code(), "OK/CLOSED");
    assert!(mock.orders().is_empty());

    // Broker now flat; the model still shorts: latched, not chased.
    let ack2 = executor
        .process_signal(&signal(Action::ShortStrong), 1.1)
        .await;
    assert_eq!(ack2.code(), "OK/WAITING_SYNC");

    // Edge (WAIT) then a fresh short opens.
    executor.process_signal(&signal(Action::Wait), 1.1).await;
    let ack3 = executor
        .process_signal(&signal(Action::ShortModerate), 1.1)
        .await;
    assert_eq!(ack3.code(), "OK/OPENED");
}

// S4: emergency drawdown blocks opens with the EMERGENCY reason the
// orchestrator keys its flatten-and-halt on.
#[tokio::test]
async fn scenario_emergency_drawdown() {
    let (mut executor, mock) = setup(10_000.0);
    mock.set_account(AccountInfo {
        balance: 8_900.0,
        equity: 8_900.0,
        margin: 0.0,
        free_margin: 8_000.0,
        margin_level: 0.0,
        currency: "USD".to_string(),
    });

    // Latch then flip to reach an edge that would otherwise open.
    executor.process_signal(&signal(Action::LongWeak), 1.1).await;
    let ack = executor
        .process_signal(&signal(Action::ShortWeak), 1.1)
        .await;
    assert_eq!(ack.code(), "SKIP/EMERGENCY");
    assert!(Executor::is_emergency_reason(&ack.reason));
    assert!(mock.orders().is_empty());
}

// S5: USD stops converted to absolute prices on the order, audit
// comment attached and parseable.
#[tokio::test]
async fn scenario_usd_stop_conversion_on_order() {
    let (mut executor, mock) = setup(10_000.0);
    // Config with moderate lot 0.03 and SL 10 USD (defaults).
    executor.process_signal(&signal(Action::ShortWeak), 1.1).await;
    let ack = executor
        .process_signal(&signal(Action::LongModerate), 1.10000)
        .await;
    assert_eq!(ack.code(), "OK/OPENED");

    let orders = mock.orders();
    assert_eq!(orders.len(), 1);
    // 10 USD / (10 USD/pip/lot * 0.03 lots) = 33.33 pips below entry.
    assert!((orders[0].sl - 1.09667).abs() < 1e-9, "sl={}", orders[0].sl);
    assert_eq!(orders[0].tp, 0.0);

    let parsed = AuditComment::parse(&orders[0].comment).expect("comment must parse");
    assert_eq!(parsed.hmm_state, 2);
    assert_eq!(parsed.action_index, Action::LongModerate.index());
    assert_eq!(parsed.intensity, 2);
    assert_eq!(parsed.balance, 10_000);
    assert!((parsed.virtual_pnl - 7.5).abs() < 1e-9);
}

// Externally closed position (stop hit): next aligned signal falls
// into WAIT_SYNC instead of blindly re-entering.
#[tokio::test]
async fn scenario_external_close_falls_into_wait_sync() {
    let (mut executor, mock) = setup(10_000.0);
    mock.insert_position(position(11, Direction::Long, 3.0));

    // Aligned: NOOP.
    let ack = executor
        .process_signal(&signal(Action::LongWeak), 1.1)
        .await;
    assert_eq!(ack.code(), "OK/SYNCED");

    // Broker closes it out-of-band.
    mock.external_close(11).await;

    // Model still long, broker flat: missed-entry rule latches.
    let ack2 = executor
        .process_signal(&signal(Action::LongWeak), 1.1)
        .await;
    assert_eq!(ack2.code(), "OK/WAITING_SYNC");
    assert!(mock.orders().is_empty());
}

// ACK totality: every processed signal yields exactly one ACK with a
// reason, across all decision paths.
#[tokio::test]
async fn scenario_every_signal_acked() {
    let (mut executor, _mock) = setup(10_000.0);
    let actions = [
        Action::Wait,
        Action::LongWeak,
        Action::LongWeak,
        Action::Wait,
        Action::ShortStrong,
        Action::ShortStrong,
        Action::Wait,
    ];
    for action in actions {
        let ack = executor.process_signal(&signal(action), 1.1).await;
        assert!(!ack.reason.is_empty(), "ack without reason for {action:?}");
    }
}
