//! End-to-end tests: recovered positions, control calls and feed ticks
//! driving fills, closes and wallet settlement.

mod integration;
use integration::common::mock_ws::{wait_until, MockWsServer};

use ordertrack_core::{
    EventType, PositionDraft, PositionKey, PositionKind, PositionStatus, Price, Side, Size,
    StoredPosition,
};
use ordertrack_persistence::MemoryGateway;
use ordertrack_position::{Monitoring, RecordingPublisher};
use ordertrack_service::{AppConfig, Application, RunningApp, UpsertRequest};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

fn config(url: String) -> AppConfig {
    let mut config = AppConfig::default();
    config.feed.url = url;
    config.feed.reconnect_delay_ms = 50;
    config.queue.wait_time_ms = 50;
    config.queue.idle_backoff_ms = 10;
    config
}

fn open_long(pos_id: &str, symbol: &str) -> StoredPosition {
    StoredPosition {
        position_id: pos_id.into(),
        user_id: "u1".into(),
        asset_symbol: symbol.into(),
        status: PositionStatus::Open,
        position_type: Side::Long,
        order_category: None,
        order_type: Some("MARKET".into()),
        order_id: None,
        entry_price: Some(Price::new(dec!(100))),
        quantity: Some(Size::new(dec!(2))),
        initial_quantity: None,
        lot: None,
        leverage: None,
        contribution_amount: Some(dec!(10)),
        stop_loss: Some(Price::new(dec!(95))),
        take_profit: Some(Price::new(dec!(110))),
        currency: None,
        exit_price: None,
        closed_at: None,
        realized_pnl: None,
        position_closed_type: None,
        close_key: None,
    }
}

async fn start(
    server: &MockWsServer,
    gateway: Arc<MemoryGateway>,
) -> (RunningApp, Arc<RecordingPublisher>) {
    let publisher = Arc::new(RecordingPublisher::new());
    let running = Application::with_gateway(config(server.url()), gateway)
        .with_publisher(publisher.clone())
        .start()
        .await
        .unwrap();
    (running, publisher)
}

async fn wait_subscribed(server: &MockWsServer, symbol: &str) -> bool {
    let frame = format!(r#"{{"action":"subscribe","symbol":"{symbol}"}}"#);
    wait_until(Duration::from_secs(3), || async {
        let mut received = Vec::new();
        for id in 1..=server.connection_count() {
            received.extend(server.received_on(id).await);
        }
        received.contains(&frame)
    })
    .await
}

/// A recovered SLTP position is subscribed on startup and settled once when
/// a tick crosses its stop loss, even if the same price repeats.
#[tokio::test]
async fn test_recovered_position_stop_loss_settles_once() {
    let server = MockWsServer::start().await;
    let gateway = Arc::new(MemoryGateway::new());
    gateway.insert_position(open_long("p1", "BTCUSDT"));

    let (running, publisher) = start(&server, gateway.clone()).await;
    assert!(running.registry().has_interest("BTCUSDT"));
    assert!(wait_subscribed(&server, "BTCUSDT").await, "recovery subscribes");

    server.push_mark_price("BTCUSDT", 94.0);
    server.push_mark_price("BTCUSDT", 94.0);

    assert!(
        wait_until(Duration::from_secs(3), || async {
            gateway.position("p1").map(|p| p.status) == Some(PositionStatus::Closed)
        })
        .await,
        "position closed"
    );
    assert!(wait_until(Duration::from_secs(2), || async { gateway.ledger().len() == 3 }).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stored = gateway.position("p1").unwrap();
    assert_eq!(stored.exit_price, Some(Price::new(dec!(95))));
    assert_eq!(stored.realized_pnl, Some(dec!(-10)));
    assert_eq!(stored.position_closed_type.as_deref(), Some("auto_TPSL"));

    // -10 pnl, +10 margin, -0.23529412 fee
    assert_eq!(gateway.balance("u1"), Some(dec!(-0.23529412)));
    assert_eq!(gateway.ledger().len(), 3, "settled exactly once");

    let events = publisher.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].operation, EventType::SltpSlHit);
    assert!(!running.registry().has_interest("BTCUSDT"));

    running.stop().await;
    server.shutdown().await;
}

/// Stopping while a close is half way through its wallet effects waits for
/// the settlement to finish.
#[tokio::test]
async fn test_stop_waits_for_in_flight_settlement() {
    let server = MockWsServer::start().await;
    let gateway = Arc::new(MemoryGateway::new());
    gateway.insert_position(open_long("p1", "BTCUSDT"));
    gateway.delay_on("increment_balance", Duration::from_millis(200));

    let (running, _publisher) = start(&server, gateway.clone()).await;
    assert!(wait_subscribed(&server, "BTCUSDT").await);

    server.push_mark_price("BTCUSDT", 94.0);
    assert!(
        wait_until(Duration::from_secs(3), || async {
            gateway.position("p1").map(|p| p.status) == Some(PositionStatus::Closed)
        })
        .await,
        "position closed"
    );
    assert!(gateway.ledger().len() < 3, "wallet effects still running");

    running.stop().await;

    assert_eq!(gateway.ledger().len(), 3);
    assert_eq!(gateway.balance("u1"), Some(dec!(-0.23529412)));
    server.shutdown().await;
}

/// A pending limit order added through the control interface fills on the
/// first crossing tick and is then tracked at its limit price.
#[tokio::test]
async fn test_limit_order_fills_then_tracks() {
    let server = MockWsServer::start().await;
    let gateway = Arc::new(MemoryGateway::new());
    let mut pending = open_long("p2", "ETHUSDT");
    pending.status = PositionStatus::Pending;
    pending.entry_price = Some(Price::new(dec!(50)));
    pending.stop_loss = Some(Price::new(dec!(45)));
    pending.take_profit = None;
    gateway.insert_position(pending);

    let (running, publisher) = start(&server, gateway.clone()).await;

    let request = UpsertRequest {
        draft: PositionDraft {
            symbol: "ETHUSDT".into(),
            user_id: "u1".into(),
            pos_id: "p2".into(),
            status: Some(PositionStatus::Pending),
            side: Some(Side::Long),
            sl: Some(Price::new(dec!(45))),
            entry_price: Some(Price::new(dec!(50))),
            quantity: Some(Size::new(dec!(2))),
            ..Default::default()
        },
        kind: None,
    };
    assert_eq!(
        running.control().add_or_update(&request).await.unwrap(),
        Monitoring::Pending
    );
    assert!(wait_subscribed(&server, "ETHUSDT").await);

    server.push_mark_price("ETHUSDT", 49.0);
    server.push_mark_price("ETHUSDT", 51.0);

    assert!(
        wait_until(Duration::from_secs(3), || async {
            gateway.position("p2").map(|p| p.status) == Some(PositionStatus::Open)
        })
        .await,
        "fill opens the stored position"
    );

    let key = PositionKey::new("ETHUSDT", "u1", "p2");
    match running.registry().get(&key).await.unwrap() {
        Some(ordertrack_core::PositionRecord::Tracked(t)) => {
            assert_eq!(t.kind, PositionKind::Sl);
            assert_eq!(t.entry_price, Some(Price::new(dec!(50))));
        }
        other => panic!("expected tracked, got {other:?}"),
    }

    assert!(wait_until(Duration::from_secs(2), || async { !publisher.events().is_empty() }).await);
    let events = publisher.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].operation, EventType::LimitOrderHit);

    running.stop().await;
    server.shutdown().await;
}

/// Removing the last position for a symbol unsubscribes the feed once the
/// store has no open position left for it.
#[tokio::test]
async fn test_remove_last_position_unsubscribes() {
    let server = MockWsServer::start().await;
    let gateway = Arc::new(MemoryGateway::new());
    let (running, _publisher) = start(&server, gateway.clone()).await;

    let request = UpsertRequest {
        draft: PositionDraft {
            symbol: "SOLUSDT".into(),
            user_id: "u1".into(),
            pos_id: "p3".into(),
            status: Some(PositionStatus::Open),
            side: Some(Side::Short),
            tp: Some(Price::new(dec!(90))),
            entry_price: Some(Price::new(dec!(100))),
            quantity: Some(Size::new(dec!(1))),
            ..Default::default()
        },
        kind: Some(PositionKind::Tp),
    };
    running.control().add_or_update(&request).await.unwrap();
    assert!(wait_subscribed(&server, "SOLUSDT").await);

    let key = PositionKey::new("SOLUSDT", "u1", "p3");
    assert!(running.control().remove_position(&key).await.unwrap());

    assert!(
        wait_until(Duration::from_secs(3), || async { !running.feed().is_subscribed("SOLUSDT") })
            .await,
        "unsubscribed once nothing references the symbol"
    );

    running.stop().await;
    server.shutdown().await;
}
