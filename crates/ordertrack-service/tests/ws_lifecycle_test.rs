//! Price feed lifecycle integration tests.
//!
//! Tests the connection lifecycle:
//! - Connection establishment and subscription replay
//! - Resubscription after a dropped connection
//! - Tick delivery
//! - Reconnection limits

mod integration;
use integration::common::mock_ws::{wait_until, MockWsServer};

use ordertrack_ws::{ConnectionConfig, ConnectionManager, ConnectionState, PriceTick};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn subscribe_frame(symbol: &str) -> String {
    format!(r#"{{"action":"subscribe","symbol":"{symbol}"}}"#)
}

fn start_manager(url: String) -> (Arc<ConnectionManager>, mpsc::Receiver<PriceTick>) {
    let config = ConnectionConfig {
        url,
        reconnect_delay_ms: 50,
        ..Default::default()
    };
    let (tick_tx, tick_rx) = mpsc::channel(100);
    let manager = Arc::new(ConnectionManager::new(config, tick_tx, None));

    let connector = manager.clone();
    tokio::spawn(async move {
        let _ = connector.connect().await;
    });
    (manager, tick_rx)
}

/// Subscriptions made before the first connect are sent once, not twice.
#[tokio::test]
async fn test_subscriptions_replayed_once_on_connect() {
    let server = MockWsServer::start().await;
    let (tick_tx, _tick_rx) = mpsc::channel(100);
    let config = ConnectionConfig {
        url: server.url(),
        ..Default::default()
    };
    let manager = Arc::new(ConnectionManager::new(config, tick_tx, None));
    let feed = manager.handle();

    assert!(feed.subscribe_symbol("BTCUSDT").await.unwrap());

    let connector = manager.clone();
    let handle = tokio::spawn(async move {
        let _ = connector.connect().await;
    });

    assert!(
        wait_until(Duration::from_secs(2), || async {
            manager.state() == ConnectionState::Connected
        })
        .await,
        "Should connect within timeout"
    );
    // Queued command drained after the replay
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(server.received_on(1).await, vec![subscribe_frame("BTCUSDT")]);

    manager.shutdown();
    let _ = timeout(Duration::from_secs(2), handle).await;
    server.shutdown().await;
}

/// After a dropped connection every subscribed symbol is sent exactly once
/// on the new connection.
#[tokio::test]
async fn test_reconnect_resubscribes_exactly_once() {
    let server = MockWsServer::start().await;
    let (manager, _tick_rx) = start_manager(server.url());
    let feed = manager.handle();

    feed.subscribe_symbol("BTCUSDT").await.unwrap();
    feed.subscribe_symbol("ETHUSDT").await.unwrap();
    feed.subscribe_symbol("SOLUSDT").await.unwrap();
    feed.unsubscribe_symbol("SOLUSDT").await.unwrap();

    assert!(
        wait_until(Duration::from_secs(2), || async {
            server.received_on(1).await.len() >= 2
        })
        .await
    );

    server.drop_connections();

    assert!(
        wait_until(Duration::from_secs(3), || async {
            server.received_on(2).await.len() >= 2
        })
        .await,
        "Should reconnect and resubscribe"
    );
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(
        server.received_on(2).await,
        vec![subscribe_frame("BTCUSDT"), subscribe_frame("ETHUSDT")]
    );
    assert_eq!(manager.connection_count(), 2);

    manager.shutdown();
    server.shutdown().await;
}

/// Mark prices arrive on the tick channel in frame order.
#[tokio::test]
async fn test_ticks_delivered_in_order() {
    let server = MockWsServer::start().await;
    let (manager, mut tick_rx) = start_manager(server.url());
    manager.handle().subscribe_symbol("BTCUSDT").await.unwrap();

    assert!(
        wait_until(Duration::from_secs(2), || async {
            !server.received_on(1).await.is_empty()
        })
        .await
    );

    server.push(r#"{"type":"order-tracking-data","data":{"BTCUSDT":{"mark_price":101.5},"ETHUSDT":{"mark_price":"2000"}}}"#);
    server.push(r#"{"type":"order-tracking-data","data":{"BTCUSDT":{"volume":3}}}"#);
    server.push_mark_price("BTCUSDT", 99.0);

    let mut ticks = Vec::new();
    while ticks.len() < 3 {
        let tick = timeout(Duration::from_secs(2), tick_rx.recv())
            .await
            .expect("tick within timeout")
            .expect("channel open");
        ticks.push((tick.symbol, tick.mark_price.inner()));
    }
    assert_eq!(
        ticks,
        vec![
            ("BTCUSDT".to_string(), dec!(101.5)),
            ("ETHUSDT".to_string(), dec!(2000)),
            ("BTCUSDT".to_string(), dec!(99)),
        ]
    );

    manager.shutdown();
    server.shutdown().await;
}

/// Test that connection respects max reconnect attempts.
#[tokio::test]
async fn test_ws_respects_max_reconnect_attempts() {
    let config = ConnectionConfig {
        url: "ws://127.0.0.1:59999".to_string(), // Invalid port
        max_reconnect_attempts: 2,
        reconnect_delay_ms: 100,
        ..Default::default()
    };
    let (tick_tx, _tick_rx) = mpsc::channel(100);
    let manager = ConnectionManager::new(config, tick_tx, None);

    let result = timeout(Duration::from_secs(5), manager.connect()).await;

    assert!(result.is_ok(), "Should stop after max reconnect attempts");
    assert!(result.unwrap().is_err());
}
