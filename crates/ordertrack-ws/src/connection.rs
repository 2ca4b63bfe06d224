//! Price feed connection manager.
//!
//! Handles the connection lifecycle, fixed-delay reconnection and
//! subscription restoration after reconnection. Subscribe/unsubscribe
//! requests go through a [`FeedHandle`], which updates the shared
//! [`SubscriptionSet`] and queues a frame for the live connection.

use crate::error::{WsError, WsResult};
use crate::heartbeat::HeartbeatManager;
use crate::message::{parse_frame, FeedCommand, FeedFrame, PriceTick};
use crate::registrar::DynRegistrar;
use crate::subscription::{SubscriptionControl, SubscriptionSet};
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use ordertrack_core::BoxFuture;
use ordertrack_telemetry::Metrics;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub url: String,
    /// Maximum consecutive failed connections (0 = infinite).
    pub max_reconnect_attempts: u32,
    /// Fixed delay between a disconnect and the next attempt.
    pub reconnect_delay_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// Pong must arrive within this.
    pub heartbeat_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_reconnect_attempts: 0,
            reconnect_delay_ms: 5000,
            heartbeat_interval_ms: 30000,
            heartbeat_timeout_ms: 10000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Price feed connection manager.
pub struct ConnectionManager {
    config: ConnectionConfig,
    state: Arc<RwLock<ConnectionState>>,
    subscriptions: Arc<SubscriptionSet>,
    heartbeat: HeartbeatManager,
    tick_tx: mpsc::Sender<PriceTick>,
    registrar: Option<DynRegistrar>,
    outbound_tx: mpsc::UnboundedSender<FeedCommand>,
    outbound_rx: TokioMutex<mpsc::UnboundedReceiver<FeedCommand>>,
    /// Set while `connect` runs; a second concurrent loop is refused.
    running: AtomicBool,
    /// Successful connections so far.
    connections: AtomicU64,
    shutdown_token: CancellationToken,
}

impl ConnectionManager {
    pub fn new(
        config: ConnectionConfig,
        tick_tx: mpsc::Sender<PriceTick>,
        registrar: Option<DynRegistrar>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            heartbeat: HeartbeatManager::new(
                config.heartbeat_interval_ms,
                config.heartbeat_timeout_ms,
            ),
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            subscriptions: Arc::new(SubscriptionSet::new()),
            tick_tx,
            registrar,
            outbound_tx,
            outbound_rx: TokioMutex::new(outbound_rx),
            running: AtomicBool::new(false),
            connections: AtomicU64::new(0),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Handle for subscribing and unsubscribing symbols. Cheap to clone.
    pub fn handle(&self) -> FeedHandle {
        FeedHandle {
            subscriptions: self.subscriptions.clone(),
            outbound_tx: self.outbound_tx.clone(),
            registrar: self.registrar.clone(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn connection_count(&self) -> u64 {
        self.connections.load(Ordering::SeqCst)
    }

    /// Signal graceful shutdown. The message loop sends a Close frame and
    /// the reconnect loop exits without another attempt.
    pub fn shutdown(&self) {
        info!("Feed shutdown requested");
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Connect and keep the connection alive until shutdown.
    ///
    /// Only one call may run at a time, so at most one reconnect attempt is
    /// ever in flight.
    pub async fn connect(&self) -> WsResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(WsError::AlreadyRunning);
        }
        let result = self.connect_with_retry().await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn connect_with_retry(&self) -> WsResult<()> {
        let mut attempt = 0u32;

        loop {
            if self.is_shutdown() {
                info!("Shutdown requested, exiting connect loop");
                *self.state.write() = ConnectionState::Disconnected;
                return Ok(());
            }

            *self.state.write() = ConnectionState::Connecting;
            let connections_before = self.connection_count();

            let reason = match self.try_connect().await {
                Ok(()) => {
                    info!("Feed connection closed");
                    "closed"
                }
                Err(WsError::HeartbeatTimeout) => {
                    error!("Feed heartbeat timeout");
                    "heartbeat_timeout"
                }
                Err(e) => {
                    error!(?e, "Feed connection error");
                    "error"
                }
            };
            Metrics::feed_disconnected();

            if self.is_shutdown() {
                info!("Shutdown requested after disconnect, not reconnecting");
                *self.state.write() = ConnectionState::Disconnected;
                return Ok(());
            }

            if self.connection_count() > connections_before {
                attempt = 0;
            }
            attempt += 1;

            if self.config.max_reconnect_attempts > 0
                && attempt >= self.config.max_reconnect_attempts
            {
                error!(attempt, "Max reconnection attempts reached");
                *self.state.write() = ConnectionState::Disconnected;
                return Err(WsError::ConnectionFailed(
                    "Max reconnection attempts reached".to_string(),
                ));
            }

            *self.state.write() = ConnectionState::Reconnecting;
            Metrics::feed_reconnect(reason);

            let delay = Duration::from_millis(self.config.reconnect_delay_ms);
            warn!(attempt, delay_ms = delay.as_millis(), "Reconnecting");

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown requested during backoff, exiting");
                    *self.state.write() = ConnectionState::Disconnected;
                    return Ok(());
                }
            }
        }
    }

    async fn try_connect(&self) -> WsResult<()> {
        info!(url = %self.config.url, "Connecting to price feed");

        let (ws_stream, _response) =
            connect_async_tls_with_config(&self.config.url, None, true, None).await?;
        let (mut write, mut read) = ws_stream.split();

        // Held for the whole connection; commands queued while disconnected
        // are filtered against the restored set below.
        let mut outbound_rx = self.outbound_rx.lock().await;

        *self.state.write() = ConnectionState::Connected;
        self.connections.fetch_add(1, Ordering::SeqCst);
        Metrics::feed_connected();
        info!("Price feed connected");

        self.heartbeat.reset();

        let mut live = HashSet::new();
        self.restore_subscriptions(&mut write, &mut live).await?;

        loop {
            tokio::select! {
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received in message loop");
                    if let Err(e) = write.send(Message::Close(None)).await {
                        warn!(?e, "Failed to send Close frame during shutdown");
                    }
                    *self.state.write() = ConnectionState::Disconnected;
                    return Ok(());
                }

                msg = read.next() => {
                    self.handle_incoming(msg, &mut write).await?;
                }

                Some(command) = outbound_rx.recv() => {
                    if self.admit(&command, &mut live) {
                        let text = serde_json::to_string(&command)?;
                        write.send(Message::Text(text)).await?;
                        debug!(?command, "Sent feed command");
                    } else {
                        debug!(?command, "Dropping stale feed command");
                    }
                }

                () = self.heartbeat.wait_for_check() => {
                    if self.heartbeat.is_timed_out() {
                        return Err(WsError::HeartbeatTimeout);
                    }
                    if self.heartbeat.should_send_ping() {
                        write.send(Message::Ping(Vec::new())).await?;
                        self.heartbeat.record_ping();
                        debug!("Sent heartbeat ping");
                    }
                }
            }
        }
    }

    async fn handle_incoming(
        &self,
        msg: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
        write: &mut WsSink,
    ) -> WsResult<()> {
        match msg {
            Some(Ok(Message::Text(text))) => {
                self.heartbeat.record_message();
                self.handle_text_message(&text).await;
                Ok(())
            }
            Some(Ok(Message::Ping(data))) => {
                self.heartbeat.record_message();
                write.send(Message::Pong(data)).await?;
                Ok(())
            }
            Some(Ok(Message::Pong(_))) => {
                self.heartbeat.record_message();
                self.heartbeat.record_pong();
                Ok(())
            }
            Some(Ok(Message::Close(frame))) => {
                let (code, reason) = frame
                    .map(|f| (f.code.into(), f.reason.to_string()))
                    .unwrap_or((1000, "Normal close".to_string()));
                warn!(code, %reason, "Feed closed by server");
                Err(WsError::ConnectionClosed { code, reason })
            }
            Some(Ok(_)) => Ok(()),
            Some(Err(e)) => {
                error!(?e, "Feed read error");
                Err(e.into())
            }
            None => Err(WsError::ConnectionClosed {
                code: 1006,
                reason: "Stream ended".to_string(),
            }),
        }
    }

    async fn handle_text_message(&self, text: &str) {
        let frame = match parse_frame(text, Utc::now()) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(?e, "Unparseable feed message");
                return;
            }
        };

        match frame {
            FeedFrame::Ticks { ticks, skipped } => {
                for _ in &skipped {
                    Metrics::tick_skipped("no_mark_price");
                }
                for tick in ticks {
                    Metrics::tick_received();
                    if self.tick_tx.send(tick).await.is_err() {
                        warn!("Tick receiver dropped");
                        return;
                    }
                }
            }
            FeedFrame::Other(kind) => {
                debug!(kind = %kind, "Ignoring feed message");
            }
        }
    }

    /// Replay the subscription set on a fresh connection, one frame per
    /// symbol.
    async fn restore_subscriptions(
        &self,
        write: &mut WsSink,
        live: &mut HashSet<String>,
    ) -> WsResult<()> {
        let symbols = self.subscriptions.snapshot();
        info!(count = symbols.len(), "Restoring subscriptions");

        for symbol in symbols {
            let command = FeedCommand::Subscribe {
                symbol: symbol.clone(),
            };
            write
                .send(Message::Text(serde_json::to_string(&command)?))
                .await?;
            live.insert(symbol);
        }
        Ok(())
    }

    /// Whether a queued command still needs to go out on this connection.
    ///
    /// `live` is what this connection has been told; the subscription set is
    /// what it should be told. A command is sent only when it moves the
    /// former toward the latter.
    fn admit(&self, command: &FeedCommand, live: &mut HashSet<String>) -> bool {
        match command {
            FeedCommand::Subscribe { symbol } => {
                self.subscriptions.contains(symbol) && live.insert(symbol.clone())
            }
            FeedCommand::Unsubscribe { symbol } => {
                !self.subscriptions.contains(symbol) && live.remove(symbol)
            }
        }
    }
}

/// Subscription handle for a [`ConnectionManager`].
#[derive(Clone)]
pub struct FeedHandle {
    subscriptions: Arc<SubscriptionSet>,
    outbound_tx: mpsc::UnboundedSender<FeedCommand>,
    registrar: Option<DynRegistrar>,
}

impl FeedHandle {
    pub fn is_subscribed(&self, symbol: &str) -> bool {
        self.subscriptions.contains(symbol)
    }

    pub fn subscribed_symbols(&self) -> Vec<String> {
        self.subscriptions.snapshot()
    }

    /// Subscribe to `symbol` unless already subscribed.
    ///
    /// The registrar is notified first; its failure is logged and does not
    /// stop the subscription. If the feed is down the frame goes out when
    /// the subscription set is replayed on reconnect.
    pub async fn subscribe_symbol(&self, symbol: &str) -> WsResult<bool> {
        if self.subscriptions.contains(symbol) {
            debug!(symbol = %symbol, "Already subscribed");
            return Ok(false);
        }

        if let Some(registrar) = &self.registrar {
            if let Err(e) = registrar.notify_subscribe(symbol).await {
                warn!(?e, symbol = %symbol, "Registrar subscribe notification failed");
            }
        }

        if !self.subscriptions.insert(symbol) {
            return Ok(false);
        }
        Metrics::feed_subscriptions(self.subscriptions.len());
        self.send(FeedCommand::Subscribe {
            symbol: symbol.to_string(),
        })?;
        info!(symbol = %symbol, "Subscribed");
        Ok(true)
    }

    /// Unsubscribe from `symbol` if subscribed.
    pub async fn unsubscribe_symbol(&self, symbol: &str) -> WsResult<bool> {
        if !self.subscriptions.contains(symbol) {
            debug!(symbol = %symbol, "Not subscribed");
            return Ok(false);
        }

        if let Some(registrar) = &self.registrar {
            if let Err(e) = registrar.notify_unsubscribe(symbol).await {
                warn!(?e, symbol = %symbol, "Registrar unsubscribe notification failed");
            }
        }

        if !self.subscriptions.remove(symbol) {
            return Ok(false);
        }
        Metrics::feed_subscriptions(self.subscriptions.len());
        self.send(FeedCommand::Unsubscribe {
            symbol: symbol.to_string(),
        })?;
        info!(symbol = %symbol, "Unsubscribed");
        Ok(true)
    }

    fn send(&self, command: FeedCommand) -> WsResult<()> {
        self.outbound_tx
            .send(command)
            .map_err(|_| WsError::SendFailed("feed connection manager dropped".to_string()))
    }
}

impl SubscriptionControl for FeedHandle {
    fn subscribe_symbol<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, WsResult<bool>> {
        Box::pin(FeedHandle::subscribe_symbol(self, symbol))
    }

    fn unsubscribe_symbol<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, WsResult<bool>> {
        Box::pin(FeedHandle::unsubscribe_symbol(self, symbol))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registrar::RecordingRegistrar;

    fn manager(registrar: Option<DynRegistrar>) -> ConnectionManager {
        let (tick_tx, _tick_rx) = mpsc::channel(16);
        ConnectionManager::new(ConnectionConfig::default(), tick_tx, registrar)
    }

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.max_reconnect_attempts, 0);
        assert_eq!(config.reconnect_delay_ms, 5000);
        assert_eq!(config.heartbeat_interval_ms, 30000);
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let registrar = Arc::new(RecordingRegistrar::new());
        let manager = manager(Some(registrar.clone()));
        let handle = manager.handle();

        assert!(handle.subscribe_symbol("BTCUSDT").await.unwrap());
        assert!(!handle.subscribe_symbol("BTCUSDT").await.unwrap());
        assert!(handle.is_subscribed("BTCUSDT"));
        assert_eq!(registrar.calls().len(), 1);

        let mut rx = manager.outbound_rx.lock().await;
        assert_eq!(
            rx.try_recv().unwrap(),
            FeedCommand::Subscribe {
                symbol: "BTCUSDT".into()
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_registrar_failure_does_not_block_subscription() {
        let registrar = Arc::new(RecordingRegistrar::new());
        registrar.set_failing(true);
        let manager = manager(Some(registrar.clone()));
        let handle = manager.handle();

        assert!(handle.subscribe_symbol("ETHUSDT").await.unwrap());
        assert!(handle.is_subscribed("ETHUSDT"));
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_symbol_noop() {
        let registrar = Arc::new(RecordingRegistrar::new());
        let manager = manager(Some(registrar.clone()));
        let handle = manager.handle();

        assert!(!handle.unsubscribe_symbol("ETHUSDT").await.unwrap());
        assert!(registrar.calls().is_empty());
    }

    #[tokio::test]
    async fn test_stale_commands_filtered_against_live_set() {
        let manager = manager(None);
        let handle = manager.handle();
        let mut live = HashSet::new();

        // Subscribed and already restored on this connection.
        handle.subscribe_symbol("BTCUSDT").await.unwrap();
        live.insert("BTCUSDT".to_string());
        assert!(!manager.admit(
            &FeedCommand::Subscribe {
                symbol: "BTCUSDT".into()
            },
            &mut live
        ));

        // Subscribed then unsubscribed while disconnected.
        handle.subscribe_symbol("SOLUSDT").await.unwrap();
        handle.unsubscribe_symbol("SOLUSDT").await.unwrap();
        assert!(!manager.admit(
            &FeedCommand::Subscribe {
                symbol: "SOLUSDT".into()
            },
            &mut live
        ));
        assert!(!manager.admit(
            &FeedCommand::Unsubscribe {
                symbol: "SOLUSDT".into()
            },
            &mut live
        ));

        // Fresh subscription while connected.
        handle.subscribe_symbol("ETHUSDT").await.unwrap();
        assert!(manager.admit(
            &FeedCommand::Subscribe {
                symbol: "ETHUSDT".into()
            },
            &mut live
        ));
    }

    #[tokio::test]
    async fn test_second_connect_refused_while_running() {
        let manager = Arc::new(manager(None));
        manager.running.store(true, Ordering::SeqCst);
        assert!(matches!(
            manager.connect().await,
            Err(WsError::AlreadyRunning)
        ));
    }
}
