//! Queue worker driving feed subscriptions.
//!
//! Every received message is deleted after processing, whatever the
//! outcome. A suppressed or failed unsubscribe is not retried; the next
//! removal for the symbol enqueues a fresh one.

use crate::error::QueueResult;
use crate::queue::{DynQueue, QueueMessage};
use ordertrack_core::SubscriptionTask;
use ordertrack_persistence::DynGateway;
use ordertrack_telemetry::Metrics;
use ordertrack_ws::SubscriptionControl;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Long-poll wait per receive.
    pub wait_time: Duration,
    /// Pause after an empty or failed receive.
    pub idle_backoff: Duration,
    pub max_messages: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            wait_time: Duration::from_secs(5),
            idle_backoff: Duration::from_millis(100),
            max_messages: 1,
        }
    }
}

pub struct QueueWorker {
    queue: DynQueue,
    gateway: DynGateway,
    feed: Arc<dyn SubscriptionControl>,
    config: WorkerConfig,
}

impl QueueWorker {
    pub fn new(
        queue: DynQueue,
        gateway: DynGateway,
        feed: Arc<dyn SubscriptionControl>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            gateway,
            feed,
            config,
        }
    }

    /// Poll until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            wait_ms = self.config.wait_time.as_millis(),
            "Subscription queue worker started"
        );

        loop {
            let received = tokio::select! {
                () = shutdown.cancelled() => break,
                received = self.queue.receive(self.config.max_messages, self.config.wait_time) => received,
            };

            let idle = match received {
                Ok(messages) => {
                    let idle = messages.is_empty();
                    for message in messages {
                        self.handle(message).await;
                    }
                    idle
                }
                Err(e) => {
                    warn!(?e, "Queue receive failed");
                    true
                }
            };

            if idle {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(self.config.idle_backoff) => {}
                }
            }
        }

        info!("Subscription queue worker stopped");
    }

    /// Process one message and delete it.
    pub async fn handle(&self, message: QueueMessage) {
        let (kind, outcome) = match SubscriptionTask::from_body(&message.body) {
            Ok(task) => {
                let outcome = match self.process(&task).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(?e, task = %task, "Subscription task failed");
                        "error"
                    }
                };
                (task.kind(), outcome)
            }
            Err(e) => {
                warn!(?e, body = %message.body, "Malformed subscription task");
                ("unknown", "invalid")
            }
        };
        Metrics::queue_task(kind, outcome);

        if let Err(e) = self.queue.delete(&message.receipt).await {
            warn!(?e, receipt = %message.receipt, "Failed to delete queue message");
        }
    }

    async fn process(&self, task: &SubscriptionTask) -> QueueResult<&'static str> {
        match task {
            SubscriptionTask::Subscribe { symbol } => {
                if self.feed.subscribe_symbol(symbol).await? {
                    Ok("subscribed")
                } else {
                    debug!(symbol = %symbol, "Already subscribed");
                    Ok("noop")
                }
            }
            SubscriptionTask::Unsubscribe { symbol } => {
                if self.gateway.has_active_position(symbol).await? {
                    info!(symbol = %symbol, "Open positions remain, unsubscribe suppressed");
                    Metrics::unsubscribe_suppressed();
                    return Ok("suppressed");
                }
                if self.feed.unsubscribe_symbol(symbol).await? {
                    Ok("unsubscribed")
                } else {
                    debug!(symbol = %symbol, "Not subscribed");
                    Ok("noop")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{InMemoryTaskQueue, TaskQueue};
    use ordertrack_core::{PositionStatus, Price, Side, Size, StoredPosition};
    use ordertrack_persistence::MemoryGateway;
    use ordertrack_ws::{ConnectionConfig, ConnectionManager, FeedHandle};
    use tokio::sync::mpsc;

    struct Fixture {
        queue: Arc<InMemoryTaskQueue>,
        gateway: Arc<MemoryGateway>,
        feed: FeedHandle,
        worker: QueueWorker,
        _manager: ConnectionManager,
    }

    fn fixture() -> Fixture {
        let queue = Arc::new(InMemoryTaskQueue::new(Duration::from_secs(30)));
        let gateway = Arc::new(MemoryGateway::new());
        let (tick_tx, _tick_rx) = mpsc::channel(8);
        let manager = ConnectionManager::new(ConnectionConfig::default(), tick_tx, None);
        let feed = manager.handle();
        let worker = QueueWorker::new(
            queue.clone(),
            gateway.clone(),
            Arc::new(feed.clone()),
            WorkerConfig::default(),
        );
        Fixture {
            queue,
            gateway,
            feed,
            worker,
            _manager: manager,
        }
    }

    async fn deliver(fixture: &Fixture, task: SubscriptionTask) {
        fixture.queue.send(task.to_body().unwrap()).await.unwrap();
        let message = fixture
            .queue
            .receive(1, Duration::ZERO)
            .await
            .unwrap()
            .remove(0);
        fixture.worker.handle(message).await;
    }

    fn open_position(symbol: &str) -> StoredPosition {
        StoredPosition {
            position_id: "p1".into(),
            user_id: "u1".into(),
            asset_symbol: symbol.into(),
            status: PositionStatus::Open,
            position_type: Side::Long,
            order_category: None,
            order_type: None,
            order_id: None,
            entry_price: Some(Price::new(100.into())),
            quantity: Some(Size::new(1.into())),
            initial_quantity: None,
            lot: None,
            leverage: None,
            contribution_amount: None,
            stop_loss: None,
            take_profit: None,
            currency: None,
            exit_price: None,
            closed_at: None,
            realized_pnl: None,
            position_closed_type: None,
            close_key: None,
        }
    }

    #[tokio::test]
    async fn test_subscribe_then_unsubscribe() {
        let fixture = fixture();
        deliver(&fixture, SubscriptionTask::Subscribe { symbol: "BTCUSDT".into() }).await;
        assert!(fixture.feed.is_subscribed("BTCUSDT"));

        deliver(&fixture, SubscriptionTask::Unsubscribe { symbol: "BTCUSDT".into() }).await;
        assert!(!fixture.feed.is_subscribed("BTCUSDT"));
        assert_eq!(fixture.queue.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_suppressed_while_open_position_exists() {
        let fixture = fixture();
        deliver(&fixture, SubscriptionTask::Subscribe { symbol: "ETHUSDT".into() }).await;
        fixture.gateway.insert_position(open_position("ETHUSDT"));

        deliver(&fixture, SubscriptionTask::Unsubscribe { symbol: "ETHUSDT".into() }).await;
        assert!(fixture.feed.is_subscribed("ETHUSDT"));
        assert_eq!(fixture.queue.in_flight_len(), 0, "suppressed task still deleted");
    }

    #[tokio::test]
    async fn test_store_failure_keeps_subscription_and_deletes() {
        let fixture = fixture();
        deliver(&fixture, SubscriptionTask::Subscribe { symbol: "SOLUSDT".into() }).await;
        fixture.gateway.fail_on("has_active_position");

        deliver(&fixture, SubscriptionTask::Unsubscribe { symbol: "SOLUSDT".into() }).await;
        assert!(fixture.feed.is_subscribed("SOLUSDT"));
        assert_eq!(fixture.queue.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn test_malformed_message_deleted() {
        let fixture = fixture();
        fixture.queue.send("{\"type\":\"resubscribe\"}".into()).await.unwrap();
        let message = fixture.queue.receive(1, Duration::ZERO).await.unwrap().remove(0);
        fixture.worker.handle(message).await;
        assert_eq!(fixture.queue.in_flight_len(), 0);
        assert_eq!(fixture.queue.ready_len(), 0);
    }

    #[tokio::test]
    async fn test_run_drains_until_shutdown() {
        let queue = Arc::new(InMemoryTaskQueue::new(Duration::from_secs(30)));
        let gateway = Arc::new(MemoryGateway::new());
        let (tick_tx, _tick_rx) = mpsc::channel(8);
        let manager = ConnectionManager::new(ConnectionConfig::default(), tick_tx, None);
        let feed = manager.handle();
        let config = WorkerConfig {
            wait_time: Duration::from_millis(50),
            idle_backoff: Duration::from_millis(5),
            max_messages: 1,
        };
        let worker = QueueWorker::new(queue.clone(), gateway, Arc::new(feed.clone()), config);

        let shutdown = CancellationToken::new();
        let join = tokio::spawn(worker.run(shutdown.clone()));

        for symbol in ["AAAUSDT", "BBBUSDT"] {
            let task = SubscriptionTask::Subscribe {
                symbol: symbol.into(),
            };
            queue.send(task.to_body().unwrap()).await.unwrap();
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while feed.subscribed_symbols().len() < 2 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(feed.subscribed_symbols(), vec!["AAAUSDT", "BBBUSDT"]);

        shutdown.cancel();
        join.await.unwrap();
    }
}
