//! Trigger event publication.
//!
//! Events are fire-and-forget notifications for downstream consumers. A
//! failed publish is logged and counted; it never affects the close.

use crate::error::PositionResult;
use ordertrack_core::{BoxFuture, TriggerEvent};
use ordertrack_telemetry::Metrics;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: TriggerEvent) -> BoxFuture<'_, PositionResult<()>>;
}

/// Arc wrapper for publisher trait objects.
pub type DynPublisher = Arc<dyn EventPublisher>;

/// Publish and record the outcome; errors are swallowed after logging.
pub async fn publish_logged(publisher: &dyn EventPublisher, event: TriggerEvent) {
    let operation = event.operation;
    let user_id = event.user_id.clone();
    let result = publisher.publish(event).await;
    Metrics::event_published(operation.as_str(), result.is_ok());
    if let Err(e) = result {
        warn!(?e, operation = %operation, user_id = %user_id, "Failed to publish trigger event");
    }
}

/// Publishes events as structured log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPublisher;

impl EventPublisher for TracingPublisher {
    fn publish(&self, event: TriggerEvent) -> BoxFuture<'_, PositionResult<()>> {
        Box::pin(async move {
            let payload = serde_json::to_string(&event).unwrap_or_default();
            info!(
                operation = %event.operation,
                user_id = %event.user_id,
                symbol = %event.stock_symbol,
                price = %event.price,
                payload = %payload,
                "Trigger event"
            );
            Ok(())
        })
    }
}

/// Keeps published events in memory, for tests.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<TriggerEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TriggerEvent> {
        self.events.lock().clone()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: TriggerEvent) -> BoxFuture<'_, PositionResult<()>> {
        Box::pin(async move {
            self.events.lock().push(event);
            Ok(())
        })
    }
}
