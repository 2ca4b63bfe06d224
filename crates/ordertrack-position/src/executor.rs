//! Runs the effects of a tick off the dispatch path.
//!
//! The registry has already removed every filled order and fired position
//! by the time an outcome reaches here; each effect runs as its own task so
//! persistence latency never holds up the next tick. Spawned effects are
//! tracked so shutdown can wait for settlements already under way.

use crate::error::SettlementError;
use crate::publisher::{publish_logged, DynPublisher};
use crate::registry::{LimitFill, TickOutcome, TriggerFired};
use crate::settlement::{SettlementContext, SettlementService};
use chrono::Utc;
use ordertrack_core::{OrderStatus, PositionStatus, TriggerEvent};
use ordertrack_persistence::DynGateway;
use ordertrack_telemetry::Metrics;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct ActionExecutor {
    gateway: DynGateway,
    settlement: Arc<SettlementService>,
    publisher: DynPublisher,
    tasks: TaskTracker,
}

impl ActionExecutor {
    pub fn new(
        gateway: DynGateway,
        settlement: Arc<SettlementService>,
        publisher: DynPublisher,
    ) -> Self {
        Self {
            gateway,
            settlement,
            publisher,
            tasks: TaskTracker::new(),
        }
    }

    /// Spawn one task per fill and per trigger hit.
    pub fn execute(&self, outcome: TickOutcome) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::with_capacity(outcome.fills.len() + outcome.hits.len());

        for fill in outcome.fills {
            let this = self.clone();
            tasks.push(self.tasks.spawn(async move { this.run_fill(fill).await }));
        }
        for fired in outcome.hits {
            let this = self.clone();
            tasks.push(self.tasks.spawn(async move { this.run_close(fired).await }));
        }
        tasks
    }

    /// Fills and closes still running.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Stop accepting work and wait for every spawned fill and close.
    pub async fn drain(&self) {
        self.tasks.close();
        if !self.tasks.is_empty() {
            info!(in_flight = self.tasks.len(), "Waiting for in-flight settlements");
        }
        self.tasks.wait().await;
    }

    /// Record a limit fill: stamp the originating order, open the stored
    /// position at the limit price and announce the fill.
    pub async fn run_fill(&self, fill: LimitFill) {
        let order = &fill.order;
        let pos_id = order.key.pos_id.as_str();
        let fill_price = order.entry_price;

        if let Some(order_id) = &order.order_id {
            let status = if fill.trackable {
                OrderStatus::Open
            } else {
                OrderStatus::Filled
            };
            if let Err(e) = self
                .gateway
                .mark_order_status(order_id, status, fill_price)
                .await
            {
                warn!(?e, order_id = %order_id, pos_id = %pos_id, "Failed to update filled order");
                Metrics::persistence_error("mark_order_status");
            }
        }

        match self.gateway.mark_position_open(pos_id, fill_price).await {
            Ok(true) => info!(key = %order.key, price = %fill_price, "Position opened by limit fill"),
            Ok(false) => debug!(key = %order.key, "Position no longer pending, left as is"),
            Err(e) => {
                warn!(?e, key = %order.key, "Failed to open position after limit fill");
                Metrics::persistence_error("mark_position_open");
            }
        }

        publish_logged(
            self.publisher.as_ref(),
            TriggerEvent::limit_fill(order, Utc::now()),
        )
        .await;
    }

    /// Announce a trigger hit and settle the position at the trigger level.
    pub async fn run_close(&self, fired: TriggerFired) {
        let TriggerFired { position, hit } = fired;

        publish_logged(
            self.publisher.as_ref(),
            TriggerEvent::trigger_hit(&position, &hit, Utc::now()),
        )
        .await;

        let ctx = SettlementContext {
            trigger_price: Some(hit.price),
            exit_price: None,
            kind: hit.kind,
            order_id: position.order_id.clone(),
        };
        let result = self
            .settlement
            .close_position(
                &position.key.user_id,
                &position.key.pos_id,
                PositionStatus::Closed,
                ctx,
            )
            .await;

        match result {
            Ok(report) => info!(
                key = %position.key,
                close_key = %report.close_key,
                realized_pnl = %report.realized_pnl,
                "Settlement complete"
            ),
            Err(SettlementError::AlreadyClosed { .. }) => {
                debug!(key = %position.key, "Settlement skipped, already closed")
            }
            Err(e) => error!(?e, key = %position.key, "Settlement failed"),
        }
    }
}
