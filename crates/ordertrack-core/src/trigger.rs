//! Trigger hits and the events published for them.

use crate::decimal::{Price, Size};
use crate::position::{PendingOrder, PositionKind, TrackedPosition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which level of a position fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerLeg {
    StopLoss,
    TakeProfit,
}

impl TriggerLeg {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StopLoss => "stop_loss",
            Self::TakeProfit => "take_profit",
        }
    }
}

/// A stop-loss or take-profit hit on a tracked position.
///
/// `kind` is the position's monitoring kind (drives the close tags), `leg`
/// is the level that fired and `price` that level, used as the exit price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerHit {
    pub kind: PositionKind,
    pub leg: TriggerLeg,
    pub price: Price,
}

impl TriggerHit {
    pub fn event_type(&self) -> EventType {
        match (self.kind, self.leg) {
            (PositionKind::Sltp, TriggerLeg::StopLoss) => EventType::SltpSlHit,
            (PositionKind::Sltp, TriggerLeg::TakeProfit) => EventType::SltpTpHit,
            (_, TriggerLeg::StopLoss) => EventType::StopLossHit,
            (_, TriggerLeg::TakeProfit) => EventType::TakeProfitHit,
        }
    }

    pub fn message(&self) -> String {
        match self.event_type() {
            EventType::SltpSlHit => format!("SLTP Stop loss hit at {}", self.price),
            EventType::SltpTpHit => format!("SLTP Take profit hit at {}", self.price),
            EventType::StopLossHit => format!("Stop loss hit at {}", self.price),
            _ => format!("Take profit hit at {}", self.price),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    LimitOrderHit,
    StopLossHit,
    TakeProfitHit,
    SltpSlHit,
    SltpTpHit,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LimitOrderHit => "LIMIT_ORDER_HIT",
            Self::StopLossHit => "STOP_LOSS_HIT",
            Self::TakeProfitHit => "TAKE_PROFIT_HIT",
            Self::SltpSlHit => "SLTP_SL_HIT",
            Self::SltpTpHit => "SLTP_TP_HIT",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification payload for downstream consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEvent {
    pub order_id: Option<String>,
    pub user_id: String,
    pub stock_symbol: String,
    pub price: Price,
    pub operation: EventType,
    pub size: Size,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl TriggerEvent {
    pub fn limit_fill(order: &PendingOrder, timestamp: DateTime<Utc>) -> Self {
        Self {
            order_id: order.order_id.clone(),
            user_id: order.key.user_id.clone(),
            stock_symbol: order.key.symbol.clone(),
            price: order.entry_price,
            operation: EventType::LimitOrderHit,
            size: order.quantity,
            message: format!("LIMIT_ORDER_HIT detected for {}", order.key.symbol),
            timestamp,
        }
    }

    pub fn trigger_hit(
        position: &TrackedPosition,
        hit: &TriggerHit,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id: position.order_id.clone(),
            user_id: position.key.user_id.clone(),
            stock_symbol: position.key.symbol.clone(),
            price: hit.price,
            operation: hit.event_type(),
            size: position.quantity,
            message: hit.message(),
            timestamp,
        }
    }
}
