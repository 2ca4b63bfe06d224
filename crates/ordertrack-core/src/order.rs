//! Order execution records.
//!
//! Orders are append-only: one is written per automatic close, and the
//! originating order of a position is only ever stamped (status, PnL).

use crate::decimal::{Price, Size};
use crate::position::Side;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order operation: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderOperation {
    Buy,
    Sell,
}

impl OrderOperation {
    /// The operation that unwinds a position of `side`.
    pub fn closing(side: Side) -> Self {
        match side {
            Side::Long => Self::Sell,
            Side::Short => Self::Buy,
        }
    }
}

impl fmt::Display for OrderOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Pending,
    Open,
    Filled,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Open => write!(f, "OPEN"),
            Self::Filled => write!(f, "FILLED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderMetadata {
    pub source: String,
    pub strategy: String,
    pub operation: OrderOperation,
    pub order_type: String,
    pub source_currency: String,
    pub size: Size,
}

/// A persisted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    pub order_id: String,
    pub user_id: String,
    pub stock_symbol: String,
    pub side: Side,
    pub operation: OrderOperation,
    pub order_type: String,
    pub status: OrderStatus,
    pub price: Price,
    pub size: Size,
    pub lot: Size,
    pub fee: Decimal,
    pub fee_in_local: Decimal,
    pub leverage: Decimal,
    pub margin_amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<Price>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<Price>,
    pub position_id: String,
    pub currency: String,
    pub order_message: String,
    pub total_value: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pnl: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_key: Option<String>,
    pub meta_data: OrderMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderRecord {
    pub const MARKET: &'static str = "MARKET";
    pub const FILLED_AT_MARKET: &'static str = "Order filled at market";

    /// Identifier of a system-generated closing order.
    pub fn auto_close_id(now: DateTime<Utc>) -> String {
        format!("INOR-{}", now.timestamp_millis())
    }
}
