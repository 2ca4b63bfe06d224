//! Feed wire messages.
//!
//! Inbound: `{"type": "order-tracking-data", "data": {"<symbol>": {"mark_price": <number>, ...}}}`.
//! Outbound: `{"action": "subscribe" | "unsubscribe", "symbol": "<symbol>"}`.

use crate::error::WsResult;
use chrono::{DateTime, Utc};
use ordertrack_core::Price;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use tracing::debug;

/// Message type carrying mark prices.
pub const TICK_MESSAGE_TYPE: &str = "order-tracking-data";

/// A mark price for one symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceTick {
    pub symbol: String,
    pub mark_price: Price,
    pub received_at: DateTime<Utc>,
}

impl PriceTick {
    pub fn new(symbol: impl Into<String>, mark_price: Price) -> Self {
        Self {
            symbol: symbol.into(),
            mark_price,
            received_at: Utc::now(),
        }
    }
}

/// Outbound subscription frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum FeedCommand {
    Subscribe { symbol: String },
    Unsubscribe { symbol: String },
}

impl FeedCommand {
    pub fn symbol(&self) -> &str {
        match self {
            Self::Subscribe { symbol } | Self::Unsubscribe { symbol } => symbol,
        }
    }
}

/// A parsed inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedFrame {
    /// Mark prices in frame order, plus the symbols dropped for lack of a
    /// usable `mark_price`.
    Ticks {
        ticks: Vec<PriceTick>,
        skipped: Vec<String>,
    },
    /// Any other message type; ignored by the engine.
    Other(String),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    data: Option<Map<String, Value>>,
}

/// Parse a text frame from the feed.
pub fn parse_frame(text: &str, received_at: DateTime<Utc>) -> WsResult<FeedFrame> {
    let envelope: Envelope = serde_json::from_str(text)?;
    if envelope.kind != TICK_MESSAGE_TYPE {
        return Ok(FeedFrame::Other(envelope.kind));
    }

    let mut ticks = Vec::new();
    let mut skipped = Vec::new();
    for (symbol, entry) in envelope.data.unwrap_or_default() {
        match entry.get("mark_price").and_then(mark_price) {
            Some(mark_price) => ticks.push(PriceTick {
                symbol,
                mark_price,
                received_at,
            }),
            None => {
                debug!(symbol = %symbol, "No usable mark_price, skipping");
                skipped.push(symbol);
            }
        }
    }
    Ok(FeedFrame::Ticks { ticks, skipped })
}

/// Extract a positive mark price from a JSON number or numeric string.
///
/// Numbers are converted from their textual form so the decimal matches
/// what was sent, not its binary float approximation.
fn mark_price(value: &Value) -> Option<Price> {
    let price = match value {
        Value::Number(n) => {
            let text = n.to_string();
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .map(Price::new)
                .ok()
                .or_else(|| n.as_f64().and_then(|f| Price::from_f64(f).ok()))
        }
        Value::String(s) => Decimal::from_str(s.trim()).ok().map(Price::new),
        _ => None,
    }?;
    price.positive()
}
