//! Canonical position record as held by the durable store.

use crate::decimal::{Price, Size};
use crate::position::{OrderCategory, PositionDraft, PositionStatus, Side};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredPosition {
    pub position_id: String,
    pub user_id: String,
    pub asset_symbol: String,
    pub status: PositionStatus,
    #[serde(default)]
    pub position_type: Side,
    #[serde(default)]
    pub order_category: Option<OrderCategory>,
    #[serde(default)]
    pub order_type: Option<String>,
    #[serde(default, alias = "orderID")]
    pub order_id: Option<String>,
    #[serde(default)]
    pub entry_price: Option<Price>,
    #[serde(default)]
    pub quantity: Option<Size>,
    #[serde(default)]
    pub initial_quantity: Option<Size>,
    #[serde(default)]
    pub lot: Option<Size>,
    #[serde(default)]
    pub leverage: Option<Decimal>,
    #[serde(default)]
    pub contribution_amount: Option<Decimal>,
    #[serde(default)]
    pub stop_loss: Option<Price>,
    #[serde(default)]
    pub take_profit: Option<Price>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_price: Option<Price>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realized_pnl: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_closed_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_key: Option<String>,
}

impl StoredPosition {
    /// `quantity`, falling back to `initialQuantity`.
    pub fn effective_quantity(&self) -> Option<Size> {
        self.quantity.or(self.initial_quantity)
    }

    pub fn to_draft(&self) -> PositionDraft {
        PositionDraft {
            symbol: self.asset_symbol.clone(),
            user_id: self.user_id.clone(),
            pos_id: self.position_id.clone(),
            status: Some(self.status),
            side: Some(self.position_type),
            sl: self.stop_loss,
            tp: self.take_profit,
            entry_price: self.entry_price,
            quantity: Some(self.effective_quantity().unwrap_or_default()),
            order_category: self.order_category,
            leverage: self.leverage,
            margin_used: self.contribution_amount,
            order_id: self.order_id.clone(),
        }
    }
}

/// Fields written when a position is closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionClose {
    pub status: PositionStatus,
    pub exit_price: Price,
    pub closed_at: DateTime<Utc>,
    pub realized_pnl: Decimal,
    pub position_closed_type: String,
    pub close_key: String,
}

/// Result of a conditional close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    /// The stored status was no longer OPEN or PENDING; nothing was written.
    AlreadyClosed(PositionStatus),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::{PositionKind, PositionRecord};
    use rust_decimal_macros::dec;

    #[test]
    fn test_seed_record_parses_with_defaults() {
        let json = r#"{
            "positionId": "p1",
            "userId": "u1",
            "assetSymbol": "BTCUSDT",
            "status": "OPEN",
            "entryPrice": 100,
            "initialQuantity": "2",
            "stopLoss": 95,
            "contributionAmount": 50
        }"#;
        let stored: StoredPosition = serde_json::from_str(json).unwrap();
        assert_eq!(stored.position_type, Side::Long);
        assert_eq!(stored.effective_quantity(), Some(Size::new(dec!(2))));

        match stored.to_draft().classify().unwrap() {
            Some(PositionRecord::Tracked(t)) => {
                assert_eq!(t.kind, PositionKind::Sl);
                assert_eq!(t.margin_used, Some(dec!(50)));
            }
            other => panic!("expected tracked, got {other:?}"),
        }
    }
}
