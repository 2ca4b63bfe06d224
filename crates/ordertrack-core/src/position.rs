//! Position records held by the registry.
//!
//! A position arrives as a loosely-populated [`PositionDraft`] (from the
//! control interface or the store) and is classified into a
//! [`PositionRecord`]: a pending limit order awaiting its fill, or a tracked
//! position with a derived [`PositionKind`]. Drafts that classify to neither
//! are accepted but never monitored.

use crate::decimal::{Price, Size};
use crate::error::{CoreError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Position direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    #[default]
    Long,
    Short,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// Lifecycle status as stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Open,
    Pending,
    Closed,
    Cancelled,
}

impl PositionStatus {
    /// OPEN and PENDING positions are reloaded into the registry on startup.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Open | Self::Pending)
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "OPEN",
            Self::Pending => "PENDING",
            Self::Closed => "CLOSED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Monitoring kind of a tracked position. Always derived, never trusted
/// from input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionKind {
    Sl,
    Tp,
    Sltp,
}

impl PositionKind {
    /// Trigger type tag (`sl`, `tp`, `sltp`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sl => "sl",
            Self::Tp => "tp",
            Self::Sltp => "sltp",
        }
    }

    /// `positionClosedType` written on an automatic close.
    pub fn closed_type(&self) -> &'static str {
        match self {
            Self::Sl => "auto_SL",
            Self::Tp => "auto_TP",
            Self::Sltp => "auto_TPSL",
        }
    }

    /// Label used in the PnL ledger reason.
    pub fn reason_label(&self) -> &'static str {
        match self {
            Self::Sl => "SL",
            Self::Tp => "TP",
            Self::Sltp => "SLTP",
        }
    }
}

impl fmt::Display for PositionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derive the monitoring kind from stop-loss and take-profit levels.
///
/// Only strictly positive levels count as set.
pub fn derive_kind(stop_loss: Option<Price>, take_profit: Option<Price>) -> Option<PositionKind> {
    let has_sl = stop_loss.is_some_and(|p| p.is_positive());
    let has_tp = take_profit.is_some_and(|p| p.is_positive());
    match (has_sl, has_tp) {
        (true, true) => Some(PositionKind::Sltp),
        (true, false) => Some(PositionKind::Sl),
        (false, true) => Some(PositionKind::Tp),
        (false, false) => None,
    }
}

/// Limit entry category of a pending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderCategory {
    LongLimit,
    ShortLimit,
}

impl OrderCategory {
    pub fn for_side(side: Side) -> Self {
        match side {
            Side::Long => Self::LongLimit,
            Side::Short => Self::ShortLimit,
        }
    }

    /// Whether a mark price fills a limit at `limit`.
    pub fn fills_at(&self, mark: Price, limit: Price) -> bool {
        match self {
            Self::LongLimit => mark >= limit,
            Self::ShortLimit => mark <= limit,
        }
    }
}

impl fmt::Display for OrderCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LongLimit => write!(f, "LONG_LIMIT"),
            Self::ShortLimit => write!(f, "SHORT_LIMIT"),
        }
    }
}

/// Registry key: symbol -> user -> position id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub symbol: String,
    pub user_id: String,
    pub pos_id: String,
}

impl PositionKey {
    pub fn new(
        symbol: impl Into<String>,
        user_id: impl Into<String>,
        pos_id: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            user_id: user_id.into(),
            pos_id: pos_id.into(),
        }
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.symbol, self.user_id, self.pos_id)
    }
}

/// An open position under stop-loss / take-profit monitoring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedPosition {
    pub key: PositionKey,
    pub kind: PositionKind,
    pub side: Side,
    pub stop_loss: Option<Price>,
    pub take_profit: Option<Price>,
    pub entry_price: Option<Price>,
    pub quantity: Size,
    pub leverage: Option<Decimal>,
    pub margin_used: Option<Decimal>,
    pub order_id: Option<String>,
}

/// A limit entry waiting for the mark price to cross its level.
///
/// Carries the stop-loss / take-profit levels so the filled position can
/// be promoted into monitoring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOrder {
    pub key: PositionKey,
    pub side: Side,
    pub category: OrderCategory,
    pub entry_price: Price,
    pub quantity: Size,
    pub stop_loss: Option<Price>,
    pub take_profit: Option<Price>,
    pub leverage: Option<Decimal>,
    pub margin_used: Option<Decimal>,
    pub order_id: Option<String>,
}

impl PendingOrder {
    /// The position this order becomes once filled at its limit price, if
    /// it carries levels worth monitoring.
    pub fn into_filled(self) -> Option<TrackedPosition> {
        let kind = derive_kind(self.stop_loss, self.take_profit)?;
        Some(TrackedPosition {
            key: self.key,
            kind,
            side: self.side,
            stop_loss: self.stop_loss.and_then(Price::positive),
            take_profit: self.take_profit.and_then(Price::positive),
            entry_price: Some(self.entry_price),
            quantity: self.quantity,
            leverage: self.leverage,
            margin_used: self.margin_used,
            order_id: self.order_id,
        })
    }

    /// Whether filling this order yields a monitored position.
    pub fn is_trackable(&self) -> bool {
        derive_kind(self.stop_loss, self.take_profit).is_some()
    }
}

/// A monitored registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PositionRecord {
    Pending(PendingOrder),
    Tracked(TrackedPosition),
}

impl PositionRecord {
    pub fn key(&self) -> &PositionKey {
        match self {
            Self::Pending(p) => &p.key,
            Self::Tracked(t) => &t.key,
        }
    }
}

/// Loosely-populated position input.
///
/// Field names follow the control interface payloads; the store's names
/// are accepted as aliases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionDraft {
    #[serde(alias = "assetSymbol")]
    pub symbol: String,
    pub user_id: String,
    #[serde(alias = "positionId")]
    pub pos_id: String,
    #[serde(default)]
    pub status: Option<PositionStatus>,
    #[serde(default, rename = "positionType")]
    pub side: Option<Side>,
    #[serde(default, alias = "stopLoss")]
    pub sl: Option<Price>,
    #[serde(default, alias = "takeProfit")]
    pub tp: Option<Price>,
    #[serde(default)]
    pub entry_price: Option<Price>,
    #[serde(default)]
    pub quantity: Option<Size>,
    #[serde(default)]
    pub order_category: Option<OrderCategory>,
    #[serde(default)]
    pub leverage: Option<Decimal>,
    #[serde(default, alias = "contributionAmount")]
    pub margin_used: Option<Decimal>,
    #[serde(default, alias = "orderID")]
    pub order_id: Option<String>,
}

impl PositionDraft {
    pub fn key(&self) -> PositionKey {
        PositionKey::new(&self.symbol, &self.user_id, &self.pos_id)
    }

    /// Classify the draft into a monitored record.
    ///
    /// PENDING drafts become pending orders (and require a limit price).
    /// CLOSED and CANCELLED drafts are never monitored. Anything else is
    /// tracked when a kind is derivable, and otherwise yields `None`:
    /// accepted but not monitored.
    pub fn classify(&self) -> Result<Option<PositionRecord>> {
        if self.status.is_some_and(|s| !s.is_active()) {
            return Ok(None);
        }
        let side = self.side.unwrap_or_default();
        let quantity = self.quantity.unwrap_or_default();

        if self.status == Some(PositionStatus::Pending) {
            let entry_price = self.entry_price.ok_or_else(|| CoreError::MissingField {
                pos_id: self.pos_id.clone(),
                field: "entryPrice",
            })?;
            return Ok(Some(PositionRecord::Pending(PendingOrder {
                key: self.key(),
                side,
                category: self
                    .order_category
                    .unwrap_or_else(|| OrderCategory::for_side(side)),
                entry_price,
                quantity,
                stop_loss: self.sl.and_then(Price::positive),
                take_profit: self.tp.and_then(Price::positive),
                leverage: self.leverage,
                margin_used: self.margin_used,
                order_id: self.order_id.clone(),
            })));
        }

        let Some(kind) = derive_kind(self.sl, self.tp) else {
            return Ok(None);
        };
        Ok(Some(PositionRecord::Tracked(TrackedPosition {
            key: self.key(),
            kind,
            side,
            stop_loss: self.sl.and_then(Price::positive),
            take_profit: self.tp.and_then(Price::positive),
            entry_price: self.entry_price,
            quantity,
            leverage: self.leverage,
            margin_used: self.margin_used,
            order_id: self.order_id.clone(),
        })))
    }

    /// Merge a patch into this draft. Fields absent from the patch are kept.
    pub fn apply(&mut self, patch: &PositionPatch) {
        if let Some(status) = patch.status {
            self.status = Some(status);
        }
        if let Some(side) = patch.side {
            self.side = Some(side);
        }
        if let Some(sl) = patch.sl {
            self.sl = sl.and_then(Price::positive);
        }
        if let Some(tp) = patch.tp {
            self.tp = tp.and_then(Price::positive);
        }
        if let Some(entry_price) = patch.entry_price {
            self.entry_price = Some(entry_price);
        }
        if let Some(quantity) = patch.quantity {
            self.quantity = Some(quantity);
        }
        if let Some(category) = patch.order_category {
            self.order_category = Some(category);
        }
        if let Some(leverage) = patch.leverage {
            self.leverage = Some(leverage);
        }
        if let Some(margin) = patch.margin_used {
            self.margin_used = Some(margin);
        }
        if let Some(order_id) = &patch.order_id {
            self.order_id = Some(order_id.clone());
        }
    }
}

impl From<&PositionRecord> for PositionDraft {
    fn from(record: &PositionRecord) -> Self {
        match record {
            PositionRecord::Pending(p) => Self {
                symbol: p.key.symbol.clone(),
                user_id: p.key.user_id.clone(),
                pos_id: p.key.pos_id.clone(),
                status: Some(PositionStatus::Pending),
                side: Some(p.side),
                sl: p.stop_loss,
                tp: p.take_profit,
                entry_price: Some(p.entry_price),
                quantity: Some(p.quantity),
                order_category: Some(p.category),
                leverage: p.leverage,
                margin_used: p.margin_used,
                order_id: p.order_id.clone(),
            },
            PositionRecord::Tracked(t) => Self {
                symbol: t.key.symbol.clone(),
                user_id: t.key.user_id.clone(),
                pos_id: t.key.pos_id.clone(),
                status: Some(PositionStatus::Open),
                side: Some(t.side),
                sl: t.stop_loss,
                tp: t.take_profit,
                entry_price: t.entry_price,
                quantity: Some(t.quantity),
                order_category: None,
                leverage: t.leverage,
                margin_used: t.margin_used,
                order_id: t.order_id.clone(),
            },
        }
    }
}

/// Partial update to a position.
///
/// `sl` and `tp` distinguish "absent" (`None`) from "explicitly cleared"
/// (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionPatch {
    #[serde(default)]
    pub status: Option<PositionStatus>,
    #[serde(default, rename = "positionType")]
    pub side: Option<Side>,
    #[serde(
        default,
        alias = "stopLoss",
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub sl: Option<Option<Price>>,
    #[serde(
        default,
        alias = "takeProfit",
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub tp: Option<Option<Price>>,
    #[serde(default)]
    pub entry_price: Option<Price>,
    #[serde(default)]
    pub quantity: Option<Size>,
    #[serde(default)]
    pub order_category: Option<OrderCategory>,
    #[serde(default)]
    pub leverage: Option<Decimal>,
    #[serde(default, alias = "contributionAmount")]
    pub margin_used: Option<Decimal>,
    #[serde(default, alias = "orderID")]
    pub order_id: Option<String>,
}

impl PositionPatch {
    /// Both levels were sent and neither holds a usable (positive) value.
    pub fn clears_triggers(&self) -> bool {
        let cleared = |level: &Option<Option<Price>>| {
            matches!(level, Some(v) if v.and_then(Price::positive).is_none())
        };
        cleared(&self.sl) && cleared(&self.tp)
    }
}

/// A field that is present in the payload, even as `null`, deserializes to
/// `Some(..)`; an absent field falls back to `Default` (`None`).
fn present<'de, D, T>(de: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}
