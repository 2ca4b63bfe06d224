//! Per-tick trigger decisions.
//!
//! Pure functions over a mark price; the registry actor applies them and
//! owns the resulting state changes.

use ordertrack_core::{
    PendingOrder, PositionKind, Price, Side, TrackedPosition, TriggerHit, TriggerLeg,
};

/// Stateless trigger evaluator.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerEvaluator;

impl TriggerEvaluator {
    /// Whether `mark` fills a pending limit order.
    pub fn fills(order: &PendingOrder, mark: Price) -> bool {
        order.category.fills_at(mark, order.entry_price)
    }

    /// Check a tracked position against `mark`.
    ///
    /// For SLTP positions the stop loss is checked first and wins when both
    /// levels are crossed on the same tick.
    pub fn check(position: &TrackedPosition, mark: Price) -> Option<TriggerHit> {
        let stop_loss = || {
            position
                .stop_loss
                .filter(|&sl| stop_loss_hit(position.side, mark, sl))
                .map(|price| TriggerHit {
                    kind: position.kind,
                    leg: TriggerLeg::StopLoss,
                    price,
                })
        };
        let take_profit = || {
            position
                .take_profit
                .filter(|&tp| take_profit_hit(position.side, mark, tp))
                .map(|price| TriggerHit {
                    kind: position.kind,
                    leg: TriggerLeg::TakeProfit,
                    price,
                })
        };

        match position.kind {
            PositionKind::Sl => stop_loss(),
            PositionKind::Tp => take_profit(),
            PositionKind::Sltp => stop_loss().or_else(take_profit),
        }
    }
}

fn stop_loss_hit(side: Side, mark: Price, level: Price) -> bool {
    match side {
        Side::Long => mark <= level,
        Side::Short => mark >= level,
    }
}

fn take_profit_hit(side: Side, mark: Price, level: Price) -> bool {
    match side {
        Side::Long => mark >= level,
        Side::Short => mark <= level,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordertrack_core::{derive_kind, OrderCategory, PositionKey, Size};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn position(side: Side, sl: Option<Decimal>, tp: Option<Decimal>) -> TrackedPosition {
        let stop_loss = sl.map(Price::new);
        let take_profit = tp.map(Price::new);
        TrackedPosition {
            key: PositionKey::new("BTCUSDT", "u1", "p1"),
            kind: derive_kind(stop_loss, take_profit).unwrap(),
            side,
            stop_loss,
            take_profit,
            entry_price: Some(Price::new(dec!(100))),
            quantity: Size::new(dec!(1)),
            leverage: None,
            margin_used: None,
            order_id: None,
        }
    }

    fn px(v: Decimal) -> Price {
        Price::new(v)
    }

    #[test]
    fn test_long_stop_loss_inclusive() {
        let pos = position(Side::Long, Some(dec!(100)), None);
        let hit = TriggerEvaluator::check(&pos, px(dec!(100))).unwrap();
        assert_eq!(hit.kind, PositionKind::Sl);
        assert_eq!(hit.leg, TriggerLeg::StopLoss);
        assert_eq!(hit.price, px(dec!(100)));
        assert!(TriggerEvaluator::check(&pos, px(dec!(99))).is_some());
        assert!(TriggerEvaluator::check(&pos, px(dec!(101))).is_none());
    }

    #[test]
    fn test_short_stop_loss_triggers_above() {
        let pos = position(Side::Short, Some(dec!(100)), None);
        assert!(TriggerEvaluator::check(&pos, px(dec!(100))).is_some());
        assert!(TriggerEvaluator::check(&pos, px(dec!(99.5))).is_none());
    }

    #[test]
    fn test_short_take_profit_triggers_below() {
        let pos = position(Side::Short, None, Some(dec!(90)));
        let hit = TriggerEvaluator::check(&pos, px(dec!(90))).unwrap();
        assert_eq!(hit.kind, PositionKind::Tp);
        assert_eq!(hit.leg, TriggerLeg::TakeProfit);
        assert!(TriggerEvaluator::check(&pos, px(dec!(85))).is_some());
        assert!(TriggerEvaluator::check(&pos, px(dec!(91))).is_none());
    }

    #[test]
    fn test_long_take_profit_triggers_above() {
        let pos = position(Side::Long, None, Some(dec!(110)));
        assert!(TriggerEvaluator::check(&pos, px(dec!(110))).is_some());
        assert!(TriggerEvaluator::check(&pos, px(dec!(109.99))).is_none());
    }

    #[test]
    fn test_sltp_stop_loss_wins() {
        let pos = position(Side::Long, Some(dec!(95)), Some(dec!(110)));
        let hit = TriggerEvaluator::check(&pos, px(dec!(94))).unwrap();
        assert_eq!(hit.kind, PositionKind::Sltp);
        assert_eq!(hit.leg, TriggerLeg::StopLoss);
        assert_eq!(hit.price, px(dec!(95)));

        let hit = TriggerEvaluator::check(&pos, px(dec!(111))).unwrap();
        assert_eq!(hit.leg, TriggerLeg::TakeProfit);

        assert!(TriggerEvaluator::check(&pos, px(dec!(100))).is_none());
    }

    #[test]
    fn test_sltp_both_crossed_prefers_stop_loss() {
        // Inverted levels make both conditions true at once.
        let pos = position(Side::Long, Some(dec!(110)), Some(dec!(95)));
        let hit = TriggerEvaluator::check(&pos, px(dec!(100))).unwrap();
        assert_eq!(hit.leg, TriggerLeg::StopLoss);
    }

    #[test]
    fn test_limit_fills() {
        let order = PendingOrder {
            key: PositionKey::new("ETHUSDT", "u1", "p2"),
            side: Side::Long,
            category: OrderCategory::LongLimit,
            entry_price: px(dec!(50)),
            quantity: Size::new(dec!(1)),
            stop_loss: None,
            take_profit: None,
            leverage: None,
            margin_used: None,
            order_id: None,
        };
        assert!(TriggerEvaluator::fills(&order, px(dec!(50))));
        assert!(!TriggerEvaluator::fills(&order, px(dec!(49))));

        let short = PendingOrder {
            category: OrderCategory::ShortLimit,
            ..order
        };
        assert!(TriggerEvaluator::fills(&short, px(dec!(49))));
        assert!(!TriggerEvaluator::fills(&short, px(dec!(51))));
    }
}
