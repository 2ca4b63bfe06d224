//! Control interface over the position registry.
//!
//! The order entry layer calls these when a position is created, edited or
//! withdrawn. Transport is out of scope; callers hold a [`ControlService`].

use ordertrack_core::{
    PositionDraft, PositionKey, PositionKind, PositionPatch, PositionRecord, PositionStatus,
};
use ordertrack_position::{Monitoring, PositionResult, RegistryHandle};
use tracing::{debug, info};

/// Payload of an add-or-update call.
#[derive(Debug, Clone, Default)]
pub struct UpsertRequest {
    pub draft: PositionDraft,
    /// Monitoring kind claimed by the caller. Only its presence matters;
    /// the registry derives the real kind from the levels.
    pub kind: Option<PositionKind>,
}

impl UpsertRequest {
    /// Complete enough to register from scratch rather than patch.
    pub fn is_new_position(&self) -> bool {
        let d = &self.draft;
        let identified = !d.symbol.is_empty() && !d.user_id.is_empty() && !d.pos_id.is_empty();
        let monitorable = self.kind.is_some() || d.status == Some(PositionStatus::Pending);
        identified && d.quantity.is_some() && monitorable && d.entry_price.is_some()
    }

    /// Fields present in the draft, as a patch.
    fn to_patch(&self) -> PositionPatch {
        let d = &self.draft;
        PositionPatch {
            status: d.status,
            side: d.side,
            sl: d.sl.map(Some),
            tp: d.tp.map(Some),
            entry_price: d.entry_price,
            quantity: d.quantity,
            order_category: d.order_category,
            leverage: d.leverage,
            margin_used: d.margin_used,
            order_id: d.order_id.clone(),
        }
    }
}

/// Result of [`ControlService::update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated(Monitoring),
    /// Both levels were cleared; the position left monitoring.
    Removed(PositionRecord),
}

#[derive(Clone)]
pub struct ControlService {
    registry: RegistryHandle,
}

impl ControlService {
    pub fn new(registry: RegistryHandle) -> Self {
        Self { registry }
    }

    pub async fn add_or_update(&self, request: &UpsertRequest) -> PositionResult<Monitoring> {
        let key = request.draft.key();
        if request.is_new_position() {
            let monitoring = self.registry.add(&request.draft).await?;
            info!(key = %key, ?monitoring, "Position registered");
            Ok(monitoring)
        } else {
            debug!(key = %key, "Incomplete position payload, applying as update");
            self.registry.update(&key, &request.to_patch()).await
        }
    }

    /// Apply `patch`. Clearing both levels removes the position instead.
    pub async fn update(
        &self,
        key: &PositionKey,
        patch: &PositionPatch,
    ) -> PositionResult<UpdateOutcome> {
        if patch.clears_triggers() {
            info!(key = %key, "Stop loss and take profit cleared, force deleting");
            return self.force_delete(key).await.map(UpdateOutcome::Removed);
        }
        let monitoring = self.registry.update(key, patch).await?;
        debug!(key = %key, ?monitoring, "Position updated");
        Ok(UpdateOutcome::Updated(monitoring))
    }

    /// Remove from both maps, failing with `NotFound` if neither held it.
    pub async fn force_delete(&self, key: &PositionKey) -> PositionResult<PositionRecord> {
        let record = self.registry.force_delete(key).await?;
        info!(key = %key, "Position force deleted");
        Ok(record)
    }

    /// Remove if present. Returns whether anything was removed.
    pub async fn remove_position(&self, key: &PositionKey) -> PositionResult<bool> {
        let removed = self.registry.remove(key).await?;
        debug!(key = %key, removed, "Position removal");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordertrack_core::{Price, Side, Size, StoredPosition, SubscriptionTask};
    use ordertrack_persistence::MemoryGateway;
    use ordertrack_position::{spawn_registry, PositionError};
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn setup() -> (
        ControlService,
        RegistryHandle,
        mpsc::UnboundedReceiver<SubscriptionTask>,
        Arc<MemoryGateway>,
    ) {
        let gateway = Arc::new(MemoryGateway::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let (registry, _join) = spawn_registry(16, gateway.clone(), tx);
        (ControlService::new(registry.clone()), registry, rx, gateway)
    }

    fn request() -> UpsertRequest {
        UpsertRequest {
            draft: PositionDraft {
                symbol: "ETHUSDT".into(),
                user_id: "u1".into(),
                pos_id: "p1".into(),
                status: Some(PositionStatus::Open),
                side: Some(Side::Short),
                sl: Some(Price::new(dec!(2100))),
                entry_price: Some(Price::new(dec!(2000))),
                quantity: Some(Size::new(dec!(0.5))),
                ..Default::default()
            },
            kind: Some(PositionKind::Sl),
        }
    }

    fn key() -> PositionKey {
        PositionKey::new("ETHUSDT", "u1", "p1")
    }

    #[test]
    fn test_new_position_predicate() {
        assert!(request().is_new_position());

        let mut no_kind = request();
        no_kind.kind = None;
        assert!(!no_kind.is_new_position());

        no_kind.draft.status = Some(PositionStatus::Pending);
        assert!(no_kind.is_new_position());

        let mut no_quantity = request();
        no_quantity.draft.quantity = None;
        assert!(!no_quantity.is_new_position());

        let mut no_entry = request();
        no_entry.draft.entry_price = None;
        assert!(!no_entry.is_new_position());
    }

    #[tokio::test]
    async fn test_add_then_partial_update() {
        let (control, registry, _intents, _) = setup();
        assert_eq!(
            control.add_or_update(&request()).await.unwrap(),
            Monitoring::Tracked(PositionKind::Sl)
        );

        let partial = UpsertRequest {
            draft: PositionDraft {
                symbol: "ETHUSDT".into(),
                user_id: "u1".into(),
                pos_id: "p1".into(),
                tp: Some(Price::new(dec!(1800))),
                ..Default::default()
            },
            kind: None,
        };
        assert_eq!(
            control.add_or_update(&partial).await.unwrap(),
            Monitoring::Tracked(PositionKind::Sltp)
        );

        match registry.get(&key()).await.unwrap() {
            Some(PositionRecord::Tracked(t)) => {
                assert_eq!(t.stop_loss, Some(Price::new(dec!(2100))));
                assert_eq!(t.take_profit, Some(Price::new(dec!(1800))));
                assert_eq!(t.side, Side::Short);
            }
            other => panic!("expected tracked, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_clearing_both_levels_force_deletes() {
        let (control, registry, mut intents, _) = setup();
        control.add_or_update(&request()).await.unwrap();

        let patch = PositionPatch {
            sl: Some(None),
            tp: Some(None),
            ..Default::default()
        };
        let outcome = control.update(&key(), &patch).await.unwrap();
        assert!(matches!(outcome, UpdateOutcome::Removed(PositionRecord::Tracked(_))));
        assert!(!registry.has_interest("ETHUSDT"));

        let mut tasks = Vec::new();
        while let Ok(task) = intents.try_recv() {
            tasks.push(task);
        }
        assert_eq!(
            tasks,
            vec![
                SubscriptionTask::Subscribe { symbol: "ETHUSDT".into() },
                SubscriptionTask::Unsubscribe { symbol: "ETHUSDT".into() },
            ]
        );
    }

    #[tokio::test]
    async fn test_update_recovers_from_store() {
        let (control, registry, _intents, gateway) = setup();
        gateway.insert_position(StoredPosition {
            position_id: "p1".into(),
            user_id: "u1".into(),
            asset_symbol: "ETHUSDT".into(),
            status: PositionStatus::Open,
            position_type: Side::Long,
            order_category: None,
            order_type: None,
            order_id: None,
            entry_price: Some(Price::new(dec!(2000))),
            quantity: Some(Size::new(dec!(1))),
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
        });

        let patch = PositionPatch {
            tp: Some(Some(Price::new(dec!(2500)))),
            ..Default::default()
        };
        let outcome = control.update(&key(), &patch).await.unwrap();
        assert_eq!(outcome, UpdateOutcome::Updated(Monitoring::Tracked(PositionKind::Tp)));
        assert!(registry.has_interest("ETHUSDT"));
    }

    #[tokio::test]
    async fn test_force_delete_unknown_is_not_found() {
        let (control, _, _intents, _) = setup();
        assert!(matches!(
            control.force_delete(&key()).await,
            Err(PositionError::NotFound(_))
        ));
        assert!(!control.remove_position(&key()).await.unwrap());
    }
}
