//! In-process store implementation.
//!
//! Backs the service when no external store is wired in and doubles as the
//! test double for every crate above this one. Individual operations can be
//! made to fail with [`MemoryGateway::fail_on`] or slowed down with
//! [`MemoryGateway::delay_on`].

use crate::error::{PersistenceError, PersistenceResult};
use crate::gateway::PersistenceGateway;
use crate::writer::AuditWriter;
use chrono::{DateTime, Utc};
use ordertrack_core::{
    BoxFuture, CloseOutcome, OrderRecord, OrderStatus, PositionClose, PositionStatus, Price,
    Size, StoredPosition, WalletLedgerEntry,
};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Default)]
struct Store {
    positions: HashMap<String, StoredPosition>,
    /// Append-only; auto-close ids are only millisecond-unique.
    orders: Vec<OrderRecord>,
    wallets: HashMap<String, Decimal>,
    ledger: Vec<WalletLedgerEntry>,
}

#[derive(Default)]
pub struct MemoryGateway {
    store: RwLock<Store>,
    audit: Option<Mutex<AuditWriter>>,
    failing: Mutex<HashSet<&'static str>>,
    delays: Mutex<HashMap<&'static str, Duration>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load positions from a JSON array of stored position records.
    pub fn from_seed_file(path: impl AsRef<Path>) -> PersistenceResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let positions: Vec<StoredPosition> = serde_json::from_str(&content)?;
        info!(
            path = %path.display(),
            positions = positions.len(),
            "Loaded seed positions"
        );

        let gateway = Self::new();
        for position in positions {
            gateway.insert_position(position);
        }
        Ok(gateway)
    }

    /// Mirror order and ledger writes to an audit trail.
    pub fn with_audit(mut self, audit: AuditWriter) -> Self {
        self.audit = Some(Mutex::new(audit));
        self
    }

    pub fn insert_position(&self, position: StoredPosition) {
        self.store
            .write()
            .positions
            .insert(position.position_id.clone(), position);
    }

    pub fn insert_order(&self, order: OrderRecord) {
        self.store.write().orders.push(order);
    }

    pub fn position(&self, pos_id: &str) -> Option<StoredPosition> {
        self.store.read().positions.get(pos_id).cloned()
    }

    pub fn orders(&self) -> Vec<OrderRecord> {
        self.store.read().orders.clone()
    }

    pub fn order(&self, order_id: &str) -> Option<OrderRecord> {
        self.store
            .read()
            .orders
            .iter()
            .find(|o| o.order_id == order_id)
            .cloned()
    }

    pub fn ledger(&self) -> Vec<WalletLedgerEntry> {
        self.store.read().ledger.clone()
    }

    pub fn balance(&self, user_id: &str) -> Option<Decimal> {
        self.store.read().wallets.get(user_id).copied()
    }

    /// Make every subsequent call of `op` fail with
    /// [`PersistenceError::Unavailable`].
    pub fn fail_on(&self, op: &'static str) {
        self.failing.lock().insert(op);
    }

    pub fn recover(&self, op: &'static str) {
        self.failing.lock().remove(op);
    }

    /// Sleep for `delay` at the start of every subsequent call of `op`.
    pub fn delay_on(&self, op: &'static str, delay: Duration) {
        self.delays.lock().insert(op, delay);
    }

    async fn check(&self, op: &'static str) -> PersistenceResult<()> {
        let delay = self.delays.lock().get(op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().contains(op) {
            return Err(PersistenceError::Unavailable { op });
        }
        Ok(())
    }

    fn audit_order(&self, order: &OrderRecord) {
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.lock().record_order(order) {
                warn!(?e, order_id = %order.order_id, "Failed to append order audit record");
            }
        }
    }

    fn audit_ledger(&self, entry: &WalletLedgerEntry) {
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.lock().record_ledger(entry) {
                warn!(?e, tracker_id = %entry.tracker_id, "Failed to append ledger audit record");
            }
        }
    }

    fn update_order(
        &self,
        order_id: &str,
        apply: impl FnOnce(&mut OrderRecord),
    ) -> PersistenceResult<()> {
        let mut store = self.store.write();
        let order = store
            .orders
            .iter_mut()
            .find(|o| o.order_id == order_id)
            .ok_or_else(|| PersistenceError::OrderNotFound(order_id.to_string()))?;
        apply(order);
        Ok(())
    }
}

impl PersistenceGateway for MemoryGateway {
    fn load_active_positions(&self) -> BoxFuture<'_, PersistenceResult<Vec<StoredPosition>>> {
        Box::pin(async move {
            self.check("load_active_positions").await?;
            let store = self.store.read();
            let mut active: Vec<_> = store
                .positions
                .values()
                .filter(|p| p.status.is_active())
                .cloned()
                .collect();
            active.sort_by(|a, b| a.position_id.cmp(&b.position_id));
            Ok(active)
        })
    }

    fn fetch_position<'a>(
        &'a self,
        pos_id: &'a str,
    ) -> BoxFuture<'a, PersistenceResult<Option<StoredPosition>>> {
        Box::pin(async move {
            self.check("fetch_position").await?;
            Ok(self.position(pos_id))
        })
    }

    fn has_active_position<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, PersistenceResult<bool>> {
        Box::pin(async move {
            self.check("has_active_position").await?;
            Ok(self
                .store
                .read()
                .positions
                .values()
                .any(|p| p.asset_symbol == symbol && p.status == PositionStatus::Open))
        })
    }

    fn mark_position_open<'a>(
        &'a self,
        pos_id: &'a str,
        entry_price: Price,
    ) -> BoxFuture<'a, PersistenceResult<bool>> {
        Box::pin(async move {
            self.check("mark_position_open").await?;
            let mut store = self.store.write();
            let position = store
                .positions
                .get_mut(pos_id)
                .ok_or_else(|| PersistenceError::PositionNotFound(pos_id.to_string()))?;
            if position.status != PositionStatus::Pending {
                return Ok(false);
            }
            position.status = PositionStatus::Open;
            position.entry_price = Some(entry_price);
            Ok(true)
        })
    }

    fn mark_order_status<'a>(
        &'a self,
        order_id: &'a str,
        status: OrderStatus,
        price: Price,
    ) -> BoxFuture<'a, PersistenceResult<()>> {
        Box::pin(async move {
            self.check("mark_order_status").await?;
            self.update_order(order_id, |order| {
                order.status = status;
                order.price = price;
                order.updated_at = Utc::now();
            })
        })
    }

    fn close_position<'a>(
        &'a self,
        pos_id: &'a str,
        close: PositionClose,
    ) -> BoxFuture<'a, PersistenceResult<CloseOutcome>> {
        Box::pin(async move {
            self.check("close_position").await?;
            let mut store = self.store.write();
            let position = store
                .positions
                .get_mut(pos_id)
                .ok_or_else(|| PersistenceError::PositionNotFound(pos_id.to_string()))?;
            if !position.status.is_active() {
                return Ok(CloseOutcome::AlreadyClosed(position.status));
            }
            position.status = close.status;
            position.exit_price = Some(close.exit_price);
            position.closed_at = Some(close.closed_at);
            position.realized_pnl = Some(close.realized_pnl);
            position.position_closed_type = Some(close.position_closed_type);
            position.close_key = Some(close.close_key);
            position.quantity = Some(Size::ZERO);
            position.lot = Some(Size::ZERO);
            position.contribution_amount = Some(Decimal::ZERO);
            Ok(CloseOutcome::Closed)
        })
    }

    fn mark_order_filled<'a>(
        &'a self,
        order_id: &'a str,
        pnl: Decimal,
        updated_at: DateTime<Utc>,
    ) -> BoxFuture<'a, PersistenceResult<()>> {
        Box::pin(async move {
            self.check("mark_order_filled").await?;
            self.update_order(order_id, |order| {
                order.status = OrderStatus::Filled;
                order.pnl = Some(pnl);
                order.updated_at = updated_at;
            })
        })
    }

    fn put_order(&self, order: OrderRecord) -> BoxFuture<'_, PersistenceResult<()>> {
        Box::pin(async move {
            self.check("put_order").await?;
            self.audit_order(&order);
            self.store.write().orders.push(order);
            Ok(())
        })
    }

    fn increment_balance<'a>(
        &'a self,
        user_id: &'a str,
        amount: Decimal,
    ) -> BoxFuture<'a, PersistenceResult<Decimal>> {
        Box::pin(async move {
            self.check("increment_balance").await?;
            let mut store = self.store.write();
            let balance = store
                .wallets
                .entry(user_id.to_string())
                .or_insert(Decimal::ZERO);
            *balance = balance
                .checked_add(amount)
                .ok_or_else(|| PersistenceError::BalanceOverflow(user_id.to_string()))?;
            Ok(*balance)
        })
    }

    fn put_ledger_entry(&self, entry: WalletLedgerEntry) -> BoxFuture<'_, PersistenceResult<()>> {
        Box::pin(async move {
            self.check("put_ledger_entry").await?;
            self.audit_ledger(&entry);
            self.store.write().ledger.push(entry);
            Ok(())
        })
    }
}
