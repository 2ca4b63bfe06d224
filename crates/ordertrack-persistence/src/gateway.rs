//! The durable store seam.

use crate::error::PersistenceResult;
use chrono::{DateTime, Utc};
use ordertrack_core::{
    BoxFuture, CloseOutcome, OrderRecord, OrderStatus, PositionClose, Price, StoredPosition,
    WalletLedgerEntry,
};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Store operations used by the engine.
///
/// Wallet balances are shared with the rest of the platform, so they are
/// only ever changed through [`increment_balance`](Self::increment_balance),
/// never read and written back.
pub trait PersistenceGateway: Send + Sync {
    /// Every stored position with status OPEN or PENDING.
    fn load_active_positions(&self) -> BoxFuture<'_, PersistenceResult<Vec<StoredPosition>>>;

    fn fetch_position<'a>(
        &'a self,
        pos_id: &'a str,
    ) -> BoxFuture<'a, PersistenceResult<Option<StoredPosition>>>;

    /// Whether any user holds an OPEN position on `symbol`.
    fn has_active_position<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, PersistenceResult<bool>>;

    /// Flip a PENDING position to OPEN at its fill price.
    ///
    /// Returns `false` (writing nothing) when the position is no longer
    /// PENDING.
    fn mark_position_open<'a>(
        &'a self,
        pos_id: &'a str,
        entry_price: Price,
    ) -> BoxFuture<'a, PersistenceResult<bool>>;

    fn mark_order_status<'a>(
        &'a self,
        order_id: &'a str,
        status: OrderStatus,
        price: Price,
    ) -> BoxFuture<'a, PersistenceResult<()>>;

    /// Conditionally close a position.
    ///
    /// Writes only while the stored status is OPEN or PENDING; otherwise
    /// returns [`CloseOutcome::AlreadyClosed`] and leaves the record as is.
    fn close_position<'a>(
        &'a self,
        pos_id: &'a str,
        close: PositionClose,
    ) -> BoxFuture<'a, PersistenceResult<CloseOutcome>>;

    /// Stamp the originating order FILLED with the realized PnL.
    fn mark_order_filled<'a>(
        &'a self,
        order_id: &'a str,
        pnl: Decimal,
        updated_at: DateTime<Utc>,
    ) -> BoxFuture<'a, PersistenceResult<()>>;

    fn put_order(&self, order: OrderRecord) -> BoxFuture<'_, PersistenceResult<()>>;

    /// Atomically add `amount` to the user's available balance, initializing
    /// a missing wallet at zero. Returns the balance after the increment.
    fn increment_balance<'a>(
        &'a self,
        user_id: &'a str,
        amount: Decimal,
    ) -> BoxFuture<'a, PersistenceResult<Decimal>>;

    fn put_ledger_entry(&self, entry: WalletLedgerEntry) -> BoxFuture<'_, PersistenceResult<()>>;
}

/// Arc wrapper for gateway trait objects.
pub type DynGateway = Arc<dyn PersistenceGateway>;
