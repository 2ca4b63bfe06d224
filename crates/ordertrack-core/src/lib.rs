//! Core domain types for the order tracking engine.
//!
//! This crate provides the types shared by every other crate:
//! - `Price`, `Size`: Precision-safe numeric types
//! - `PositionRecord`: a pending limit order or a tracked SL/TP position
//! - `StoredPosition`, `OrderRecord`, `WalletLedgerEntry`: persisted records
//! - `TriggerHit`, `TriggerEvent`: trigger outcomes and their notifications
//! - `SubscriptionTask`: feed subscription intents carried by the task queue

pub mod decimal;
pub mod error;
pub mod ledger;
pub mod order;
pub mod position;
pub mod store;
pub mod task;
pub mod trigger;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use ledger::{LedgerType, WalletLedgerEntry};
pub use order::{OrderMetadata, OrderOperation, OrderRecord, OrderStatus};
pub use position::{
    derive_kind, OrderCategory, PendingOrder, PositionDraft, PositionKey, PositionKind,
    PositionPatch, PositionRecord, PositionStatus, Side, TrackedPosition,
};
pub use store::{CloseOutcome, PositionClose, StoredPosition};
pub use task::SubscriptionTask;
pub use trigger::{EventType, TriggerEvent, TriggerHit, TriggerLeg};
