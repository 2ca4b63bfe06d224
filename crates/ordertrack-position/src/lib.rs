//! Position monitoring for the order tracking engine.
//!
//! Holds the in-memory registry of monitored positions, decides fills and
//! stop-loss / take-profit hits on each mark price, and settles closed
//! positions into the store and the user's wallet.
//!
//! # Key Components
//!
//! - [`RegistryHandle`]: Handle to the registry actor owning tracked positions and pending orders
//! - [`TriggerEvaluator`]: Pure fill and trigger checks (stop loss wins ties)
//! - [`ActionExecutor`]: Runs fills and closes as independent tasks
//! - [`SettlementService`]: The close sequence: store close, orders, wallet and ledger
//! - [`EventPublisher`]: Seam for trigger event notifications

pub mod error;
pub mod evaluator;
pub mod executor;
pub mod publisher;
pub mod registry;
pub mod settlement;

pub use error::{PositionError, PositionResult, SettlementError, SettlementResult};
pub use evaluator::TriggerEvaluator;
pub use executor::ActionExecutor;
pub use publisher::{publish_logged, DynPublisher, EventPublisher, RecordingPublisher, TracingPublisher};
pub use registry::{
    spawn_registry, LimitFill, Monitoring, RegistryHandle, RegistryMsg, RegistryTask,
    SymbolSnapshot, TickOutcome, TriggerFired,
};
pub use settlement::{
    realized_pnl, SettlementConfig, SettlementContext, SettlementReport, SettlementService,
};
