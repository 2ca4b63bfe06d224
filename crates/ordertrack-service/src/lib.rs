//! Position trigger and settlement service.
//!
//! Wires the engine together:
//! - Startup recovery of active positions from the store
//! - Price feed connection and tick dispatch
//! - Subscription task queue and its worker
//! - Control interface for position adds, updates and removals

pub mod app;
pub mod config;
pub mod control;
pub mod error;

pub use app::{recover_positions, Application, RunningApp};
pub use config::AppConfig;
pub use control::{ControlService, UpdateOutcome, UpsertRequest};
pub use error::{AppError, AppResult};
