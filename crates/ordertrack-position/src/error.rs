//! Position and settlement error types.

use ordertrack_core::{CoreError, PositionStatus};
use ordertrack_persistence::PersistenceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PositionError {
    #[error("Position not found: {0}")]
    NotFound(String),

    #[error("Invalid position: {0}")]
    Invalid(#[from] CoreError),

    #[error("Registry actor stopped")]
    RegistryClosed,

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

pub type PositionResult<T> = Result<T, PositionError>;

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("Invalid settlement input for {pos_id}: {field}")]
    InvalidInput { pos_id: String, field: &'static str },

    #[error("Position not found in store: {0}")]
    PositionNotFound(String),

    #[error("Position {pos_id} already {status}")]
    AlreadyClosed {
        pos_id: String,
        status: PositionStatus,
    },

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

pub type SettlementResult<T> = Result<T, SettlementError>;
