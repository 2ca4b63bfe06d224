//! Persistence error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Position not found: {0}")]
    PositionNotFound(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Balance overflow for user {0}")]
    BalanceOverflow(String),

    #[error("Store unavailable during {op}")]
    Unavailable { op: &'static str },
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;
