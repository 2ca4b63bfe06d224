//! Queue error types.

use ordertrack_core::CoreError;
use ordertrack_persistence::PersistenceError;
use ordertrack_ws::WsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Malformed task: {0}")]
    Decode(#[from] CoreError),

    #[error("Unknown receipt: {0}")]
    UnknownReceipt(String),

    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    #[error("Feed error: {0}")]
    Feed(#[from] WsError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

pub type QueueResult<T> = Result<T, QueueError>;
