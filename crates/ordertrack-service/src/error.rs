//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] ordertrack_ws::WsError),

    #[error("Position error: {0}")]
    Position(#[from] ordertrack_position::PositionError),

    #[error("Queue error: {0}")]
    Queue(#[from] ordertrack_queue::QueueError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] ordertrack_telemetry::TelemetryError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] ordertrack_persistence::PersistenceError),

    #[error("Invalid position: {0}")]
    Invalid(#[from] ordertrack_core::CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
