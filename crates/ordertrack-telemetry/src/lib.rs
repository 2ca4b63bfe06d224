//! Prometheus metrics and structured logging for the order tracking engine.
//!
//! - Structured logging with tracing (JSON in production)
//! - Prometheus collectors for the feed, registry, triggers, settlement
//!   and subscription queue

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
