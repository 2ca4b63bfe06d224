//! Subscription lifecycle plumbing for the order tracking engine.
//!
//! Registry interest changes become subscribe/unsubscribe tasks on a
//! [`TaskQueue`]; a [`QueueWorker`] drains the queue and drives the feed,
//! checking the store before letting any unsubscribe through.

pub mod coordinator;
pub mod error;
pub mod queue;
pub mod worker;

pub use coordinator::spawn_coordinator;
pub use error::{QueueError, QueueResult};
pub use queue::{DynQueue, InMemoryTaskQueue, QueueMessage, TaskQueue};
pub use worker::{QueueWorker, WorkerConfig};
