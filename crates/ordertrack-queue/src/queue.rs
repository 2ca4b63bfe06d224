//! At-least-once task queue.
//!
//! A received message stays invisible for the visibility timeout and is
//! redelivered unless its receipt is deleted first.

use crate::error::{QueueError, QueueResult};
use ordertrack_core::BoxFuture;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};
use uuid::Uuid;

/// A received message. `receipt` is an opaque handle for this delivery;
/// a redelivery gets a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub receipt: String,
    pub body: String,
    /// Deliveries so far, including this one.
    pub receive_count: u32,
}

pub trait TaskQueue: Send + Sync {
    fn send(&self, body: String) -> BoxFuture<'_, QueueResult<()>>;

    /// Long-poll for up to `max_messages`, waiting at most `wait` for the
    /// first one. An empty batch means the wait elapsed.
    fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> BoxFuture<'_, QueueResult<Vec<QueueMessage>>>;

    fn delete<'a>(&'a self, receipt: &'a str) -> BoxFuture<'a, QueueResult<()>>;
}

/// Arc wrapper for queue trait objects.
pub type DynQueue = Arc<dyn TaskQueue>;

#[derive(Debug, Clone)]
struct Entry {
    id: u64,
    body: String,
    receive_count: u32,
}

#[derive(Debug, Default)]
struct State {
    ready: VecDeque<Entry>,
    in_flight: HashMap<String, (Entry, Instant)>,
    next_id: u64,
}

impl State {
    /// Return expired in-flight messages to the front of the queue, oldest
    /// first.
    fn requeue_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();
        if expired.is_empty() {
            return;
        }

        let mut entries: Vec<Entry> = expired
            .iter()
            .filter_map(|receipt| self.in_flight.remove(receipt).map(|(entry, _)| entry))
            .collect();
        entries.sort_by_key(|e| e.id);
        for entry in entries.into_iter().rev() {
            debug!(id = entry.id, "Visibility timeout expired, redelivering");
            self.ready.push_front(entry);
        }
    }
}

/// In-process [`TaskQueue`].
pub struct InMemoryTaskQueue {
    state: Mutex<State>,
    notify: Notify,
    visibility_timeout: Duration,
}

impl InMemoryTaskQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            visibility_timeout,
        }
    }

    /// Messages waiting for delivery.
    pub fn ready_len(&self) -> usize {
        self.state.lock().ready.len()
    }

    /// Messages received but not yet deleted.
    pub fn in_flight_len(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    fn try_take(&self, max_messages: usize) -> Vec<QueueMessage> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.requeue_expired(now);

        let mut batch = Vec::new();
        while batch.len() < max_messages.max(1) {
            let Some(mut entry) = state.ready.pop_front() else {
                break;
            };
            entry.receive_count += 1;
            let receipt = Uuid::new_v4().to_string();
            batch.push(QueueMessage {
                receipt: receipt.clone(),
                body: entry.body.clone(),
                receive_count: entry.receive_count,
            });
            state
                .in_flight
                .insert(receipt, (entry, now + self.visibility_timeout));
        }
        batch
    }

    async fn receive_batch(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> QueueResult<Vec<QueueMessage>> {
        let deadline = Instant::now() + wait;
        loop {
            let batch = self.try_take(max_messages);
            if !batch.is_empty() {
                trace!(count = batch.len(), "Received messages");
                return Ok(batch);
            }
            if Instant::now() >= deadline {
                return Ok(batch);
            }
            let _ = tokio::time::timeout_at(deadline, self.notify.notified()).await;
        }
    }
}

impl TaskQueue for InMemoryTaskQueue {
    fn send(&self, body: String) -> BoxFuture<'_, QueueResult<()>> {
        Box::pin(async move {
            {
                let mut state = self.state.lock();
                state.next_id += 1;
                let id = state.next_id;
                state.ready.push_back(Entry {
                    id,
                    body,
                    receive_count: 0,
                });
            }
            self.notify.notify_one();
            Ok(())
        })
    }

    fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> BoxFuture<'_, QueueResult<Vec<QueueMessage>>> {
        Box::pin(self.receive_batch(max_messages, wait))
    }

    fn delete<'a>(&'a self, receipt: &'a str) -> BoxFuture<'a, QueueResult<()>> {
        Box::pin(async move {
            self.state
                .lock()
                .in_flight
                .remove(receipt)
                .map(|_| ())
                .ok_or_else(|| QueueError::UnknownReceipt(receipt.to_string()))
        })
    }
}
