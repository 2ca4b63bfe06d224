//! Heartbeat management for the feed connection.
//!
//! A WebSocket ping frame goes out every `interval_ms`; if its pong does not
//! come back within `timeout_ms` the connection is considered dead.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct HeartbeatState {
    last_ping: Option<DateTime<Utc>>,
    last_pong: Option<DateTime<Utc>>,
    last_message: DateTime<Utc>,
    waiting_for_pong: bool,
}

impl HeartbeatState {
    fn fresh() -> Self {
        Self {
            last_ping: None,
            last_pong: None,
            last_message: Utc::now(),
            waiting_for_pong: false,
        }
    }
}

pub struct HeartbeatManager {
    interval_ms: u64,
    timeout_ms: u64,
    state: RwLock<HeartbeatState>,
}

impl HeartbeatManager {
    pub fn new(interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            interval_ms,
            timeout_ms,
            state: RwLock::new(HeartbeatState::fresh()),
        }
    }

    /// Reset heartbeat state (called on connection).
    pub fn reset(&self) {
        *self.state.write() = HeartbeatState::fresh();
    }

    pub fn record_ping(&self) {
        let now = Utc::now();
        let mut state = self.state.write();
        state.last_ping = Some(now);
        state.waiting_for_pong = true;
    }

    pub fn record_pong(&self) {
        let now = Utc::now();
        let mut state = self.state.write();
        state.last_pong = Some(now);
        state.waiting_for_pong = false;

        if let Some(ping_time) = state.last_ping {
            let rtt_ms = (now - ping_time).num_milliseconds();
            debug!(rtt_ms, "Received pong");
        }
    }

    /// Record that any message was received.
    pub fn record_message(&self) {
        self.state.write().last_message = Utc::now();
    }

    /// An outstanding ping has gone unanswered for longer than the timeout.
    pub fn is_timed_out(&self) -> bool {
        let state = self.state.read();
        match (state.waiting_for_pong, state.last_ping) {
            (true, Some(ping_time)) => {
                (Utc::now() - ping_time).num_milliseconds() > self.timeout_ms as i64
            }
            _ => false,
        }
    }

    /// A ping is due: none outstanding and the interval has elapsed since
    /// the previous one (or since connect).
    pub fn should_send_ping(&self) -> bool {
        let state = self.state.read();
        if state.waiting_for_pong {
            return false;
        }
        let since = state.last_ping.unwrap_or(state.last_message);
        (Utc::now() - since).num_milliseconds() >= self.interval_ms as i64
    }

    pub fn time_since_last_message_ms(&self) -> i64 {
        (Utc::now() - self.state.read().last_message).num_milliseconds()
    }

    /// Wait for the next heartbeat check.
    pub async fn wait_for_check(&self) {
        let period = self.interval_ms.min(self.timeout_ms).max(2) / 2;
        tokio::time::sleep(Duration::from_millis(period)).await;
    }
}
