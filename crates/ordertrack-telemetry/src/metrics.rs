//! Prometheus metrics for the order tracking engine.
//!
//! Covers:
//! - Feed connection state and tick flow
//! - Registry sizes
//! - Trigger hits, limit fills and settlements
//! - Wallet mutations by cause
//! - Subscription queue tasks
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! (e.g. a duplicate metric name) is a fatal configuration error and should
//! crash at startup. These panics only occur during static initialization.

use crate::error::TelemetryResult;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, register_int_counter,
    register_int_gauge, CounterVec, Encoder, Gauge, HistogramVec, IntCounter, IntGauge,
    TextEncoder,
};

/// Feed connection state (1 = connected, 0 = disconnected).
pub static FEED_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "ordertrack_feed_connected",
        "Price feed connection state (1=connected)"
    )
    .unwrap()
});

/// Total feed reconnection attempts.
pub static FEED_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ordertrack_feed_reconnect_total",
        "Total price feed reconnection attempts",
        &["reason"]
    )
    .unwrap()
});

/// Symbols currently subscribed on the feed.
pub static FEED_SUBSCRIPTIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "ordertrack_feed_subscriptions",
        "Symbols in the active subscription set"
    )
    .unwrap()
});

pub static TICKS_RECEIVED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "ordertrack_ticks_received_total",
        "Mark price ticks parsed from the feed"
    )
    .unwrap()
});

/// Ticks dropped before evaluation.
/// Labels: reason (no_mark_price/no_interest/channel_full)
pub static TICKS_SKIPPED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ordertrack_ticks_skipped_total",
        "Ticks dropped before trigger evaluation",
        &["reason"]
    )
    .unwrap()
});

pub static TICKS_DISPATCHED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "ordertrack_ticks_dispatched_total",
        "Ticks evaluated against the registry"
    )
    .unwrap()
});

pub static REGISTRY_TRACKED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "ordertrack_registry_tracked",
        "Positions under SL/TP monitoring"
    )
    .unwrap()
});

pub static REGISTRY_PENDING: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "ordertrack_registry_pending",
        "Pending limit orders awaiting fill"
    )
    .unwrap()
});

/// Labels: kind (sl/tp/sltp), leg (stop_loss/take_profit)
pub static TRIGGER_HITS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ordertrack_trigger_hits_total",
        "Stop-loss and take-profit hits",
        &["kind", "leg"]
    )
    .unwrap()
});

/// Labels: trackable (true/false)
pub static LIMIT_FILLS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ordertrack_limit_fills_total",
        "Pending limit orders filled",
        &["trackable"]
    )
    .unwrap()
});

/// Labels: outcome (closed/already_closed/not_found/invalid_input)
pub static SETTLEMENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ordertrack_settlements_total",
        "Settlement attempts by outcome",
        &["outcome"]
    )
    .unwrap()
});

pub static SETTLEMENT_DURATION_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "ordertrack_settlement_duration_ms",
        "Time to run a full close sequence in milliseconds",
        &["kind"],
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0]
    )
    .unwrap()
});

/// Labels: cause (pnl/margin/fee)
pub static WALLET_MUTATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ordertrack_wallet_mutations_total",
        "Atomic wallet increments by cause",
        &["cause"]
    )
    .unwrap()
});

/// Failed persistence writes that were logged and skipped.
/// Labels: op
pub static PERSISTENCE_ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ordertrack_persistence_errors_total",
        "Persistence writes that failed and were skipped",
        &["op"]
    )
    .unwrap()
});

/// Labels: operation, outcome (ok/error)
pub static EVENTS_PUBLISHED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ordertrack_events_published_total",
        "Trigger events handed to the publisher",
        &["operation", "outcome"]
    )
    .unwrap()
});

/// Labels: type (subscribe/unsubscribe), outcome (applied/suppressed/error/invalid)
pub static QUEUE_TASKS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ordertrack_queue_tasks_total",
        "Subscription tasks processed by the queue worker",
        &["type", "outcome"]
    )
    .unwrap()
});

pub static UNSUBSCRIBE_SUPPRESSED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "ordertrack_unsubscribe_suppressed_total",
        "Unsubscribe tasks skipped because the store still has open positions"
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    pub fn feed_connected() {
        FEED_CONNECTED.set(1.0);
    }

    pub fn feed_disconnected() {
        FEED_CONNECTED.set(0.0);
    }

    pub fn feed_reconnect(reason: &str) {
        FEED_RECONNECT_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn feed_subscriptions(count: usize) {
        FEED_SUBSCRIPTIONS.set(count as i64);
    }

    pub fn tick_received() {
        TICKS_RECEIVED_TOTAL.inc();
    }

    pub fn tick_skipped(reason: &str) {
        TICKS_SKIPPED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn tick_dispatched() {
        TICKS_DISPATCHED_TOTAL.inc();
    }

    /// Set registry sizes after a mutation.
    pub fn registry_size(tracked: usize, pending: usize) {
        REGISTRY_TRACKED.set(tracked as i64);
        REGISTRY_PENDING.set(pending as i64);
    }

    pub fn trigger_hit(kind: &str, leg: &str) {
        TRIGGER_HITS_TOTAL.with_label_values(&[kind, leg]).inc();
    }

    pub fn limit_fill(trackable: bool) {
        let label = if trackable { "true" } else { "false" };
        LIMIT_FILLS_TOTAL.with_label_values(&[label]).inc();
    }

    pub fn settlement(outcome: &str) {
        SETTLEMENTS_TOTAL.with_label_values(&[outcome]).inc();
    }

    pub fn settlement_duration(kind: &str, duration_ms: f64) {
        SETTLEMENT_DURATION_MS
            .with_label_values(&[kind])
            .observe(duration_ms);
    }

    pub fn wallet_mutation(cause: &str) {
        WALLET_MUTATIONS_TOTAL.with_label_values(&[cause]).inc();
    }

    pub fn persistence_error(op: &str) {
        PERSISTENCE_ERRORS_TOTAL.with_label_values(&[op]).inc();
    }

    pub fn event_published(operation: &str, ok: bool) {
        let outcome = if ok { "ok" } else { "error" };
        EVENTS_PUBLISHED_TOTAL
            .with_label_values(&[operation, outcome])
            .inc();
    }

    pub fn queue_task(task_type: &str, outcome: &str) {
        QUEUE_TASKS_TOTAL
            .with_label_values(&[task_type, outcome])
            .inc();
    }

    pub fn unsubscribe_suppressed() {
        UNSUBSCRIBE_SUPPRESSED_TOTAL.inc();
    }

    /// Render the default registry in the Prometheus text format.
    pub fn encode_text() -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&prometheus::gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
