//! Prometheus metrics for the tranche monitor.

use crate::error::TelemetryResult;
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

/// Price stream state (0=disconnected, 1=connecting, 2=connected).
pub static STREAM_STATE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "tranche_stream_state",
        "Price stream state (0=disconnected, 1=connecting, 2=connected)"
    )
    .unwrap()
});

/// Connection attempts, including the first.
pub static STREAM_CONNECTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "tranche_stream_connects_total",
        "Total price stream connection attempts"
    )
    .unwrap()
});

/// Ticks received by outcome (dispatched/ignored/dropped).
pub static TICKS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tranche_ticks_total",
        "Price ticks received by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Transitions applied by kind.
pub static TRANSITIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tranche_transitions_total",
        "Stage transitions applied",
        &["kind"]
    )
    .unwrap()
});

/// Positions closed by reason.
pub static POSITIONS_CLOSED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tranche_positions_closed_total",
        "Positions closed by reason",
        &["reason"]
    )
    .unwrap()
});

pub static OPEN_POSITIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("tranche_open_positions", "Positions currently tracked").unwrap()
});

/// Exchange call failures by operation.
pub static EXCHANGE_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tranche_exchange_failures_total",
        "Failed exchange calls",
        &["op"]
    )
    .unwrap()
});

/// Exchange round-trip latency in milliseconds.
pub static EXCHANGE_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "tranche_exchange_latency_ms",
        "Exchange call latency in milliseconds",
        &["op"],
        vec![10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0]
    )
    .unwrap()
});

/// Trade store failures by operation.
pub static STORE_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tranche_store_failures_total",
        "Failed trade store calls",
        &["op"]
    )
    .unwrap()
});

/// Webhook signals by outcome.
pub static SIGNALS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tranche_signals_total",
        "Webhook signals by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Metrics helper.
pub struct Metrics;

impl Metrics {
    pub fn stream_state(value: i64) {
        STREAM_STATE.set(value);
    }

    pub fn stream_connect_attempt() {
        STREAM_CONNECTS_TOTAL.inc();
    }

    pub fn tick_dispatched() {
        TICKS_TOTAL.with_label_values(&["dispatched"]).inc();
    }

    pub fn tick_ignored() {
        TICKS_TOTAL.with_label_values(&["ignored"]).inc();
    }

    pub fn tick_dropped() {
        TICKS_TOTAL.with_label_values(&["dropped"]).inc();
    }

    pub fn transition_applied(kind: &str) {
        TRANSITIONS_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn position_closed(reason: &str) {
        POSITIONS_CLOSED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn open_positions(count: usize) {
        OPEN_POSITIONS.set(count as i64);
    }

    pub fn exchange_failure(op: &str) {
        EXCHANGE_FAILURES_TOTAL.with_label_values(&[op]).inc();
    }

    pub fn exchange_latency(op: &str, latency_ms: f64) {
        EXCHANGE_LATENCY_MS
            .with_label_values(&[op])
            .observe(latency_ms);
    }

    pub fn store_failure(op: &str) {
        STORE_FAILURES_TOTAL.with_label_values(&[op]).inc();
    }

    pub fn signal(outcome: &str) {
        SIGNALS_TOTAL.with_label_values(&[outcome]).inc();
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
