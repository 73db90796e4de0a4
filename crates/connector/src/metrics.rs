//! Prometheus metrics for the ingest pipeline
//!
//! Frame classification counts, sink failures, and connection status.

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, Encoder, IntCounter,
    IntCounterVec, IntGauge, TextEncoder,
};

const LABEL_CLASS: &str = "class";
const LABEL_SINK: &str = "sink";

/// Frames received, by classification outcome
static FRAMES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "pmi_frames_total",
        "Frames received from the live-data feed by classification",
        &[LABEL_CLASS]
    )
    .expect("Failed to register frames_total metric")
});

static SINK_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "pmi_sink_errors_total",
        "Trades a sink failed to accept",
        &[LABEL_SINK]
    )
    .expect("Failed to register sink_errors_total metric")
});

static DELIVERY_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "pmi_producer_delivery_failures_total",
        "Broker records that were never acknowledged"
    )
    .expect("Failed to register delivery_failures_total metric")
});

static FLUSH_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "pmi_writer_flush_failures_total",
        "Failed time-series flushes"
    )
    .expect("Failed to register flush_failures_total metric")
});

static ROWS_DROPPED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "pmi_writer_rows_dropped_total",
        "Buffered rows discarded after repeated flush failures"
    )
    .expect("Failed to register rows_dropped_total metric")
});

/// WebSocket connection status (1 = running, 0 = otherwise)
static WEBSOCKET_CONNECTED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "pmi_websocket_connected",
        "Live-data WebSocket connection status (1=running, 0=not running)"
    )
    .expect("Failed to register websocket_connected metric")
});

static PINGS_SENT_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("pmi_pings_sent_total", "Keepalive pings written to the socket")
        .expect("Failed to register pings_sent_total metric")
});

pub fn inc_frame(class: &str) {
    FRAMES_TOTAL.with_label_values(&[class]).inc();
}

pub fn inc_sink_error(sink: &str) {
    SINK_ERRORS_TOTAL.with_label_values(&[sink]).inc();
}

pub fn inc_delivery_failure() {
    DELIVERY_FAILURES_TOTAL.inc();
}

pub fn inc_flush_failure() {
    FLUSH_FAILURES_TOTAL.inc();
}

pub fn add_rows_dropped(count: usize) {
    ROWS_DROPPED_TOTAL.inc_by(count as u64);
}

pub fn set_connected(connected: bool) {
    WEBSOCKET_CONNECTED.set(i64::from(connected));
}

pub fn inc_ping_sent() {
    PINGS_SENT_TOTAL.inc();
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to encode metrics as UTF-8: {}", e))
    })
}
