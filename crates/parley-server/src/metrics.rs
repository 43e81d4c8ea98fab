//! Metrics collection and export for Parley.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "parley_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "parley_connections_active";
    pub const FRAMES_TOTAL: &str = "parley_frames_total";
    pub const FRAMES_BYTES: &str = "parley_frames_bytes";
    pub const REQUESTS_TOTAL: &str = "parley_requests_total";
    pub const REQUEST_LATENCY_SECONDS: &str = "parley_request_latency_seconds";
    pub const EVENTS_DELIVERED: &str = "parley_events_delivered_total";
    pub const EVENTS_LAGGED: &str = "parley_events_lagged_total";
    pub const ROOMS_ACTIVE: &str = "parley_rooms_active";
    pub const ERRORS_TOTAL: &str = "parley_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::FRAMES_TOTAL, "Total number of frames processed");
    metrics::describe_counter!(names::FRAMES_BYTES, "Total bytes of frames processed");
    metrics::describe_counter!(
        names::REQUESTS_TOTAL,
        "Message requests served, by operation and outcome"
    );
    metrics::describe_histogram!(
        names::REQUEST_LATENCY_SECONDS,
        "Message request latency in seconds"
    );
    metrics::describe_counter!(
        names::EVENTS_DELIVERED,
        "Lifecycle events written to sessions"
    );
    metrics::describe_counter!(
        names::EVENTS_LAGGED,
        "Lifecycle events skipped by sessions that fell behind"
    );
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of open chat rooms");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a frame crossing the socket.
pub fn record_frame(bytes: usize, direction: &'static str) {
    counter!(names::FRAMES_TOTAL, "direction" => direction).increment(1);
    counter!(names::FRAMES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record a served request.
pub fn record_request(op: &'static str, outcome: &'static str, seconds: f64) {
    counter!(names::REQUESTS_TOTAL, "op" => op, "outcome" => outcome).increment(1);
    histogram!(names::REQUEST_LATENCY_SECONDS, "op" => op).record(seconds);
}

/// Record an event written to a session.
pub fn record_event_delivered(event: &'static str) {
    counter!(names::EVENTS_DELIVERED, "event" => event).increment(1);
}

/// Record events a lagging session never saw.
pub fn record_events_lagged(skipped: u64) {
    counter!(names::EVENTS_LAGGED).increment(skipped);
}

/// Update the open room count.
pub fn set_active_rooms(count: usize) {
    gauge!(names::ROOMS_ACTIVE).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
