//! Prometheus metrics for the Tack server.

use anyhow::{Context, Result};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tack_core::SweepReport;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "tack_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "tack_connections_active";
    pub const FRAMES_TOTAL: &str = "tack_frames_total";
    pub const FRAMES_BYTES: &str = "tack_frames_bytes";
    pub const BROADCASTS_TOTAL: &str = "tack_broadcasts_total";
    pub const ROOMS_ACTIVE: &str = "tack_rooms_active";
    pub const JOINS_TOTAL: &str = "tack_joins_total";
    pub const NOTIFICATIONS_TOTAL: &str = "tack_notifications_total";
    pub const REMINDER_SWEEPS_TOTAL: &str = "tack_reminder_sweeps_total";
    pub const FRAME_LATENCY_SECONDS: &str = "tack_frame_latency_seconds";
    pub const ERRORS_TOTAL: &str = "tack_errors_total";
}

pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Authenticated channels since server start"
    );
    metrics::describe_gauge!(names::CONNECTIONS_ACTIVE, "Currently open channels");
    metrics::describe_counter!(names::FRAMES_TOTAL, "Frames sent and received");
    metrics::describe_counter!(names::FRAMES_BYTES, "Bytes of frames sent");
    metrics::describe_counter!(
        names::BROADCASTS_TOTAL,
        "Client-originated events queued to a room"
    );
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Boards with at least one open channel");
    metrics::describe_counter!(names::JOINS_TOTAL, "Successful room joins");
    metrics::describe_counter!(
        names::NOTIFICATIONS_TOTAL,
        "Reminder notifications by outcome"
    );
    metrics::describe_counter!(names::REMINDER_SWEEPS_TOTAL, "Completed due-reminder sweeps");
    metrics::describe_histogram!(
        names::FRAME_LATENCY_SECONDS,
        "Inbound frame handling latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Errors by type");

    info!("Metrics initialized");
}

/// Install the Prometheus exporter on its own listener.
///
/// # Errors
///
/// Returns an error if the address is invalid or the exporter cannot bind.
pub fn start_metrics_server(host: &str, port: u16) -> Result<()> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("Invalid metrics address {host}:{port}"))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

pub fn record_frame(direction: &'static str) {
    counter!(names::FRAMES_TOTAL, "direction" => direction).increment(1);
}

/// Inbound sizes are not visible once frames are reassembled.
pub fn record_outbound_bytes(bytes: usize) {
    counter!(names::FRAMES_BYTES).increment(bytes as u64);
}

pub fn record_latency(seconds: f64) {
    histogram!(names::FRAME_LATENCY_SECONDS).record(seconds);
}

pub fn record_broadcast(event: &'static str) {
    counter!(names::BROADCASTS_TOTAL, "event" => event).increment(1);
}

pub fn record_join() {
    counter!(names::JOINS_TOTAL).increment(1);
}

pub fn set_active_rooms(count: usize) {
    gauge!(names::ROOMS_ACTIVE).set(count as f64);
}

pub fn record_sweep(report: &SweepReport) {
    counter!(names::REMINDER_SWEEPS_TOTAL).increment(1);
    counter!(names::NOTIFICATIONS_TOTAL, "outcome" => "created").increment(report.created as u64);
    counter!(names::NOTIFICATIONS_TOTAL, "outcome" => "skipped").increment(report.skipped as u64);
    counter!(names::NOTIFICATIONS_TOTAL, "outcome" => "failed").increment(report.failed as u64);
}

pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Counts a channel as active for as long as it lives.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    #[must_use]
    pub fn new() -> Self {
        counter!(names::CONNECTIONS_TOTAL).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
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
        gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
    }
}
