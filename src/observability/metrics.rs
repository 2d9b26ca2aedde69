//! Metrics collection and exposition.
//!
//! # Metrics
//! - `vserver_phase_duration_seconds` (histogram): startup phase latency by
//!   phase and outcome
//! - `vserver_listeners_opened_total` (counter): listeners opened, by namespace
//! - `vserver_listener_conflicts_total` (counter): rejected address claims
//! - `vserver_unused_sections_total` (counter): subsections no compiler claimed
//! - `vserver_virtual_servers` (gauge): servers running after startup

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Prometheus metrics exporter started"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to start metrics exporter"),
    }
}

pub fn record_phase(phase: &'static str, outcome: &'static str, elapsed: Duration) {
    histogram!("vserver_phase_duration_seconds", "phase" => phase, "outcome" => outcome)
        .record(elapsed.as_secs_f64());
}

pub fn record_listener_opened(namespace: &str) {
    counter!("vserver_listeners_opened_total", "namespace" => namespace.to_string()).increment(1);
}

pub fn record_conflict() {
    counter!("vserver_listener_conflicts_total").increment(1);
}

pub fn record_unused_section(namespace: &str) {
    counter!("vserver_unused_sections_total", "namespace" => namespace.to_string()).increment(1);
}

pub fn set_virtual_servers(count: usize) {
    gauge!("vserver_virtual_servers").set(count as f64);
}
