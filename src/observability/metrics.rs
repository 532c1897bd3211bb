//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, route
//! - `gateway_request_duration_seconds` (histogram): end-to-end latency
//! - `gateway_auth_failures_total` (counter): failures by strategy
//! - `gateway_security_denials_total` (counter): denials by dimension
//! - `gateway_rate_limited_total` (counter): rejections by scope
//! - `gateway_circuit_open_total` (counter): fast-fails by route
//! - `gateway_pipeline_reloads_total` (counter): hot reloads by result
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Label values are bounded (strategy tags, dimension names, route ids)

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, route: &str, start: Instant) {
    counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "route" => route.to_string()
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds", "route" => route.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_auth_failure(strategy: &'static str) {
    counter!("gateway_auth_failures_total", "strategy" => strategy).increment(1);
}

pub fn record_security_denial(dimension: &'static str) {
    counter!("gateway_security_denials_total", "dimension" => dimension).increment(1);
}

pub fn record_rate_limited(scope: &str) {
    counter!("gateway_rate_limited_total", "scope" => scope.to_string()).increment(1);
}

pub fn record_circuit_open(route: &str) {
    counter!("gateway_circuit_open_total", "route" => route.to_string()).increment(1);
}

pub fn record_pipeline_reload(result: &'static str) {
    counter!("gateway_pipeline_reloads_total", "result" => result).increment(1);
}
