//! Prometheus metrics exposition
//!
//! - `gateway_requests_total` (counter): labels `status`, `method`
//! - `gateway_request_duration_seconds` (histogram): label `status`
//! - `gateway_logins_total` (counter): label `outcome`
//! - `gateway_oauth_callbacks_total` (counter): label `outcome`
//! - `gateway_token_refresh_total` (counter): label `outcome`
//! - `gateway_active_sessions` (gauge): maintained by the session registry

use std::time::Instant;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use tracing::Instrument;

/// Buckets from 5ms to 30s. Requests that refresh a token or complete a
/// callback include an outbound provider call bounded by `oauth.timeout_secs`.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("gateway_request_duration_seconds".to_string()),
        DURATION_BUCKETS,
    )
}

/// Install the global Prometheus recorder and return a handle for `/metrics`.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Record a completed request with status code and HTTP method labels.
pub fn record_request(status: u16, method: &str, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!("gateway_requests_total", "status" => status_str.clone(), "method" => method.to_string())
        .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "status" => status_str)
        .record(duration_secs);
}

/// `outcome`: success, invalid_credentials, validation
pub fn record_login(outcome: &'static str) {
    metrics::counter!("gateway_logins_total", "outcome" => outcome).increment(1);
}

/// `outcome`: success, state_mismatch, state_expired, replayed, missing_code,
/// denied, exchange_error, storage_error
pub fn record_callback(outcome: &'static str) {
    metrics::counter!("gateway_oauth_callbacks_total", "outcome" => outcome).increment(1);
}

/// `outcome`: success, rejected, transport_error, storage_error
pub fn record_refresh(outcome: &'static str) {
    metrics::counter!("gateway_token_refresh_total", "outcome" => outcome).increment(1);
}

/// Middleware: wraps each request in a span carrying a request id and records
/// its status and latency.
pub async fn track_requests(request: Request, next: Next) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let span = tracing::info_span!("request", %request_id, %method, %path);

    let start = Instant::now();
    let response = next.run(request).instrument(span.clone()).await;
    let status = response.status().as_u16();
    let elapsed = start.elapsed().as_secs_f64();

    span.in_scope(|| tracing::debug!(status, duration_secs = elapsed, "request completed"));
    record_request(status, &method, elapsed);
    response
}
