//! # Request Metrics
//!
//! Counts requests and failed requests into the `metrics` recorder.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;

pub const HTTP_REQUESTS: &str = "pow_http_requests_total";
pub const HTTP_ERRORS: &str = "pow_http_errors_total";

/// Describe the HTTP metrics for the exporter.
pub fn register_metrics() {
    metrics::describe_counter!(HTTP_REQUESTS, "HTTP requests served, by method");
    metrics::describe_counter!(HTTP_ERRORS, "HTTP requests answered with a 4xx or 5xx status");
}

/// Middleware that increments request and error counters.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let response = next.run(request).await;

    metrics::counter!(HTTP_REQUESTS, "method" => method).increment(1);
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        metrics::counter!(HTTP_ERRORS, "status" => status.as_u16().to_string()).increment(1);
    }
    response
}
