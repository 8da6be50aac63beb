// Request logging middleware

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

/// Request logging middleware
///
/// Logs method, path, status and latency. Query strings are left out since
/// the callback carries the authorization code and state there.
pub async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
    let start = Instant::now();

    tracing::debug!("[{}] {} {}", request_id, method, path);

    let response = next.run(request).await;
    let status = response.status();
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

    if status.is_server_error() {
        tracing::warn!(
            "[{}] {} {} -> {} ({:.1}ms)",
            request_id,
            method,
            path,
            status.as_u16(),
            latency_ms
        );
    } else {
        tracing::info!(
            "[{}] {} {} -> {} ({:.1}ms)",
            request_id,
            method,
            path,
            status.as_u16(),
            latency_ms
        );
    }

    response
}
