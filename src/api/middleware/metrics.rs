//! HTTP Metrics Middleware
//!
//! Records Prometheus metrics for every HTTP request:
//! - Request count by method, endpoint, and status
//! - Request duration histogram
//! - In-flight request gauge

use axum::{
    body::Body,
    extract::MatchedPath,
    http::Request,
    middleware::Next,
    response::Response,
};

use crate::metrics::{self, Timer};

/// Middleware to record HTTP metrics for each request
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let timer = Timer::new();

    // Matched route template keeps label cardinality bounded
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    metrics::request_started();
    let response = next.run(request).await;
    metrics::request_finished();

    metrics::record_http_request(&method, &path, response.status().as_u16(), timer.elapsed_secs());

    response
}
