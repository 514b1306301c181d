//! Prometheus metrics.
//!
//! One global recorder is installed on startup; the HTTP middleware and the
//! blob adapter record through the `metrics` macros, and `/metrics` renders
//! the exposition text.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::warn;

/// Counter of handled HTTP requests, by method, route and status.
pub const HTTP_REQUESTS_TOTAL: &str = "mediablob_http_requests_total";

/// Histogram of HTTP request latency, by method and route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "mediablob_http_request_duration_seconds";

/// Counter of blob store calls, by operation and status.
pub const BLOB_OPERATIONS_TOTAL: &str = "mediablob_blob_operations_total";

/// Counter of body bytes served from media routes.
pub const MEDIA_BYTES_SENT_TOTAL: &str = "mediablob_media_bytes_sent_total";

/// Gauge of file systems held by the registry.
pub const FILESYSTEMS_TOTAL: &str = "mediablob_filesystems_total";

/// Latency buckets in seconds.
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

static RECORDER: OnceLock<PrometheusHandle> = OnceLock::new();

fn builder() -> PrometheusBuilder {
    let matcher = Matcher::Full(HTTP_REQUEST_DURATION_SECONDS.to_string());
    match PrometheusBuilder::new().set_buckets_for_metric(matcher, LATENCY_BUCKETS) {
        Ok(builder) => builder,
        Err(e) => {
            warn!("Falling back to summary latencies: {}", e);
            PrometheusBuilder::new()
        }
    }
}

/// Install the global recorder once and return its handle.
///
/// When a different recorder already owns the process, a detached handle
/// is returned and `/metrics` renders nothing.
pub fn init_metrics() -> &'static PrometheusHandle {
    RECORDER.get_or_init(|| match builder().install_recorder() {
        Ok(handle) => handle,
        Err(e) => {
            warn!("Prometheus recorder not installed: {}", e);
            builder().build_recorder().handle()
        }
    })
}

/// Attach help text to every metric.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "HTTP requests handled");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "HTTP request latency"
    );
    describe_counter!(BLOB_OPERATIONS_TOTAL, "Blob store calls by operation");
    describe_counter!(
        MEDIA_BYTES_SENT_TOTAL,
        metrics::Unit::Bytes,
        "Bytes served from media routes"
    );
    describe_gauge!(FILESYSTEMS_TOTAL, "Provisioned virtual file systems");
}

/// Record request count and latency. `/metrics` itself is not recorded.
pub async fn metrics_middleware(req: Request<Body>, next: Next) -> Response {
    let route = route_label(req.uri().path());
    if route == "/metrics" {
        return next.run(req).await;
    }
    let method = req.method().as_str().to_owned();

    let started = Instant::now();
    let response = next.run(req).await;
    let elapsed = started.elapsed().as_secs_f64();

    counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.clone(),
        "route" => route,
        "status" => response.status().as_u16().to_string()
    )
    .increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "route" => route)
        .record(elapsed);

    response
}

/// Low-cardinality route label for a request path.
///
/// Fixed endpoints keep their path; anything else collapses to `/{route}`
/// or `/{route}/{key}` so blob keys never become label values.
fn route_label(path: &str) -> &'static str {
    match path.trim_end_matches('/') {
        "" => "/",
        "/health" => "/health",
        "/metrics" => "/metrics",
        other => {
            if other.trim_start_matches('/').contains('/') {
                "/{route}/{key}"
            } else {
                "/{route}"
            }
        }
    }
}

/// `GET /metrics`
pub async fn metrics_handler() -> impl IntoResponse {
    let body = RECORDER
        .get()
        .map(PrometheusHandle::render)
        .unwrap_or_default();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_label_fixed_endpoints() {
        assert_eq!(route_label("/"), "/");
        assert_eq!(route_label("//"), "/");
        assert_eq!(route_label("/health"), "/health");
        assert_eq!(route_label("/metrics"), "/metrics");
        assert_eq!(route_label("/metrics/"), "/metrics");
    }

    #[test]
    fn test_route_label_hides_keys() {
        assert_eq!(route_label("/media"), "/{route}");
        assert_eq!(route_label("/forms/"), "/{route}");
        assert_eq!(route_label("/media/1010/a.jpg"), "/{route}/{key}");
        assert_eq!(route_label("/test/media/1010/a.jpg"), "/{route}/{key}");
    }

    #[test]
    fn test_init_metrics_is_idempotent() {
        let first = init_metrics() as *const PrometheusHandle;
        let second = init_metrics() as *const PrometheusHandle;
        assert_eq!(first, second);
        describe_metrics();
    }

    #[test]
    fn test_counters_render_after_init() {
        let handle = init_metrics();
        counter!(BLOB_OPERATIONS_TOTAL, "operation" => "get", "status" => "ok").increment(1);
        // A detached handle renders nothing.
        let rendered = handle.render();
        if !rendered.is_empty() {
            assert!(rendered.contains(BLOB_OPERATIONS_TOTAL));
        }
    }
}
