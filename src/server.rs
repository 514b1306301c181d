//! Axum router construction.
//!
//! The [`app`] function wires the health check, the Prometheus endpoint and
//! one media route per file system, and returns a ready-to-serve
//! [`axum::Router`].

use axum::{
    extract::State,
    http::{HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use http::Method;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::errors::{generate_request_id, FsError};
use crate::media::media_middleware;
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::AppState;

/// Build the axum [`Router`] for `state`.
pub fn app(state: Arc<AppState>) -> Router {
    let observability = &state.config.observability;

    let mut router = Router::new();
    if observability.health_check {
        router = router.route("/health", get(health_check));
    }
    if observability.metrics {
        router = router.route("/metrics", get(metrics_handler));
    }
    let mut router: Router = router.fallback(not_found).with_state(state.clone());

    // Media routes answer before routing so any path under them is served.
    for media in &state.media {
        info!("Serving media route {}", media.route().prefix());
        router = router.layer(middleware::from_fn_with_state(
            media.clone(),
            media_middleware,
        ));
    }

    let router = router.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods([Method::GET, Method::HEAD]),
            )
            .layer(middleware::from_fn(common_headers_middleware)),
    );
    if observability.metrics {
        // Outermost, so it captures the full request lifecycle.
        router.layer(middleware::from_fn(metrics_middleware))
    } else {
        router
    }
}

// -- Common headers middleware -----------------------------------------------

/// Adds `x-request-id` (unless an error response set one), `Date` and
/// `Server` to every response.
async fn common_headers_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    if !headers.contains_key("x-request-id") {
        if let Ok(v) = HeaderValue::from_str(&generate_request_id()) {
            headers.insert("x-request-id", v);
        }
    }

    let date = httpdate::fmt_http_date(std::time::SystemTime::now());
    if let Ok(v) = HeaderValue::from_str(&date) {
        headers.insert("date", v);
    }
    headers.insert("server", HeaderValue::from_static("mediablob"));

    response
}

// -- Handlers ----------------------------------------------------------------

/// `GET /health` -- liveness check listing the mounted file systems and
/// how many the registry holds.
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let aliases: Vec<&str> = state
        .filesystems
        .iter()
        .map(|(alias, _)| alias.as_str())
        .collect();
    let body = serde_json::json!({
        "status": "ok",
        "filesystems": aliases,
        "provisioned": state.registry.len().await,
    });
    (
        StatusCode::OK,
        [("content-type", "application/json")],
        body.to_string(),
    )
}

async fn not_found(req: Request<axum::body::Body>) -> FsError {
    FsError::NotFound {
        path: req.uri().path().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::registry::{FileSystemRegistry, MemoryStoreFactory};
    use crate::storage::memory::MemoryBlobStore;
    use axum::body::Body;
    use bytes::Bytes;
    use tower::ServiceExt;

    const CONFIG: &str = r#"
observability:
  metrics: false
filesystems:
  media:
    container_name: media
    root_url: http://127.0.0.1:10000/devstoreaccount1/
    connection_string: UseDevelopmentStorage=true
"#;

    async fn state(yaml: &str) -> Arc<AppState> {
        let config = parse_config(yaml).unwrap();
        let factory = MemoryStoreFactory::with_store(Arc::new(MemoryBlobStore::new()));
        let registry = Arc::new(FileSystemRegistry::new(Arc::new(factory)));
        Arc::new(AppState::build(config, registry).await.unwrap())
    }

    async fn get(app: Router, uri: &str) -> Response {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = get(app(state(CONFIG).await), "/health").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("server").unwrap(), "mediablob");
        assert!(response.headers().contains_key("x-request-id"));
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["filesystems"][0], "media");
        assert_eq!(json["provisioned"], 1);
    }

    #[tokio::test]
    async fn test_media_route_is_served() {
        let state = state(CONFIG).await;
        state
            .filesystem("media")
            .unwrap()
            .add_file("1010/media.jpg", Bytes::from("jpeg"), true)
            .await
            .unwrap();

        let response = get(app(state), "/media/1010/media.jpg").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("content-type").unwrap(), "image/jpeg");
    }

    #[tokio::test]
    async fn test_unknown_path_is_json_not_found() {
        let response = get(app(state(CONFIG).await), "/styles/main.css").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );
    }

    #[tokio::test]
    async fn test_disabled_virtual_path_provider_mounts_no_media_route() {
        let yaml = format!("disable_virtual_path_provider: \"true\"\n{CONFIG}");
        let state = state(&yaml).await;
        assert!(state.media.is_empty());
        state
            .filesystem("media")
            .unwrap()
            .add_file("1010/media.jpg", Bytes::from("jpeg"), true)
            .await
            .unwrap();

        let response = get(app(state), "/media/1010/media.jpg").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cors_allows_any_origin() {
        let response = app(state(CONFIG).await)
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("origin", "https://cms.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .unwrap(),
            "*"
        );
    }

    #[tokio::test]
    async fn test_metrics_route_follows_config() {
        let response = get(app(state(CONFIG).await), "/metrics").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        crate::metrics::init_metrics();
        let yaml = CONFIG.replace("metrics: false", "metrics: true");
        let response = get(app(state(&yaml).await), "/metrics").await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
