//! Serving stored media under an application route.
//!
//! [`MediaRoute`] recognizes request paths such as `/media/1010/a.jpg` or
//! the virtual form `~/media/1010/a.jpg`, and [`media_middleware`] answers
//! `GET`/`HEAD` for them from a [`BlobFileSystem`]. Everything else falls
//! through to the inner router.

use axum::body::Body;
use axum::extract::State;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::{header, HeaderValue, Method, Request, StatusCode};
use metrics::counter;
use std::sync::Arc;
use tracing::debug;

use crate::errors::{FsError, FsResult};
use crate::filesystem::BlobFileSystem;
use crate::metrics::MEDIA_BYTES_SENT_TOTAL;
use crate::storage::adapter::cache_control_header;
use crate::storage::backend::BlobProperties;

/// URL prefix under which a file system's blobs are served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRoute {
    prefix: String,
}

impl MediaRoute {
    /// Route `/{route}/`, under `app_virtual_path` when the application is
    /// not mounted at the root.
    pub fn new(route: &str, app_virtual_path: &str) -> FsResult<Self> {
        let route = route.replace('\\', "/");
        let route = route.trim_matches('/');
        if route.is_empty() {
            return Err(FsError::config("Media route prefix must not be empty"));
        }
        let app = app_virtual_path.trim_end_matches('/');
        Ok(Self {
            prefix: format!("{app}/{route}/"),
        })
    }

    /// The route for `fs`, using its configured route name.
    pub fn for_filesystem(fs: &BlobFileSystem) -> FsResult<Self> {
        let config = fs.config();
        Self::new(config.route_name(), config.app_virtual_path())
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The file path below the route, or `None` if `virtual_path` lies
    /// outside it. A leading `~` is accepted and ignored.
    pub fn strip<'a>(&self, virtual_path: &'a str) -> Option<&'a str> {
        let path = virtual_path.strip_prefix('~').unwrap_or(virtual_path);
        let head = path.get(..self.prefix.len())?;
        if head.eq_ignore_ascii_case(&self.prefix) {
            Some(&path[self.prefix.len()..])
        } else {
            None
        }
    }
}

/// State for one mounted media route.
#[derive(Clone)]
pub struct MediaService {
    route: Arc<MediaRoute>,
    fs: Arc<BlobFileSystem>,
}

impl MediaService {
    pub fn new(route: MediaRoute, fs: Arc<BlobFileSystem>) -> Self {
        Self {
            route: Arc::new(route),
            fs,
        }
    }

    pub fn route(&self) -> &MediaRoute {
        &self.route
    }

    async fn serve(&self, method: &Method, file: &str) -> FsResult<Response> {
        let not_found = || FsError::NotFound {
            path: file.to_string(),
        };
        let body = if method == Method::HEAD {
            None
        } else {
            let data = self.fs.open_file(file).await?.ok_or_else(not_found)?;
            counter!(MEDIA_BYTES_SENT_TOTAL).increment(data.len() as u64);
            Some(data)
        };
        let properties = self.fs.get_properties(file).await?.ok_or_else(not_found)?;
        Ok(self.file_response(&properties, body))
    }

    /// Response headers come from the stored blob properties, with the
    /// configured cache lifetime for blobs stored without one.
    fn file_response(&self, properties: &BlobProperties, body: Option<Bytes>) -> Response {
        let head = body.is_none();
        let body = Body::from(body.unwrap_or_default());
        let mut response = (StatusCode::OK, body).into_response();
        let headers = response.headers_mut();

        let content_type = properties
            .content_type
            .as_deref()
            .unwrap_or("application/octet-stream");
        if let Ok(v) = HeaderValue::from_str(content_type) {
            headers.insert(header::CONTENT_TYPE, v);
        }
        let cache_control = properties
            .cache_control
            .clone()
            .unwrap_or_else(|| cache_control_header(self.fs.config().cache_control_seconds()));
        if let Ok(v) = HeaderValue::from_str(&cache_control) {
            headers.insert(header::CACHE_CONTROL, v);
        }
        let modified = httpdate::fmt_http_date(properties.last_modified.into());
        if let Ok(v) = HeaderValue::from_str(&modified) {
            headers.insert(header::LAST_MODIFIED, v);
        }
        if head {
            headers.insert(
                header::CONTENT_LENGTH,
                HeaderValue::from(properties.content_length),
            );
        }
        response
    }
}

/// Answer `GET`/`HEAD` under the media route from blob storage.
pub async fn media_middleware(
    State(media): State<MediaService>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let method = req.method().clone();
    if method != Method::GET && method != Method::HEAD {
        return next.run(req).await;
    }

    let path = percent_encoding::percent_decode_str(req.uri().path())
        .decode_utf8_lossy()
        .into_owned();
    let file = match media.route.strip(&path) {
        Some(file) if !file.is_empty() => file,
        _ => return next.run(req).await,
    };

    debug!("Media request: {} {}", method, file);
    match media.serve(&method, file).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FileSystemConfig;
    use crate::mime::MimeTypeResolver;
    use crate::storage::backend::{
        BlobHttpHeaders, BlobStore, ContainerAccess, ListItem, StoreFuture,
    };
    use crate::storage::memory::MemoryBlobStore;
    use axum::routing::get;
    use axum::Router;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    const ROOT_URL: &str = "http://127.0.0.1:10000/devstoreaccount1/";

    fn filesystem(store: Arc<dyn BlobStore>) -> BlobFileSystem {
        let config =
            FileSystemConfig::new("media", ROOT_URL, "UseDevelopmentStorage=true").unwrap();
        BlobFileSystem::new(config, store)
    }

    fn router(fs: BlobFileSystem) -> Router {
        let fs = Arc::new(fs);
        let media = MediaService::new(MediaRoute::for_filesystem(&fs).unwrap(), fs);
        Router::new()
            .fallback(get(|| async { (StatusCode::IM_A_TEAPOT, "inner") }))
            .layer(axum::middleware::from_fn_with_state(media, media_middleware))
    }

    async fn app() -> Router {
        let fs = filesystem(Arc::new(MemoryBlobStore::new()));
        fs.add_file("1010/media.jpg", Bytes::from_static(b"jpeg"), true)
            .await
            .unwrap();
        fs.add_file("1010/my file.txt", Bytes::from_static(b"text"), true)
            .await
            .unwrap();
        router(fs)
    }

    async fn call(app: Router, method: Method, uri: &str) -> Response {
        app.oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
    }

    /// Memory store that counts the calls made against it.
    struct CountingStore {
        inner: MemoryBlobStore,
        calls: AtomicUsize,
    }

    impl CountingStore {
        fn tick(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl BlobStore for CountingStore {
        fn ensure_container(&self, access: ContainerAccess) -> StoreFuture<'_, ()> {
            self.tick();
            self.inner.ensure_container(access)
        }
        fn exists(&self, key: &str) -> StoreFuture<'_, bool> {
            self.tick();
            self.inner.exists(key)
        }
        fn put(&self, key: &str, data: Bytes, headers: BlobHttpHeaders) -> StoreFuture<'_, ()> {
            self.tick();
            self.inner.put(key, data, headers)
        }
        fn get(&self, key: &str) -> StoreFuture<'_, Option<Bytes>> {
            self.tick();
            self.inner.get(key)
        }
        fn delete(&self, key: &str) -> StoreFuture<'_, ()> {
            self.tick();
            self.inner.delete(key)
        }
        fn get_properties(&self, key: &str) -> StoreFuture<'_, Option<BlobProperties>> {
            self.tick();
            self.inner.get_properties(key)
        }
        fn set_metadata(
            &self,
            key: &str,
            metadata: HashMap<String, String>,
        ) -> StoreFuture<'_, ()> {
            self.tick();
            self.inner.set_metadata(key, metadata)
        }
        fn list(&self, prefix: &str, delimiter: Option<&str>) -> StoreFuture<'_, Vec<ListItem>> {
            self.tick();
            self.inner.list(prefix, delimiter)
        }
    }

    #[test]
    fn test_prefix_forms() {
        assert_eq!(MediaRoute::new("media", "").unwrap().prefix(), "/media/");
        assert_eq!(MediaRoute::new("/media/", "").unwrap().prefix(), "/media/");
        assert_eq!(MediaRoute::new("\\media", "").unwrap().prefix(), "/media/");
        assert_eq!(
            MediaRoute::new("media", "/test").unwrap().prefix(),
            "/test/media/"
        );
        assert!(MediaRoute::new("/", "").is_err());
    }

    #[test]
    fn test_strip() {
        let route = MediaRoute::new("media", "").unwrap();
        assert_eq!(route.strip("~/media/1010/media.jpg"), Some("1010/media.jpg"));
        assert_eq!(route.strip("/MEDIA/1010/media.jpg"), Some("1010/media.jpg"));
        assert_eq!(route.strip("~/styles/main.css"), None);
        assert_eq!(route.strip("/media"), None);
        assert_eq!(route.strip("/mediafiles/a.jpg"), None);
    }

    #[test]
    fn test_strip_under_app_virtual_path() {
        let route = MediaRoute::new("media", "/test").unwrap();
        assert_eq!(route.strip("/test/media/1010/a.jpg"), Some("1010/a.jpg"));
        assert_eq!(route.strip("/media/1010/a.jpg"), None);
    }

    #[tokio::test]
    async fn test_get_serves_blob() {
        let response = call(app().await, Method::GET, "/media/1010/media.jpg").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "image/jpeg"
        );
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "public, max-age=31536000"
        );
        assert!(response.headers().contains_key(header::LAST_MODIFIED));
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"jpeg");
    }

    #[tokio::test]
    async fn test_virtual_path_and_escapes() {
        let response = call(app().await, Method::GET, "/media/1010/my%20file.txt").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain"
        );
    }

    #[tokio::test]
    async fn test_head_reports_length_without_body() {
        let response = call(app().await, Method::HEAD, "/media/1010/media.jpg").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(header::CONTENT_LENGTH).unwrap(), "4");
    }

    #[tokio::test]
    async fn test_head_makes_a_single_store_call() {
        let store = Arc::new(CountingStore {
            inner: MemoryBlobStore::new(),
            calls: AtomicUsize::new(0),
        });
        let fs = filesystem(store.clone());
        fs.add_file("1010/media.jpg", Bytes::from_static(b"jpeg"), true)
            .await
            .unwrap();
        let app = router(fs);

        store.calls.store(0, Ordering::SeqCst);
        let response = call(app.clone(), Method::HEAD, "/media/1010/media.jpg").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(header::CONTENT_LENGTH).unwrap(), "4");
        assert!(response.headers().contains_key(header::LAST_MODIFIED));
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);

        store.calls.store(0, Ordering::SeqCst);
        let response = call(app, Method::GET, "/media/1010/media.jpg").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_content_type_follows_custom_mime_resolver() {
        struct Fixed;
        impl MimeTypeResolver for Fixed {
            fn resolve(&self, _path: &str) -> Option<String> {
                Some("application/x-test".into())
            }
        }
        let fs = filesystem(Arc::new(MemoryBlobStore::new())).with_mime_resolver(Arc::new(Fixed));
        fs.add_file("1010/media.jpg", Bytes::from_static(b"jpeg"), true)
            .await
            .unwrap();
        let app = router(fs);

        for method in [Method::GET, Method::HEAD] {
            let response = call(app.clone(), method, "/media/1010/media.jpg").await;
            assert_eq!(
                response.headers().get(header::CONTENT_TYPE).unwrap(),
                "application/x-test"
            );
        }
    }

    #[tokio::test]
    async fn test_headers_of_blob_stored_without_them() {
        let store = Arc::new(MemoryBlobStore::new());
        store
            .put("1010/raw", Bytes::from_static(b"raw"), BlobHttpHeaders::default())
            .await
            .unwrap();
        let fs = filesystem(store);
        let response = call(router(fs), Method::GET, "/media/1010/raw").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/octet-stream"
        );
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "public, max-age=31536000"
        );
    }

    #[tokio::test]
    async fn test_missing_blob_is_not_found() {
        let response = call(app().await, Method::GET, "/media/1010/none.jpg").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = call(app().await, Method::HEAD, "/media/1010/none.jpg").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_other_requests_fall_through() {
        let response = call(app().await, Method::GET, "/styles/main.css").await;
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        let response = call(app().await, Method::GET, "/media/").await;
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        let response = call(app().await, Method::POST, "/media/1010/media.jpg").await;
        assert_ne!(response.status(), StatusCode::OK);
    }
}
