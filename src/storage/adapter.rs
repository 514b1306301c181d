//! File-level operations on top of a [`BlobStore`].
//!
//! The adapter adds what the raw store does not know about: the
//! already-exists guard, the `CreatedDate` metadata that survives
//! overwrites, cache headers, and per-operation logging and metrics.

use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

use super::backend::{BlobHttpHeaders, BlobProperties, BlobStore, ContainerAccess, ListItem};
use crate::errors::{FsError, FsResult};
use crate::metrics::BLOB_OPERATIONS_TOTAL;

/// Metadata field holding the first-upload time of a blob.
pub const CREATED_DATE_KEY: &str = "CreatedDate";

/// Delimiter used for hierarchy listings.
pub const DELIMITER: &str = "/";

/// `Cache-Control` value for a lifetime in seconds.
pub fn cache_control_header(seconds: u64) -> String {
    format!("public, max-age={seconds}")
}

/// Read the `CreatedDate` field (any key case) from blob metadata.
pub fn created_from_metadata(metadata: &HashMap<String, String>) -> Option<DateTime<Utc>> {
    let (_, raw) = metadata
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(CREATED_DATE_KEY))?;
    parse_timestamp(raw)
}

/// Parse a stored timestamp: RFC 3339, RFC 2822, or `M/d/yyyy h:mm:ss AM`.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%m/%d/%Y %I:%M:%S %p")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Blob operations for one container.
pub struct BlobAdapter {
    store: Arc<dyn BlobStore>,
    container: String,
}

impl BlobAdapter {
    pub fn new(store: Arc<dyn BlobStore>, container: &str) -> Self {
        Self {
            store,
            container: container.to_string(),
        }
    }

    /// Count the operation and log failures with the offending path.
    fn observe<T>(&self, operation: &'static str, key: &str, result: FsResult<T>) -> FsResult<T> {
        let status = if result.is_ok() { "ok" } else { "error" };
        counter!(BLOB_OPERATIONS_TOTAL, "operation" => operation, "status" => status)
            .increment(1);
        if let Err(e) = &result {
            error!(
                container = %self.container,
                path = key,
                "Blob {} failed: {}",
                operation,
                e
            );
        }
        result
    }

    /// Create the container if needed and apply its access level.
    pub async fn ensure_container(&self, access: ContainerAccess) -> FsResult<()> {
        let result = self.store.ensure_container(access).await;
        self.observe("ensure_container", "", result)
    }

    pub async fn exists(&self, key: &str) -> FsResult<bool> {
        let result = self.store.exists(key).await;
        self.observe("exists", key, result)
    }

    /// Upload `data` to `key` and return its creation time.
    ///
    /// Fails with [`FsError::AlreadyExists`] without writing when the key
    /// exists and `override_if_exists` is false.  On overwrite the stored
    /// creation time is kept; on first upload it is now.
    pub async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: Option<String>,
        cache_control_seconds: u64,
        override_if_exists: bool,
    ) -> FsResult<DateTime<Utc>> {
        let result = self
            .put_inner(key, data, content_type, cache_control_seconds, override_if_exists)
            .await;
        self.observe("put", key, result)
    }

    async fn put_inner(
        &self,
        key: &str,
        data: Bytes,
        content_type: Option<String>,
        cache_control_seconds: u64,
        override_if_exists: bool,
    ) -> FsResult<DateTime<Utc>> {
        let existing = self.store.get_properties(key).await?;
        if existing.is_some() && !override_if_exists {
            return Err(FsError::AlreadyExists {
                path: key.to_string(),
            });
        }
        let created = existing
            .as_ref()
            .and_then(|p| created_from_metadata(&p.metadata))
            .unwrap_or_else(Utc::now);

        debug!(
            "Uploading {} ({} bytes, content_type={:?})",
            key,
            data.len(),
            content_type
        );
        let headers = BlobHttpHeaders {
            content_type,
            cache_control: Some(cache_control_header(cache_control_seconds)),
        };
        self.store.put(key, data, headers).await?;

        let mut metadata = HashMap::new();
        metadata.insert(CREATED_DATE_KEY.to_string(), created.to_rfc3339());
        self.store.set_metadata(key, metadata).await?;

        Ok(created)
    }

    /// Blob content, or `None` if `key` does not exist.
    pub async fn get(&self, key: &str) -> FsResult<Option<Bytes>> {
        let result = self.store.get(key).await;
        self.observe("get", key, result)
    }

    /// Delete `key`; a missing key is not an error.
    pub async fn delete(&self, key: &str) -> FsResult<()> {
        let result = self.store.delete(key).await;
        self.observe("delete", key, result)
    }

    /// All stored properties, or `None` if `key` is missing.
    pub async fn properties(&self, key: &str) -> FsResult<Option<BlobProperties>> {
        let result = self.store.get_properties(key).await;
        self.observe("get_properties", key, result)
    }

    /// Stored creation time, or `None` when unknown.
    pub async fn get_created(&self, key: &str) -> FsResult<Option<DateTime<Utc>>> {
        let result = self.store.get_properties(key).await;
        let properties = self.observe("get_properties", key, result)?;
        Ok(properties.and_then(|p| created_from_metadata(&p.metadata)))
    }

    /// Store-managed last modification time, or `None` if `key` is missing.
    pub async fn get_last_modified(&self, key: &str) -> FsResult<Option<DateTime<Utc>>> {
        let result = self.store.get_properties(key).await;
        let properties = self.observe("get_properties", key, result)?;
        Ok(properties.map(|p| p.last_modified))
    }

    /// Content length, or `None` if `key` is missing.
    pub async fn get_size(&self, key: &str) -> FsResult<Option<u64>> {
        let result = self.store.get_properties(key).await;
        let properties = self.observe("get_properties", key, result)?;
        Ok(properties.map(|p| p.content_length))
    }

    /// One level of hierarchy under `prefix`.
    pub async fn list_by_prefix(&self, prefix: &str) -> FsResult<Vec<ListItem>> {
        let result = self.store.list(prefix, Some(DELIMITER)).await;
        self.observe("list", prefix, result)
    }

    /// Every blob key under `prefix`, at any depth.
    pub async fn list_all(&self, prefix: &str) -> FsResult<Vec<String>> {
        let result = self.store.list(prefix, None).await;
        let items = self.observe("list", prefix, result)?;
        Ok(items
            .into_iter()
            .filter_map(|item| match item {
                ListItem::Blob(name) => Some(name),
                ListItem::Prefix(_) => None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryBlobStore;

    fn adapter() -> (Arc<MemoryBlobStore>, BlobAdapter) {
        let store = Arc::new(MemoryBlobStore::new());
        let adapter = BlobAdapter::new(store.clone(), "media");
        (store, adapter)
    }

    #[tokio::test]
    async fn test_put_sets_headers_and_created_date() {
        let (store, adapter) = adapter();
        let created = adapter
            .put(
                "1010/a.jpg",
                Bytes::from("a"),
                Some("image/jpeg".into()),
                86_400,
                true,
            )
            .await
            .unwrap();

        let props = store.get_properties("1010/a.jpg").await.unwrap().unwrap();
        assert_eq!(props.content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(props.cache_control.as_deref(), Some("public, max-age=86400"));
        assert_eq!(created_from_metadata(&props.metadata), Some(created));
    }

    #[tokio::test]
    async fn test_put_without_content_type() {
        let (store, adapter) = adapter();
        adapter
            .put("blob.unknown", Bytes::from("x"), None, 60, true)
            .await
            .unwrap();
        let props = store.get_properties("blob.unknown").await.unwrap().unwrap();
        assert_eq!(props.content_type, None);
    }

    #[tokio::test]
    async fn test_overwrite_preserves_created_date() {
        let (_, adapter) = adapter();
        adapter
            .put("a.jpg", Bytes::from("a"), None, 60, true)
            .await
            .unwrap();
        let created = adapter.get_created("a.jpg").await.unwrap();
        let modified = adapter.get_last_modified("a.jpg").await.unwrap();
        assert!(created.is_some());

        adapter
            .put("a.jpg", Bytes::from("b"), None, 60, true)
            .await
            .unwrap();
        assert_eq!(adapter.get_created("a.jpg").await.unwrap(), created);
        assert!(adapter.get_last_modified("a.jpg").await.unwrap() > modified);
        assert_eq!(
            adapter.get("a.jpg").await.unwrap(),
            Some(Bytes::from("b"))
        );
    }

    #[tokio::test]
    async fn test_put_without_override_guards_existing() {
        let (_, adapter) = adapter();
        adapter
            .put("a.jpg", Bytes::from("a"), None, 60, false)
            .await
            .unwrap();
        let err = adapter
            .put("a.jpg", Bytes::from("b"), None, 60, false)
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::AlreadyExists { ref path } if path == "a.jpg"));
        assert_eq!(
            adapter.get("a.jpg").await.unwrap(),
            Some(Bytes::from("a"))
        );
    }

    #[tokio::test]
    async fn test_missing_blob_reads() {
        let (_, adapter) = adapter();
        assert_eq!(adapter.get("nope").await.unwrap(), None);
        assert_eq!(adapter.get_created("nope").await.unwrap(), None);
        assert_eq!(adapter.get_last_modified("nope").await.unwrap(), None);
        assert_eq!(adapter.get_size("nope").await.unwrap(), None);
        assert!(!adapter.exists("nope").await.unwrap());
        adapter.delete("nope").await.unwrap();
    }

    #[tokio::test]
    async fn test_created_unknown_without_metadata() {
        let (store, adapter) = adapter();
        store
            .put("raw.jpg", Bytes::from("r"), BlobHttpHeaders::default())
            .await
            .unwrap();
        assert_eq!(adapter.get_created("raw.jpg").await.unwrap(), None);
        assert_eq!(adapter.get_size("raw.jpg").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_store_errors_propagate() {
        let (store, adapter) = adapter();
        store.set_offline(true);
        let err = adapter
            .put("a.jpg", Bytes::from("a"), None, 60, true)
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::ConnectionFailure { .. }));
        assert!(adapter.list_by_prefix("").await.is_err());
    }

    #[tokio::test]
    async fn test_list_all_skips_prefixes() {
        let (_, adapter) = adapter();
        for key in ["1010/a.jpg", "1011/b/c.jpg", "top.png"] {
            adapter
                .put(key, Bytes::from("x"), None, 60, true)
                .await
                .unwrap();
        }
        assert_eq!(
            adapter.list_all("").await.unwrap(),
            vec!["1010/a.jpg", "1011/b/c.jpg", "top.png"]
        );
        assert_eq!(adapter.list_by_prefix("").await.unwrap().len(), 3);
    }

    #[test]
    fn test_created_date_parsing() {
        let mut metadata = HashMap::new();
        metadata.insert("createddate".to_string(), "2026-10-01T08:30:00+02:00".to_string());
        assert_eq!(
            created_from_metadata(&metadata),
            Some(DateTime::parse_from_rfc3339("2026-10-01T06:30:00Z").unwrap().with_timezone(&Utc))
        );

        metadata.insert("createddate".to_string(), "Thu, 01 Oct 2026 06:30:00 +0000".to_string());
        assert!(created_from_metadata(&metadata).is_some());

        metadata.insert("createddate".to_string(), "10/1/2026 6:30:00 AM".to_string());
        assert_eq!(
            created_from_metadata(&metadata),
            Some(DateTime::parse_from_rfc3339("2026-10-01T06:30:00Z").unwrap().with_timezone(&Utc))
        );

        metadata.insert("createddate".to_string(), "yesterday".to_string());
        assert_eq!(created_from_metadata(&metadata), None);
        assert_eq!(created_from_metadata(&HashMap::new()), None);
    }

    #[test]
    fn test_cache_control_header() {
        assert_eq!(cache_control_header(31_536_000), "public, max-age=31536000");
    }
}
