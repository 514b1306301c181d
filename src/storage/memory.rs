//! In-memory blob store.
//!
//! Blobs are held in a `tokio::sync::RwLock<BTreeMap<...>>`, so listings
//! come back in lexical key order just like the blob service's.  Used as
//! the `memory` backend and as the fake behind the file system tests.

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::debug;

use super::backend::{
    BlobHttpHeaders, BlobProperties, BlobStore, ContainerAccess, ListItem, StoreFuture,
};
use crate::errors::FsError;

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Bytes,
    headers: BlobHttpHeaders,
    metadata: HashMap<String, String>,
    last_modified: DateTime<Utc>,
}

/// In-memory [`BlobStore`].
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: tokio::sync::RwLock<BTreeMap<String, StoredBlob>>,
    access: tokio::sync::RwLock<Option<ContainerAccess>>,
    /// Number of `ensure_container` calls served.
    provisioned: AtomicUsize,
    /// When set every call fails with a connection error.
    offline: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail as if the store were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// How many times the container was provisioned.
    pub fn provision_count(&self) -> usize {
        self.provisioned.load(Ordering::SeqCst)
    }

    /// Access level set by the last `ensure_container`.
    pub async fn container_access(&self) -> Option<ContainerAccess> {
        *self.access.read().await
    }

    /// Number of stored blobs.
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }

    fn check_online(&self) -> Result<(), FsError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(FsError::connection("in-memory store is offline"));
        }
        Ok(())
    }

    /// A timestamp strictly later than `previous`.
    ///
    /// Two writes inside one clock tick still get increasing times.
    fn next_timestamp(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
        let now = Utc::now();
        match previous {
            Some(prev) if prev >= now => prev + Duration::microseconds(1),
            _ => now,
        }
    }
}

impl BlobStore for MemoryBlobStore {
    fn ensure_container(&self, access: ContainerAccess) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.check_online()?;
            *self.access.write().await = Some(access);
            self.provisioned.fetch_add(1, Ordering::SeqCst);
            debug!("Memory ensure_container: access={:?}", access);
            Ok(())
        })
    }

    fn exists(&self, key: &str) -> StoreFuture<'_, bool> {
        let key = key.to_string();
        Box::pin(async move {
            self.check_online()?;
            Ok(self.blobs.read().await.contains_key(&key))
        })
    }

    fn put(&self, key: &str, data: Bytes, headers: BlobHttpHeaders) -> StoreFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            self.check_online()?;
            let mut blobs = self.blobs.write().await;
            let previous = blobs.get(&key).map(|b| b.last_modified);
            debug!("Memory put: key={} size={}", key, data.len());
            // A fresh upload replaces the metadata, as Put Blob does.
            blobs.insert(
                key,
                StoredBlob {
                    data,
                    headers,
                    metadata: HashMap::new(),
                    last_modified: Self::next_timestamp(previous),
                },
            );
            Ok(())
        })
    }

    fn get(&self, key: &str) -> StoreFuture<'_, Option<Bytes>> {
        let key = key.to_string();
        Box::pin(async move {
            self.check_online()?;
            Ok(self.blobs.read().await.get(&key).map(|b| b.data.clone()))
        })
    }

    fn delete(&self, key: &str) -> StoreFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            self.check_online()?;
            self.blobs.write().await.remove(&key);
            Ok(())
        })
    }

    fn get_properties(&self, key: &str) -> StoreFuture<'_, Option<BlobProperties>> {
        let key = key.to_string();
        Box::pin(async move {
            self.check_online()?;
            Ok(self.blobs.read().await.get(&key).map(|b| BlobProperties {
                last_modified: b.last_modified,
                content_length: b.data.len() as u64,
                content_type: b.headers.content_type.clone(),
                cache_control: b.headers.cache_control.clone(),
                metadata: b.metadata.clone(),
            }))
        })
    }

    fn set_metadata(&self, key: &str, metadata: HashMap<String, String>) -> StoreFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            self.check_online()?;
            let mut blobs = self.blobs.write().await;
            let blob = blobs
                .get_mut(&key)
                .ok_or_else(|| FsError::NotFound { path: key.clone() })?;
            blob.metadata = metadata;
            blob.last_modified = Self::next_timestamp(Some(blob.last_modified));
            Ok(())
        })
    }

    fn list(&self, prefix: &str, delimiter: Option<&str>) -> StoreFuture<'_, Vec<ListItem>> {
        let prefix = prefix.to_string();
        let delimiter = delimiter.filter(|d| !d.is_empty()).map(str::to_string);
        Box::pin(async move {
            self.check_online()?;
            let blobs = self.blobs.read().await;
            let matching = blobs
                .range(prefix.clone()..)
                .map(|(k, _)| k)
                .take_while(|k| k.starts_with(&prefix));

            let Some(delimiter) = delimiter else {
                return Ok(matching.cloned().map(ListItem::Blob).collect());
            };

            let mut items = Vec::new();
            let mut prefixes = BTreeSet::new();
            for key in matching {
                let after_prefix = &key[prefix.len()..];
                match after_prefix.find(&delimiter) {
                    Some(pos) => {
                        let cp = format!("{}{}{}", prefix, &after_prefix[..pos], delimiter);
                        prefixes.insert(cp);
                    }
                    None => items.push(ListItem::Blob(key.clone())),
                }
            }
            items.extend(prefixes.into_iter().map(ListItem::Prefix));
            items.sort_by(|a, b| a.name().cmp(b.name()));
            Ok(items)
        })
    }
}
