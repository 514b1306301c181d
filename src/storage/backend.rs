//! Abstract blob store trait.
//!
//! Every blob store must implement [`BlobStore`].  The trait covers the
//! primitives the virtual file system needs from a flat key/value object
//! store: put, get, delete, exists, hierarchy listing and metadata.
//! Implementations translate their own failures into [`FsError`].

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use crate::errors::FsError;

/// Boxed future returned by every store operation.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, FsError>> + Send + 'a>>;

/// Public read access level of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerAccess {
    /// Only authenticated requests may read blobs.
    Private,
    /// Anonymous clients may read blobs (but not list the container).
    Blob,
}

/// HTTP headers stored alongside blob content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobHttpHeaders {
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
}

/// Properties of a stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobProperties {
    /// Store-managed last modification time.
    pub last_modified: DateTime<Utc>,
    /// Content length in bytes.
    pub content_length: u64,
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    /// User metadata. Keys are compared case-insensitively by readers.
    pub metadata: HashMap<String, String>,
}

/// One entry of a hierarchy listing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ListItem {
    /// A blob directly under the listed prefix (full key).
    Blob(String),
    /// A virtual sub-directory, as its full prefix ending in the delimiter.
    Prefix(String),
}

impl ListItem {
    /// The key or prefix this entry carries.
    pub fn name(&self) -> &str {
        match self {
            ListItem::Blob(name) | ListItem::Prefix(name) => name,
        }
    }
}

/// Async blob store contract.
pub trait BlobStore: Send + Sync + 'static {
    /// Create the container if it does not exist and apply `access`.
    fn ensure_container(&self, access: ContainerAccess) -> StoreFuture<'_, ()>;

    /// Check whether a blob exists at `key`.
    fn exists(&self, key: &str) -> StoreFuture<'_, bool>;

    /// Upload `data` to `key`, replacing any existing blob.
    fn put(&self, key: &str, data: Bytes, headers: BlobHttpHeaders) -> StoreFuture<'_, ()>;

    /// Read the blob at `key`, or `None` if it does not exist.
    fn get(&self, key: &str) -> StoreFuture<'_, Option<Bytes>>;

    /// Delete the blob at `key`. Deleting a missing blob succeeds.
    fn delete(&self, key: &str) -> StoreFuture<'_, ()>;

    /// Fetch the properties of `key`, or `None` if it does not exist.
    fn get_properties(&self, key: &str) -> StoreFuture<'_, Option<BlobProperties>>;

    /// Replace the user metadata of an existing blob.
    fn set_metadata(&self, key: &str, metadata: HashMap<String, String>) -> StoreFuture<'_, ()>;

    /// List blobs whose names start with `prefix`, in lexical order.
    ///
    /// With a delimiter, names containing the delimiter after the prefix are
    /// rolled up into one [`ListItem::Prefix`] per immediate sub-segment.
    /// Without one, every matching blob is returned.
    fn list(&self, prefix: &str, delimiter: Option<&str>) -> StoreFuture<'_, Vec<ListItem>>;
}
