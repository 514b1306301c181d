//! Provisioned file systems, shared across the application.
//!
//! The registry hands out one [`BlobFileSystem`] per `(container, root URL)`
//! pair. The first request for a pair builds the store, provisions the
//! container, and caches the result; construction happens under a single
//! lock so concurrent first uses provision exactly once.

use metrics::gauge;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::FileSystemConfig;
use crate::errors::{FsError, FsResult};
use crate::filesystem::BlobFileSystem;
use crate::metrics::FILESYSTEMS_TOTAL;
use crate::storage::azure::AzureBlobStore;
use crate::storage::backend::BlobStore;
use crate::storage::memory::MemoryBlobStore;

/// Builds the [`BlobStore`] behind a file system.
pub trait BlobStoreFactory: Send + Sync {
    fn create(&self, config: &FileSystemConfig) -> FsResult<Arc<dyn BlobStore>>;
}

/// Talks to Azure Blob Storage (or the local emulator).
#[derive(Debug, Default, Clone, Copy)]
pub struct AzureStoreFactory;

impl BlobStoreFactory for AzureStoreFactory {
    fn create(&self, config: &FileSystemConfig) -> FsResult<Arc<dyn BlobStore>> {
        Ok(Arc::new(AzureBlobStore::from_config(config)?))
    }
}

/// Keeps blobs in process memory.
///
/// Without a shared store every file system gets a fresh, empty one.
#[derive(Debug, Default, Clone)]
pub struct MemoryStoreFactory {
    shared: Option<Arc<MemoryBlobStore>>,
}

impl MemoryStoreFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out `store` for every file system.
    pub fn with_store(store: Arc<MemoryBlobStore>) -> Self {
        Self {
            shared: Some(store),
        }
    }
}

impl BlobStoreFactory for MemoryStoreFactory {
    fn create(&self, _config: &FileSystemConfig) -> FsResult<Arc<dyn BlobStore>> {
        let store = self
            .shared
            .clone()
            .unwrap_or_else(|| Arc::new(MemoryBlobStore::new()));
        Ok(store)
    }
}

/// Pick the factory for a `storage_backend` setting.
pub fn factory_for(backend: &str) -> FsResult<Arc<dyn BlobStoreFactory>> {
    match backend.trim().to_ascii_lowercase().as_str() {
        "azure" => Ok(Arc::new(AzureStoreFactory)),
        "memory" => Ok(Arc::new(MemoryStoreFactory::new())),
        other => Err(FsError::config(format!(
            "Unknown storage_backend '{other}': expected 'azure' or 'memory'"
        ))),
    }
}

type RegistryKey = (String, String);

/// Cache of provisioned file systems keyed by `(container, root URL)`.
pub struct FileSystemRegistry {
    factory: Arc<dyn BlobStoreFactory>,
    filesystems: Mutex<HashMap<RegistryKey, Arc<BlobFileSystem>>>,
}

impl FileSystemRegistry {
    pub fn new(factory: Arc<dyn BlobStoreFactory>) -> Self {
        Self {
            factory,
            filesystems: Mutex::new(HashMap::new()),
        }
    }

    /// The file system for `config`, provisioning it on first use.
    ///
    /// A failed provisioning is not cached; the next call tries again.
    pub async fn get_or_create(&self, config: FileSystemConfig) -> FsResult<Arc<BlobFileSystem>> {
        let key = (
            config.container_name().to_string(),
            config.root_url().to_string(),
        );
        let mut filesystems = self.filesystems.lock().await;
        if let Some(fs) = filesystems.get(&key) {
            return Ok(fs.clone());
        }

        let store = self.factory.create(&config)?;
        let fs = Arc::new(BlobFileSystem::new(config, store));
        fs.ensure_container().await?;
        info!(
            "Provisioned file system: container={} root_url={}",
            key.0, key.1
        );

        filesystems.insert(key, fs.clone());
        gauge!(FILESYSTEMS_TOTAL).set(filesystems.len() as f64);
        Ok(fs)
    }

    /// Number of provisioned file systems.
    pub async fn len(&self) -> usize {
        self.filesystems.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.filesystems.lock().await.is_empty()
    }
}
