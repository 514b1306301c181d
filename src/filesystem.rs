//! The virtual file system exposed to the host application.
//!
//! [`BlobFileSystem`] accepts paths in any form the [`PathResolver`]
//! understands, normalizes them to blob keys, and performs the operation
//! through the [`BlobAdapter`] and [`DirectoryEmulator`].
//!
//! Reads treat a missing path as a normal outcome (`false`, empty, `None`).
//! Writes and store failures propagate as errors.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info};

use crate::config::FileSystemConfig;
use crate::directory::DirectoryEmulator;
use crate::errors::{FsError, FsResult};
use crate::mime::{ExtensionMimeTypeResolver, MimeTypeResolver};
use crate::path::PathResolver;
use crate::storage::adapter::BlobAdapter;
use crate::storage::backend::{BlobProperties, BlobStore};

/// Filter that matches every file.
pub const ALL_FILES: &str = "*.*";

/// A blob container presented as a hierarchical file system.
pub struct BlobFileSystem {
    config: FileSystemConfig,
    resolver: PathResolver,
    adapter: Arc<BlobAdapter>,
    directories: DirectoryEmulator,
    mime: Arc<dyn MimeTypeResolver>,
}

impl BlobFileSystem {
    pub fn new(config: FileSystemConfig, store: Arc<dyn BlobStore>) -> Self {
        let adapter = Arc::new(BlobAdapter::new(store, config.container_name()));
        Self {
            resolver: PathResolver::new(&config),
            directories: DirectoryEmulator::new(adapter.clone()),
            adapter,
            config,
            mime: Arc::new(ExtensionMimeTypeResolver),
        }
    }

    /// Use `mime` to pick upload content types.
    pub fn with_mime_resolver(mut self, mime: Arc<dyn MimeTypeResolver>) -> Self {
        self.mime = mime;
        self
    }

    pub fn config(&self) -> &FileSystemConfig {
        &self.config
    }

    /// Create the container if needed and apply the configured access level.
    pub async fn ensure_container(&self) -> FsResult<()> {
        self.adapter
            .ensure_container(self.config.container_access())
            .await
    }

    /// Store `data` at `path`.
    ///
    /// With `override_if_exists` unset, an existing file is left untouched
    /// and [`FsError::AlreadyExists`] is returned.
    pub async fn add_file(
        &self,
        path: &str,
        data: Bytes,
        override_if_exists: bool,
    ) -> FsResult<()> {
        let key = self.resolver.fix_path(path);
        if key.is_empty() {
            return Err(FsError::UnsupportedOperation {
                operation: format!("add_file at the container root ('{path}')"),
            });
        }
        let content_type = self.mime.resolve(&key);
        self.adapter
            .put(
                &key,
                data,
                content_type,
                self.config.cache_control_seconds(),
                override_if_exists,
            )
            .await?;
        Ok(())
    }

    /// Read `reader` to the end and store the bytes at `path`.
    pub async fn add_file_from_reader<R>(
        &self,
        path: &str,
        mut reader: R,
        override_if_exists: bool,
    ) -> FsResult<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .await
            .map_err(|e| FsError::Storage(anyhow::anyhow!("Failed to read upload for {path}: {e}")))?;
        self.add_file(path, Bytes::from(buf), override_if_exists)
            .await
    }

    /// Copying from a physical path has no equivalent in a blob container.
    pub fn add_physical_file(
        &self,
        path: &str,
        physical_path: &Path,
        _override_if_exists: bool,
        _copy: bool,
    ) -> FsResult<()> {
        Err(FsError::UnsupportedOperation {
            operation: format!(
                "add_physical_file from {} to {}",
                physical_path.display(),
                path
            ),
        })
    }

    /// Always false: files cannot be added by physical path.
    pub fn can_add_physical(&self) -> bool {
        false
    }

    /// Delete the file at `path`; a missing file is not an error.
    pub async fn delete_file(&self, path: &str) -> FsResult<()> {
        let key = self.resolver.fix_path(path);
        self.adapter.delete(&key).await
    }

    /// Delete the directory at `path` and everything beneath it.
    ///
    /// A flat store has no non-recursive delete, so `recursive` is ignored.
    pub async fn delete_directory(&self, path: &str, recursive: bool) -> FsResult<()> {
        let key = self.resolver.fix_path(path);
        if !recursive {
            debug!("Non-recursive delete of '{}' treated as recursive", key);
        }
        self.directories.delete_directory(key).await
    }

    pub async fn file_exists(&self, path: &str) -> FsResult<bool> {
        let key = self.resolver.fix_path(path);
        if key.is_empty() {
            return Ok(false);
        }
        self.adapter.exists(&key).await
    }

    pub async fn directory_exists(&self, path: &str) -> FsResult<bool> {
        let key = self.resolver.fix_path(path);
        self.directories.directory_exists(&key).await
    }

    /// File content, or `None` (logged) if nothing is stored at `path`.
    pub async fn open_file(&self, path: &str) -> FsResult<Option<Bytes>> {
        let key = self.resolver.fix_path(path);
        if key.is_empty() {
            info!("No file to open at the container root ('{}')", path);
            return Ok(None);
        }
        let data = self.adapter.get(&key).await?;
        if data.is_none() {
            info!("File not found: {}", key);
        }
        Ok(data)
    }

    /// Keys of every file beneath `path` that pass `filter`.
    pub async fn get_files(&self, path: &str, filter: &str) -> FsResult<Vec<String>> {
        let key = self.resolver.fix_path(path);
        let files = self.directories.list_files(&key, filter).await?;
        if files.is_empty() {
            debug!("No files under '{}' matching '{}'", key, filter);
        }
        Ok(files)
    }

    /// Names of the immediate sub-directories of `path`.
    pub async fn get_directories(&self, path: &str) -> FsResult<Vec<String>> {
        let key = self.resolver.fix_path(path);
        self.directories.list_directories(&key).await
    }

    /// When the file was first stored, or `None` if unknown.
    pub async fn get_created(&self, path: &str) -> FsResult<Option<DateTime<Utc>>> {
        let key = self.resolver.fix_path(path);
        self.adapter.get_created(&key).await
    }

    /// When the file content last changed, or `None` if it does not exist.
    pub async fn get_last_modified(&self, path: &str) -> FsResult<Option<DateTime<Utc>>> {
        let key = self.resolver.fix_path(path);
        self.adapter.get_last_modified(&key).await
    }

    /// Size in bytes, or `None` if the file does not exist.
    pub async fn get_size(&self, path: &str) -> FsResult<Option<u64>> {
        let key = self.resolver.fix_path(path);
        self.adapter.get_size(&key).await
    }

    /// Stored properties of the file at `path` in one store call, or `None`
    /// if it does not exist.
    pub async fn get_properties(&self, path: &str) -> FsResult<Option<BlobProperties>> {
        let key = self.resolver.fix_path(path);
        if key.is_empty() {
            return Ok(None);
        }
        self.adapter.properties(&key).await
    }

    /// Absolute blob URL of `path`.
    pub fn get_full_path(&self, path: &str) -> String {
        self.resolver
            .resolve_url(&self.resolver.fix_path(path), false)
    }

    /// Application-relative path of `path`, e.g. `/media/1010/media.jpg`.
    pub fn get_relative_path(&self, path: &str) -> String {
        self.resolver
            .resolve_url(&self.resolver.fix_path(path), true)
    }

    /// Public URL of `path`: absolute when the media route is disabled,
    /// application-relative otherwise.
    pub fn get_url(&self, path: &str) -> String {
        let relative = !self.config.disable_virtual_path_provider();
        self.resolver
            .resolve_url(&self.resolver.fix_path(path), relative)
    }
}
