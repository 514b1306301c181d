//! mediablob library: a virtual file system over Azure Blob Storage.
//!
//! Paths in any of the forms a CMS hands out (relative, absolute URLs,
//! backslash-delimited, `~`-prefixed, container-prefixed) are normalized to
//! blob keys, and directories are emulated on top of the flat key space.

use std::sync::Arc;

pub mod check;
pub mod config;
pub mod directory;
pub mod errors;
pub mod filesystem;
pub mod media;
pub mod metrics;
pub mod mime;
pub mod path;
pub mod registry;
pub mod server;
pub mod storage;

use crate::config::Config;
use crate::errors::FsResult;
use crate::filesystem::BlobFileSystem;
use crate::media::{MediaRoute, MediaService};
use crate::registry::FileSystemRegistry;

/// Shared application state passed to handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Provisioned file systems.
    pub registry: Arc<FileSystemRegistry>,
    /// File systems by alias, in alias order.
    pub filesystems: Vec<(String, Arc<BlobFileSystem>)>,
    /// Media routes to serve; empty when the virtual path provider is disabled.
    pub media: Vec<MediaService>,
}

impl AppState {
    /// Provision every configured file system through `registry`.
    pub async fn build(config: Config, registry: Arc<FileSystemRegistry>) -> FsResult<Self> {
        let mut filesystems = Vec::new();
        let mut media = Vec::new();
        for (alias, fs_config) in config.filesystems()? {
            let fs = registry.get_or_create(fs_config).await?;
            if !fs.config().disable_virtual_path_provider() {
                media.push(MediaService::new(MediaRoute::for_filesystem(&fs)?, fs.clone()));
            }
            filesystems.push((alias, fs));
        }
        Ok(Self {
            config,
            registry,
            filesystems,
            media,
        })
    }

    /// The file system configured under `alias`.
    pub fn filesystem(&self, alias: &str) -> Option<&Arc<BlobFileSystem>> {
        self.filesystems
            .iter()
            .find(|(a, _)| a == alias)
            .map(|(_, fs)| fs)
    }
}
