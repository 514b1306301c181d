//! Directory emulation over a flat blob namespace.
//!
//! A "directory" exists when at least one blob key starts with its prefix
//! followed by `/`.  Listings use one level of hierarchy at a time; deletes
//! descend depth-first, one level per round-trip.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

use crate::errors::FsResult;
use crate::storage::adapter::{BlobAdapter, DELIMITER};
use crate::storage::backend::ListItem;

/// The listing prefix of a directory key: `""` for the root, else `key/`.
pub fn directory_prefix(key: &str) -> String {
    let key = key.trim_matches('/');
    if key.is_empty() {
        String::new()
    } else {
        format!("{key}{DELIMITER}")
    }
}

/// Loose extension filter.
///
/// `*.*`, `*` and empty match everything.  Otherwise the leading `*` is
/// dropped and the rest must occur somewhere in the key, ignoring ASCII
/// case, so `*.jpg` also matches `a.jpgx`.
pub fn matches_filter(key: &str, filter: &str) -> bool {
    let filter = filter.trim();
    if filter.is_empty() || filter == "*" || filter == "*.*" {
        return true;
    }
    let needle = filter.trim_start_matches('*').to_ascii_lowercase();
    key.to_ascii_lowercase().contains(&needle)
}

/// Derives directory views from blob listings.
#[derive(Clone)]
pub struct DirectoryEmulator {
    adapter: Arc<BlobAdapter>,
}

impl DirectoryEmulator {
    pub fn new(adapter: Arc<BlobAdapter>) -> Self {
        Self { adapter }
    }

    /// True iff at least one blob lives under `key`.
    pub async fn directory_exists(&self, key: &str) -> FsResult<bool> {
        let items = self.adapter.list_by_prefix(&directory_prefix(key)).await?;
        Ok(!items.is_empty())
    }

    /// Names of the immediate sub-directories of `key`, ascending.
    ///
    /// Names are the last path segment only.
    pub async fn list_directories(&self, key: &str) -> FsResult<Vec<String>> {
        let prefix = directory_prefix(key);
        let items = self.adapter.list_by_prefix(&prefix).await?;

        let mut names = BTreeSet::new();
        for item in items {
            let rest = match &item {
                ListItem::Prefix(p) => p.strip_prefix(prefix.as_str()).unwrap_or(p.as_str()),
                // Stores without delimiter support hand back nested blobs.
                ListItem::Blob(name) => match name.strip_prefix(prefix.as_str()) {
                    Some(rest) if rest.contains(DELIMITER) => rest,
                    _ => continue,
                },
            };
            match rest.split(DELIMITER).find(|s| !s.is_empty()) {
                Some(segment) => {
                    names.insert(segment.to_string());
                }
                None => debug!("Skipping unnamed sub-directory under '{}'", prefix),
            }
        }
        Ok(names.into_iter().collect())
    }

    /// Full keys of every blob under `key` at any depth that pass `filter`.
    ///
    /// A missing directory yields an empty list.
    pub async fn list_files(&self, key: &str, filter: &str) -> FsResult<Vec<String>> {
        let keys = self.adapter.list_all(&directory_prefix(key)).await?;
        Ok(keys
            .into_iter()
            .filter(|k| matches_filter(k, filter))
            .collect())
    }

    /// Delete every blob under `key`, one hierarchy level at a time.
    ///
    /// A missing directory is a no-op.
    pub async fn delete_directory(&self, key: String) -> FsResult<()> {
        debug!("Deleting directory '{}'", key);
        self.delete_prefix(directory_prefix(&key)).await
    }

    /// Sub-prefixes are followed exactly as listed, so keys with empty
    /// segments such as `forms//a.jpg` are reached too.
    fn delete_prefix(
        &self,
        prefix: String,
    ) -> Pin<Box<dyn Future<Output = FsResult<()>> + Send + '_>> {
        Box::pin(async move {
            let items = self.adapter.list_by_prefix(&prefix).await?;
            debug!("Deleting prefix '{}' ({} entries)", prefix, items.len());

            for item in items {
                match item {
                    ListItem::Blob(name) => self.adapter.delete(&name).await?,
                    // Relisting the same prefix would never terminate.
                    ListItem::Prefix(sub) if sub == prefix => {}
                    ListItem::Prefix(sub) => self.delete_prefix(sub).await?,
                }
            }
            Ok(())
        })
    }
}
