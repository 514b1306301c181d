//! Connection check for a configured file system.
//!
//! Builds the store, provisions the container and lists its top level,
//! reporting the outcome as a [`ConnectionStatus`] instead of an error.

use serde::Serialize;
use tracing::{error, info};

use crate::config::Config;
use crate::errors::{FsError, FsResult};
use crate::filesystem::BlobFileSystem;
use crate::registry::BlobStoreFactory;

/// Outcome of a connection check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionStatus {
    Ok,
    ConnectionError,
    InvalidContainerName,
    ConfigError,
}

impl ConnectionStatus {
    pub fn is_ok(self) -> bool {
        self == ConnectionStatus::Ok
    }
}

impl From<&FsError> for ConnectionStatus {
    fn from(err: &FsError) -> Self {
        match err {
            FsError::InvalidContainerName { .. } => ConnectionStatus::InvalidContainerName,
            FsError::InvalidConfiguration { .. } => ConnectionStatus::ConfigError,
            _ => ConnectionStatus::ConnectionError,
        }
    }
}

/// JSON report printed by `mediablob check`.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    pub alias: String,
    pub status: ConnectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Top-level directories found in the container.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub directories: Vec<String>,
}

/// Check that the file system `alias` can reach its container.
pub async fn check_connection(
    config: &Config,
    alias: &str,
    factory: &dyn BlobStoreFactory,
) -> ConnectionReport {
    let mut report = ConnectionReport {
        alias: alias.to_string(),
        status: ConnectionStatus::Ok,
        container: None,
        message: None,
        directories: Vec::new(),
    };

    let outcome: FsResult<Vec<String>> = async {
        let fs_config = config.filesystem(alias)?;
        report.container = Some(fs_config.container_name().to_string());
        let store = factory.create(&fs_config)?;
        let fs = BlobFileSystem::new(fs_config, store);
        fs.ensure_container().await?;
        fs.get_directories("/").await
    }
    .await;

    match outcome {
        Ok(directories) => {
            info!(
                "Connection check passed for '{}' ({} directories)",
                alias,
                directories.len()
            );
            report.directories = directories;
        }
        Err(e) => {
            error!("Connection check failed for '{}': {}", alias, e);
            report.status = ConnectionStatus::from(&e);
            report.message = Some(e.to_string());
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::registry::MemoryStoreFactory;
    use crate::storage::backend::{BlobHttpHeaders, BlobStore};
    use crate::storage::memory::MemoryBlobStore;
    use bytes::Bytes;
    use std::sync::Arc;

    const CONFIG: &str = r#"
filesystems:
  media:
    container_name: media
    root_url: http://127.0.0.1:10000/devstoreaccount1/
    connection_string: UseDevelopmentStorage=true
  broken:
    container_name: Bad_Name
    root_url: http://127.0.0.1:10000/devstoreaccount1/
    connection_string: UseDevelopmentStorage=true
"#;

    #[tokio::test]
    async fn test_check_ok_lists_directories() {
        let config = parse_config(CONFIG).unwrap();
        let store = Arc::new(MemoryBlobStore::new());
        store
            .put("1010/a.jpg", Bytes::from("a"), BlobHttpHeaders::default())
            .await
            .unwrap();
        let factory = MemoryStoreFactory::with_store(store.clone());

        let report = check_connection(&config, "media", &factory).await;
        assert!(report.status.is_ok());
        assert_eq!(report.directories, vec!["1010"]);
        assert_eq!(store.provision_count(), 1);
    }

    #[tokio::test]
    async fn test_check_reports_connection_error() {
        let config = parse_config(CONFIG).unwrap();
        let store = Arc::new(MemoryBlobStore::new());
        store.set_offline(true);
        let factory = MemoryStoreFactory::with_store(store);

        let report = check_connection(&config, "media", &factory).await;
        assert_eq!(report.status, ConnectionStatus::ConnectionError);
        assert!(report.message.is_some());
    }

    #[tokio::test]
    async fn test_check_reports_invalid_container() {
        let config = parse_config(CONFIG).unwrap();
        let report = check_connection(&config, "broken", &MemoryStoreFactory::new()).await;
        assert_eq!(report.status, ConnectionStatus::InvalidContainerName);
    }

    #[tokio::test]
    async fn test_check_reports_missing_alias() {
        let config = parse_config(CONFIG).unwrap();
        let report = check_connection(&config, "forms", &MemoryStoreFactory::new()).await;
        assert_eq!(report.status, ConnectionStatus::ConfigError);
    }

    #[test]
    fn test_report_json() {
        let report = ConnectionReport {
            alias: "media".into(),
            status: ConnectionStatus::ConnectionError,
            container: Some("media".into()),
            message: Some("denied".into()),
            directories: Vec::new(),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "ConnectionError");
        assert_eq!(json["message"], "denied");
        assert!(json.get("directories").is_none());
    }
}
