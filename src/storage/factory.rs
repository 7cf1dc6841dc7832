//! Factory for creating storage backends based on configuration

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::local::LocalStorageBackend;
use super::timeout::TimeoutBackend;
use super::webhdfs::{WebHdfsBackend, WebHdfsConfig};
use super::{StorageBackend, StorageConfig};
use crate::config::{Config, FileSystem};

/// Create and initialize the configured backend, bounded by `timeout` per call
pub async fn create_storage_backend(config: StorageConfig, timeout: Duration) -> Result<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match config {
        StorageConfig::Local { root } => Arc::new(LocalStorageBackend::new(root)),
        StorageConfig::WebHdfs(webhdfs_config) => Arc::new(WebHdfsBackend::new(webhdfs_config)?),
    };

    let backend: Arc<dyn StorageBackend> = Arc::new(TimeoutBackend::new(backend, timeout));
    backend.initialize().await?;
    info!("Using {} storage backend", backend.storage_type());
    Ok(backend)
}

/// Derive the storage configuration from the application configuration
pub fn storage_config_from_env(config: &Config) -> StorageConfig {
    let local = || StorageConfig::Local {
        root: config.local_storage_root.clone(),
    };

    match config.file_system {
        FileSystem::Local => local(),
        FileSystem::Hadoop => match (&config.hadoop_namenode_url, &config.hadoop_username) {
            (Some(namenode_url), Some(username)) => {
                let mut webhdfs = WebHdfsConfig::new(namenode_url.clone(), username.clone());
                if let Some(base_path) = &config.hadoop_base_path {
                    webhdfs.base_path = base_path.clone();
                }
                webhdfs.max_retries = config.hadoop_max_retries;
                webhdfs.timeout_seconds = config.backend_timeout_seconds;
                StorageConfig::WebHdfs(webhdfs)
            }
            _ => {
                warn!(
                    "FILE_SYSTEM=hadoop requires HADOOP_NAMENODE_URL and HADOOP_USERNAME, using local storage"
                );
                local()
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(pairs: &[(&str, &str)]) -> Config {
        Config::from_lookup(|key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        })
        .unwrap()
    }

    #[test]
    fn test_hadoop_without_credentials_falls_back_to_local() {
        let config = config(&[("FILE_SYSTEM", "hadoop"), ("HADOOP_NAMENODE_URL", "http://nn:9870")]);
        assert!(matches!(storage_config_from_env(&config), StorageConfig::Local { .. }));
    }

    #[test]
    fn test_hadoop_configuration() {
        let config = config(&[
            ("FILE_SYSTEM", "hadoop"),
            ("HADOOP_NAMENODE_URL", "http://nn:9870"),
            ("HADOOP_USERNAME", "etl"),
            ("HADOOP_MAX_RETRIES", "5"),
        ]);
        match storage_config_from_env(&config) {
            StorageConfig::WebHdfs(webhdfs) => {
                assert_eq!(webhdfs.namenode_url, "http://nn:9870");
                assert_eq!(webhdfs.base_path, "/user/etl");
                assert_eq!(webhdfs.max_retries, 5);
            }
            other => panic!("expected WebHDFS, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_local_backend_is_initialized() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("storage");
        let backend = create_storage_backend(
            StorageConfig::Local {
                root: root.to_string_lossy().into_owned(),
            },
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert_eq!(backend.storage_type(), "local");
        assert!(root.is_dir());
    }
}
