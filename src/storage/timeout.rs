//! Decorator bounding every backend call with a deadline

use async_trait::async_trait;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::{FileStatus, StorageBackend, StorageError, StorageResult};

pub struct TimeoutBackend {
    inner: Arc<dyn StorageBackend>,
    timeout: Duration,
}

impl TimeoutBackend {
    pub fn new(inner: Arc<dyn StorageBackend>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        path: &str,
        future: impl Future<Output = StorageResult<T>>,
    ) -> StorageResult<T> {
        match tokio::time::timeout(self.timeout, future).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "{} on {} backend timed out after {:?}: {}",
                    operation,
                    self.inner.storage_type(),
                    self.timeout,
                    path
                );
                Err(StorageError::Unavailable(format!(
                    "{} of {} timed out after {:?}",
                    operation, path, self.timeout
                )))
            }
        }
    }
}

#[async_trait]
impl StorageBackend for TimeoutBackend {
    async fn create_directory(&self, path: &str) -> StorageResult<()> {
        self.bounded("create_directory", path, self.inner.create_directory(path)).await
    }

    async fn delete_directory(&self, path: &str, recursive: bool) -> StorageResult<()> {
        self.bounded("delete_directory", path, self.inner.delete_directory(path, recursive))
            .await
    }

    async fn upload_file(&self, local_path: &Path, storage_path: &str, overwrite: bool) -> StorageResult<()> {
        self.bounded(
            "upload_file",
            storage_path,
            self.inner.upload_file(local_path, storage_path, overwrite),
        )
        .await
    }

    async fn download_file(&self, storage_path: &str, local_path: &Path) -> StorageResult<()> {
        self.bounded(
            "download_file",
            storage_path,
            self.inner.download_file(storage_path, local_path),
        )
        .await
    }

    async fn read_file(&self, path: &str) -> StorageResult<Vec<u8>> {
        self.bounded("read_file", path, self.inner.read_file(path)).await
    }

    async fn list_directory(&self, path: &str) -> StorageResult<Vec<String>> {
        self.bounded("list_directory", path, self.inner.list_directory(path)).await
    }

    async fn file_status(&self, path: &str) -> StorageResult<FileStatus> {
        self.bounded("file_status", path, self.inner.file_status(path)).await
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        self.bounded("exists", path, self.inner.exists(path)).await
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> StorageResult<()> {
        self.bounded("rename", old_path, self.inner.rename(old_path, new_path)).await
    }

    async fn append_to_file(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        self.bounded("append_to_file", path, self.inner.append_to_file(path, data)).await
    }

    async fn set_replication(&self, path: &str, factor: u16) -> StorageResult<()> {
        self.bounded("set_replication", path, self.inner.set_replication(path, factor))
            .await
    }

    fn storage_type(&self) -> &'static str {
        self.inner.storage_type()
    }

    async fn initialize(&self) -> StorageResult<()> {
        self.bounded("initialize", "", self.inner.initialize()).await
    }
}
