//! HDFS storage backend speaking the WebHDFS REST API
//!
//! Data-carrying operations (CREATE, OPEN, APPEND) are two-step: the namenode
//! answers with a redirect to a datanode, which receives or serves the bytes.
//! Redirects are followed by hand so payloads are only ever sent to the
//! datanode.
//!
//! Per-backend semantics:
//! - `delete_directory` of an absent path fails with `NotFound`
//! - `rename` never replaces an existing destination (`AlreadyExists`)
//! - `upload_file` with overwrite renames the part file over the target with
//!   `renameoptions=OVERWRITE`, which HDFS performs atomically

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, redirect, Client, Method, Response, StatusCode};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use super::error::RemoteException;
use super::{
    part_file_name, path_segments, split_parent, EntryKind, FileStatus, StorageBackend,
    StorageError, StorageResult,
};

/// Delay before the first retry; doubles on every further attempt
const BASE_RETRY_DELAY_MS: u64 = 100;

#[derive(Debug, Clone)]
pub struct WebHdfsConfig {
    /// Namenode HTTP endpoint, e.g. `http://namenode:9870`
    pub namenode_url: String,
    pub user: String,
    /// Absolute HDFS directory logical paths resolve under
    pub base_path: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
}

impl WebHdfsConfig {
    pub fn new(namenode_url: impl Into<String>, user: impl Into<String>) -> Self {
        let user = user.into();
        Self {
            namenode_url: namenode_url.into(),
            base_path: format!("/user/{}", user),
            user,
            timeout_seconds: 30,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BooleanResponse {
    boolean: bool,
}

#[derive(Debug, Deserialize)]
struct FileStatusEnvelope {
    #[serde(rename = "FileStatus")]
    file_status: HdfsFileStatus,
}

#[derive(Debug, Deserialize)]
struct FileStatusesEnvelope {
    #[serde(rename = "FileStatuses")]
    file_statuses: FileStatusList,
}

#[derive(Debug, Deserialize)]
struct FileStatusList {
    #[serde(rename = "FileStatus", default)]
    file_status: Vec<HdfsFileStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HdfsFileStatus {
    #[serde(default)]
    path_suffix: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    length: u64,
    #[serde(default)]
    modification_time: i64,
    #[serde(default)]
    access_time: i64,
    #[serde(default)]
    replication: u16,
}

impl From<HdfsFileStatus> for FileStatus {
    fn from(status: HdfsFileStatus) -> Self {
        let kind = if status.kind == "DIRECTORY" {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        FileStatus {
            size: status.length,
            modified_at: DateTime::<Utc>::from_timestamp_millis(status.modification_time),
            // WebHDFS exposes no ctime; access time is the closest it has
            changed_at: DateTime::<Utc>::from_timestamp_millis(status.access_time),
            kind,
            replication: match kind {
                EntryKind::File => Some(status.replication),
                EntryKind::Directory => None,
            },
        }
    }
}

pub struct WebHdfsBackend {
    client: Client,
    config: WebHdfsConfig,
    endpoint: String,
}

impl WebHdfsBackend {
    pub fn new(config: WebHdfsConfig) -> Result<Self> {
        if config.user.is_empty() {
            return Err(anyhow!("HDFS user name is required"));
        }
        if !config.base_path.starts_with('/') {
            return Err(anyhow!("HDFS base path must be absolute, got {:?}", config.base_path));
        }
        let namenode = Url::parse(&config.namenode_url)
            .map_err(|e| anyhow!("Invalid namenode URL {:?}: {}", config.namenode_url, e))?;
        if namenode.scheme() != "http" && namenode.scheme() != "https" {
            return Err(anyhow!("Namenode URL must use http or https: {}", config.namenode_url));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .redirect(redirect::Policy::none())
            .build()?;

        let endpoint = format!("{}/webhdfs/v1", config.namenode_url.trim_end_matches('/'));
        info!("WebHDFS backend targeting {} as user {}", endpoint, config.user);

        Ok(Self {
            client,
            config,
            endpoint,
        })
    }

    /// Absolute HDFS path for a logical path
    fn absolute_path(&self, path: &str) -> StorageResult<String> {
        let mut segments = path_segments(&self.config.base_path)?;
        segments.extend(path_segments(path)?);
        Ok(format!("/{}", segments.join("/")))
    }

    fn url_for(&self, absolute: &str) -> String {
        let encoded: Vec<String> = absolute
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| urlencoding::encode(s).into_owned())
            .collect();
        format!("{}/{}", self.endpoint, encoded.join("/"))
    }

    /// Send a request to the namenode and pass through success and redirect
    /// responses; everything else is classified into a `StorageError`.
    async fn namenode(
        &self,
        method: Method,
        path: &str,
        op: &str,
        params: &[(&str, String)],
    ) -> StorageResult<Response> {
        let absolute = self.absolute_path(path)?;
        let mut query: Vec<(&str, String)> = vec![("op", op.to_string()), ("user.name", self.config.user.clone())];
        query.extend(params.iter().cloned());

        debug!("WebHDFS {} {} {}", method, op, absolute);
        let response = self
            .client
            .request(method, self.url_for(&absolute))
            .query(&query)
            .send()
            .await
            .map_err(|e| StorageError::from_reqwest(e, path))?;

        Self::check(response, path).await
    }

    async fn check(response: Response, path: &str) -> StorageResult<Response> {
        let status = response.status();
        if status.is_success() || status.is_redirection() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let remote = RemoteException::parse(&body);
        Err(StorageError::from_webhdfs(status.as_u16(), remote.as_ref(), path))
    }

    fn redirect_location(response: &Response, path: &str) -> StorageResult<String> {
        if !response.status().is_redirection() {
            return Err(StorageError::Backend {
                path: path.to_string(),
                message: format!("expected a datanode redirect, got HTTP {}", response.status()),
            });
        }
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string())
            .ok_or_else(|| StorageError::Backend {
                path: path.to_string(),
                message: "redirect without a Location header".to_string(),
            })
    }

    async fn boolean(response: Response, path: &str) -> StorageResult<bool> {
        let parsed: BooleanResponse = response
            .json()
            .await
            .map_err(|e| StorageError::from_reqwest(e, path))?;
        Ok(parsed.boolean)
    }

    /// Two-step write: ask the namenode where to write, then send the bytes
    /// to the datanode it names.
    async fn write_via_datanode(
        &self,
        method: Method,
        path: &str,
        op: &str,
        params: &[(&str, String)],
        data: Vec<u8>,
    ) -> StorageResult<()> {
        let response = self.namenode(method.clone(), path, op, params).await?;
        let location = Self::redirect_location(&response, path)?;

        let response = self
            .client
            .request(method, &location)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await
            .map_err(|e| StorageError::from_reqwest(e, path))?;
        let response = Self::check(response, path).await?;

        if response.status().is_redirection() {
            return Err(StorageError::Backend {
                path: path.to_string(),
                message: "datanode answered with another redirect".to_string(),
            });
        }
        Ok(())
    }

    async fn create_file(&self, path: &str, data: Vec<u8>, overwrite: bool) -> StorageResult<()> {
        self.write_via_datanode(
            Method::PUT,
            path,
            "CREATE",
            &[("overwrite", overwrite.to_string())],
            data,
        )
        .await
    }

    async fn delete_once(&self, path: &str, recursive: bool) -> StorageResult<()> {
        let response = self
            .namenode(Method::DELETE, path, "DELETE", &[("recursive", recursive.to_string())])
            .await?;
        if Self::boolean(response, path).await? {
            Ok(())
        } else {
            // HDFS reports an absent path as a plain `false`
            Err(StorageError::NotFound(path.to_string()))
        }
    }

    async fn open_once(&self, path: &str) -> StorageResult<Vec<u8>> {
        let response = self.namenode(Method::GET, path, "OPEN", &[]).await?;
        let response = if response.status().is_redirection() {
            let location = Self::redirect_location(&response, path)?;
            let response = self
                .client
                .get(&location)
                .send()
                .await
                .map_err(|e| StorageError::from_reqwest(e, path))?;
            Self::check(response, path).await?
        } else {
            response
        };

        let bytes = response
            .bytes()
            .await
            .map_err(|e| StorageError::from_reqwest(e, path))?;
        Ok(bytes.to_vec())
    }

    async fn status_once(&self, path: &str) -> StorageResult<FileStatus> {
        let response = self.namenode(Method::GET, path, "GETFILESTATUS", &[]).await?;
        let parsed: FileStatusEnvelope = response
            .json()
            .await
            .map_err(|e| StorageError::from_reqwest(e, path))?;
        Ok(parsed.file_status.into())
    }

    /// Retry wrapper for idempotent operations with exponential backoff.
    /// Only `Unavailable` failures are retried.
    async fn retry_operation<T, F, Fut>(&self, operation_name: &str, operation: F) -> StorageResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = StorageResult<T>>,
    {
        let max_retries = self.config.max_retries;
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        info!("WebHDFS operation '{}' succeeded after {} retries", operation_name, attempt);
                    }
                    return Ok(result);
                }
                Err(e) if e.is_unavailable() && attempt < max_retries => {
                    let delay_ms = BASE_RETRY_DELAY_MS * 2u64.pow(attempt);
                    warn!(
                        "WebHDFS operation '{}' failed (attempt {}/{}), retrying in {}ms: {}",
                        operation_name,
                        attempt + 1,
                        max_retries + 1,
                        delay_ms,
                        e
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_unavailable() {
                        error!(
                            "WebHDFS operation '{}' failed after {} attempts: {}",
                            operation_name,
                            attempt + 1,
                            e
                        );
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl StorageBackend for WebHdfsBackend {
    async fn create_directory(&self, path: &str) -> StorageResult<()> {
        let created = self
            .retry_operation(&format!("MKDIRS {}", path), || async {
                let response = self.namenode(Method::PUT, path, "MKDIRS", &[]).await?;
                Self::boolean(response, path).await
            })
            .await?;

        if !created {
            return Err(StorageError::Backend {
                path: path.to_string(),
                message: "namenode refused to create the directory".to_string(),
            });
        }
        info!("Created directory: hdfs://{}", self.absolute_path(path)?);
        Ok(())
    }

    async fn delete_directory(&self, path: &str, recursive: bool) -> StorageResult<()> {
        if path_segments(path)?.is_empty() {
            return Err(StorageError::InvalidPath(
                "refusing to delete the storage root".to_string(),
            ));
        }
        self.retry_operation(&format!("DELETE {}", path), || self.delete_once(path, recursive))
            .await?;
        info!("Deleted hdfs://{} (recursive={})", self.absolute_path(path)?, recursive);
        Ok(())
    }

    async fn upload_file(&self, local_path: &Path, storage_path: &str, overwrite: bool) -> StorageResult<()> {
        let (parent, name) = split_parent(storage_path)?;
        let data = tokio::fs::read(local_path)
            .await
            .map_err(|e| StorageError::from_io(e, &local_path.display().to_string()))?;

        if !overwrite && self.exists(storage_path).await? {
            warn!("File hdfs://{} already exists and overwrite is false", storage_path);
            return Err(StorageError::AlreadyExists(storage_path.to_string()));
        }

        let part = if parent.is_empty() {
            part_file_name(&name)
        } else {
            format!("{}/{}", parent, part_file_name(&name))
        };
        self.retry_operation(&format!("CREATE {}", part), || {
            self.create_file(&part, data.clone(), true)
        })
        .await?;

        let destination = self.absolute_path(storage_path)?;
        let renamed = if overwrite {
            self.namenode(
                Method::PUT,
                &part,
                "RENAME",
                &[("destination", destination.clone()), ("renameoptions", "OVERWRITE".to_string())],
            )
            .await
            .map(|_| true)
        } else {
            match self
                .namenode(Method::PUT, &part, "RENAME", &[("destination", destination.clone())])
                .await
            {
                Ok(response) => Self::boolean(response, &part).await,
                Err(e) => Err(e),
            }
        };

        let failure = match renamed {
            Ok(true) => None,
            Ok(false) => Some(StorageError::AlreadyExists(storage_path.to_string())),
            Err(e) => Some(e),
        };
        if let Some(e) = failure {
            if let Err(cleanup) = self.delete_once(&part, false).await {
                warn!("Failed to remove part file hdfs://{}: {}", part, cleanup);
            }
            error!("Failed to upload '{}' to hdfs://{}: {}", local_path.display(), destination, e);
            return Err(e);
        }

        info!(
            "Uploaded file from '{}' to hdfs://{} (overwrite={})",
            local_path.display(),
            destination,
            overwrite
        );
        Ok(())
    }

    async fn download_file(&self, storage_path: &str, local_path: &Path) -> StorageResult<()> {
        let data = self.read_file(storage_path).await?;
        tokio::fs::write(local_path, &data)
            .await
            .map_err(|e| StorageError::from_io(e, &local_path.display().to_string()))?;
        info!(
            "Downloaded file from hdfs://{} to '{}'",
            self.absolute_path(storage_path)?,
            local_path.display()
        );
        Ok(())
    }

    async fn read_file(&self, path: &str) -> StorageResult<Vec<u8>> {
        let data = self
            .retry_operation(&format!("OPEN {}", path), || self.open_once(path))
            .await?;
        debug!("Read {} bytes from hdfs://{}", data.len(), path);
        Ok(data)
    }

    async fn list_directory(&self, path: &str) -> StorageResult<Vec<String>> {
        let listing = self
            .retry_operation(&format!("LISTSTATUS {}", path), || async {
                let response = self.namenode(Method::GET, path, "LISTSTATUS", &[]).await?;
                let parsed: FileStatusesEnvelope = response
                    .json()
                    .await
                    .map_err(|e| StorageError::from_reqwest(e, path))?;
                Ok(parsed.file_statuses.file_status)
            })
            .await?;

        Ok(listing.into_iter().map(|status| status.path_suffix).collect())
    }

    async fn file_status(&self, path: &str) -> StorageResult<FileStatus> {
        self.retry_operation(&format!("GETFILESTATUS {}", path), || self.status_once(path))
            .await
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        match self.file_status(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> StorageResult<()> {
        let destination = self.absolute_path(new_path)?;
        let response = self
            .namenode(Method::PUT, old_path, "RENAME", &[("destination", destination.clone())])
            .await?;

        if Self::boolean(response, old_path).await? {
            info!("Renamed hdfs://{} to hdfs://{}", self.absolute_path(old_path)?, destination);
            return Ok(());
        }

        // A refused rename carries no reason; work out which precondition failed
        if !self.exists(old_path).await? {
            Err(StorageError::NotFound(old_path.to_string()))
        } else if self.exists(new_path).await? {
            Err(StorageError::AlreadyExists(new_path.to_string()))
        } else {
            Err(StorageError::Backend {
                path: old_path.to_string(),
                message: format!("namenode refused rename to {}", destination),
            })
        }
    }

    async fn append_to_file(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        match self
            .write_via_datanode(Method::POST, path, "APPEND", &[], data.to_vec())
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!("hdfs://{} does not exist yet, creating it for append", path);
                self.create_file(path, data.to_vec(), false).await?;
            }
            Err(e) => return Err(e),
        }
        debug!("Appended {} bytes to hdfs://{}", data.len(), path);
        Ok(())
    }

    async fn set_replication(&self, path: &str, factor: u16) -> StorageResult<()> {
        let applied = self
            .retry_operation(&format!("SETREPLICATION {}", path), || async {
                let response = self
                    .namenode(Method::PUT, path, "SETREPLICATION", &[("replication", factor.to_string())])
                    .await?;
                Self::boolean(response, path).await
            })
            .await?;

        if applied {
            info!("Set replication for hdfs://{} to {}", path, factor);
            return Ok(());
        }
        // HDFS answers false for absent paths and for directories
        match self.file_status(path).await {
            Ok(status) if status.is_directory() => Err(StorageError::Unsupported(format!(
                "replication applies to files only, {} is a directory",
                path
            ))),
            Ok(_) => Err(StorageError::Backend {
                path: path.to_string(),
                message: "namenode refused to change replication".to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    fn storage_type(&self) -> &'static str {
        "webhdfs"
    }

    async fn initialize(&self) -> StorageResult<()> {
        self.create_directory("").await?;
        info!(
            "WebHDFS storage backend initialized at hdfs://{}",
            self.config.base_path
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(base_path: &str) -> WebHdfsBackend {
        let mut config = WebHdfsConfig::new("http://namenode:9870/", "hadoop");
        config.base_path = base_path.to_string();
        WebHdfsBackend::new(config).unwrap()
    }

    #[test]
    fn test_config_defaults_to_user_home() {
        let config = WebHdfsConfig::new("http://namenode:9870", "etl");
        assert_eq!(config.base_path, "/user/etl");
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_new_rejects_bad_configuration() {
        assert!(WebHdfsBackend::new(WebHdfsConfig::new("not a url", "hadoop")).is_err());
        assert!(WebHdfsBackend::new(WebHdfsConfig::new("ftp://namenode", "hadoop")).is_err());
        assert!(WebHdfsBackend::new(WebHdfsConfig::new("http://namenode", "")).is_err());

        let mut config = WebHdfsConfig::new("http://namenode", "hadoop");
        config.base_path = "relative".to_string();
        assert!(WebHdfsBackend::new(config).is_err());
    }

    #[test]
    fn test_absolute_path_and_url_encoding() {
        let backend = backend("/user/hadoop");
        assert_eq!(
            backend.absolute_path("uploads/My Report/My Report.pdf").unwrap(),
            "/user/hadoop/uploads/My Report/My Report.pdf"
        );
        assert_eq!(
            backend.url_for("/user/hadoop/uploads/My Report.pdf"),
            "http://namenode:9870/webhdfs/v1/user/hadoop/uploads/My%20Report.pdf"
        );
        assert!(backend.absolute_path("../../etc").is_err());
    }

    #[test]
    fn test_root_base_path() {
        let backend = backend("/");
        assert_eq!(backend.absolute_path("uploads/a").unwrap(), "/uploads/a");
        assert_eq!(backend.absolute_path("").unwrap(), "/");
    }

    #[test]
    fn test_hdfs_status_conversion() {
        let raw = r#"{"FileStatus":{"accessTime":1700000000000,"blockSize":134217728,"group":"supergroup","length":24930,"modificationTime":1700000001000,"owner":"hadoop","pathSuffix":"","permission":"644","replication":3,"type":"FILE"}}"#;
        let parsed: FileStatusEnvelope = serde_json::from_str(raw).unwrap();
        let status: FileStatus = parsed.file_status.into();
        assert!(status.is_file());
        assert_eq!(status.size, 24930);
        assert_eq!(status.replication, Some(3));
        assert_eq!(status.modified_at.unwrap().timestamp_millis(), 1700000001000);

        let raw = r#"{"FileStatus":{"accessTime":0,"length":0,"modificationTime":1700000001000,"pathSuffix":"","replication":0,"type":"DIRECTORY"}}"#;
        let parsed: FileStatusEnvelope = serde_json::from_str(raw).unwrap();
        let status: FileStatus = parsed.file_status.into();
        assert!(status.is_directory());
        assert_eq!(status.replication, None);
    }
}
