//! Storage backend abstraction for document management
//!
//! This module provides a clean abstraction over the backends that hold file
//! bytes (local filesystem, HDFS over WebHDFS) with a unified interface.
//! Paths passed to a backend are logical and backend-relative; each backend
//! maps them onto its own root.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

pub mod error;
pub mod factory;
pub mod layout;
pub mod local;
pub mod timeout;
pub mod webhdfs;

pub use error::{StorageError, StorageResult};

/// Core storage backend trait that all storage implementations must implement
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Create a directory and any missing parents. Succeeds if it already exists.
    async fn create_directory(&self, path: &str) -> StorageResult<()>;

    /// Remove the object at `path`, file or directory.
    /// Non-recursive removal of a non-empty directory fails.
    async fn delete_directory(&self, path: &str, recursive: bool) -> StorageResult<()>;

    /// Copy a local file into the backend. Readers never observe a partially
    /// written target.
    async fn upload_file(&self, local_path: &Path, storage_path: &str, overwrite: bool) -> StorageResult<()>;

    /// Copy a backend object to a local file
    async fn download_file(&self, storage_path: &str, local_path: &Path) -> StorageResult<()>;

    /// Read the full content of a backend object
    async fn read_file(&self, path: &str) -> StorageResult<Vec<u8>>;

    /// Names of the direct children of a directory, in backend order
    async fn list_directory(&self, path: &str) -> StorageResult<Vec<String>>;

    async fn file_status(&self, path: &str) -> StorageResult<FileStatus>;

    /// Check whether an object exists. Absence is `Ok(false)`, never an error.
    async fn exists(&self, path: &str) -> StorageResult<bool>;

    /// Move an object. Whether an existing `new_path` is replaced is backend-defined.
    async fn rename(&self, old_path: &str, new_path: &str) -> StorageResult<()>;

    /// Append bytes to a file, creating it when absent
    async fn append_to_file(&self, path: &str, data: &[u8]) -> StorageResult<()>;

    async fn set_replication(&self, path: &str, factor: u16) -> StorageResult<()>;

    /// Get a human-readable identifier for this storage backend type
    fn storage_type(&self) -> &'static str;

    /// Initialize the storage backend (create root directories, validate access)
    async fn initialize(&self) -> StorageResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStatus {
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
    /// Metadata change time where the backend tracks one, otherwise the access time
    pub changed_at: Option<DateTime<Utc>>,
    pub kind: EntryKind,
    /// Replication factor, only reported by distributed backends
    pub replication: Option<u16>,
}

impl FileStatus {
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Storage configuration enum for the supported backend types
#[derive(Debug, Clone)]
pub enum StorageConfig {
    /// Local filesystem storage
    Local {
        root: String,
    },
    /// HDFS reached through the WebHDFS REST API
    WebHdfs(webhdfs::WebHdfsConfig),
}

/// Normalize a logical path into its non-empty segments.
///
/// Leading, trailing and repeated separators are ignored; `.` segments are
/// dropped and `..` segments rejected so no path can escape the backend root.
pub(crate) fn path_segments(path: &str) -> StorageResult<Vec<&str>> {
    let mut segments = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(StorageError::InvalidPath(format!(
                    "{} escapes the storage root",
                    path
                )))
            }
            s => segments.push(s),
        }
    }
    Ok(segments)
}

/// Split a logical path into its parent directory and final name
pub(crate) fn split_parent(path: &str) -> StorageResult<(String, String)> {
    let mut segments = path_segments(path)?;
    let name = segments
        .pop()
        .ok_or_else(|| StorageError::InvalidPath(format!("{:?} has no file name", path)))?;
    Ok((segments.join("/"), name.to_string()))
}

/// Name of the hidden part file an upload is written to before it is moved
/// into place.
pub(crate) fn part_file_name(name: &str) -> String {
    format!(".{}.{}.part", name, uuid::Uuid::new_v4().simple())
}
