//! Local filesystem storage backend implementation
//!
//! Logical paths are resolved under a root directory. Overwriting `rename`
//! follows POSIX semantics: an existing file at the destination is replaced
//! atomically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::{
    part_file_name, path_segments, split_parent, EntryKind, FileStatus, StorageBackend,
    StorageError, StorageResult,
};

/// Local filesystem storage backend
pub struct LocalStorageBackend {
    root: PathBuf,
}

impl LocalStorageBackend {
    /// Create a new local storage backend rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> StorageResult<PathBuf> {
        let mut full = self.root.clone();
        for segment in path_segments(path)? {
            full.push(segment);
        }
        Ok(full)
    }

    async fn path_exists(full: &Path, path: &str) -> StorageResult<bool> {
        fs::try_exists(full)
            .await
            .map_err(|e| StorageError::from_io(e, path))
    }
}

fn to_utc(time: std::io::Result<std::time::SystemTime>) -> Option<DateTime<Utc>> {
    time.ok().map(DateTime::<Utc>::from)
}

#[cfg(unix)]
fn changed_at(metadata: &std::fs::Metadata) -> Option<DateTime<Utc>> {
    use std::os::unix::fs::MetadataExt;
    DateTime::from_timestamp(metadata.ctime(), metadata.ctime_nsec() as u32)
}

#[cfg(not(unix))]
fn changed_at(metadata: &std::fs::Metadata) -> Option<DateTime<Utc>> {
    to_utc(metadata.accessed())
}

#[async_trait]
impl StorageBackend for LocalStorageBackend {
    async fn create_directory(&self, path: &str) -> StorageResult<()> {
        let full = self.resolve(path)?;
        fs::create_dir_all(&full)
            .await
            .map_err(|e| StorageError::from_io(e, path))?;
        debug!("Ensured directory exists: {}", full.display());
        Ok(())
    }

    async fn delete_directory(&self, path: &str, recursive: bool) -> StorageResult<()> {
        if path_segments(path)?.is_empty() {
            return Err(StorageError::InvalidPath(
                "refusing to delete the storage root".to_string(),
            ));
        }
        let full = self.resolve(path)?;

        let metadata = match fs::symlink_metadata(&full).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Nothing to delete, already absent: {}", full.display());
                return Ok(());
            }
            Err(e) => return Err(StorageError::from_io(e, path)),
        };

        let result = if metadata.is_dir() {
            if recursive {
                fs::remove_dir_all(&full).await
            } else {
                fs::remove_dir(&full).await
            }
        } else {
            fs::remove_file(&full).await
        };

        match result {
            Ok(()) => {
                info!("Deleted {} (recursive={})", full.display(), recursive);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Deleted concurrently, already absent: {}", full.display());
                Ok(())
            }
            Err(e) => Err(StorageError::from_io(e, path)),
        }
    }

    async fn upload_file(&self, local_path: &Path, storage_path: &str, overwrite: bool) -> StorageResult<()> {
        let (parent, name) = split_parent(storage_path)?;
        let dest = self.resolve(storage_path)?;
        let local_display = local_path.display().to_string();

        if !Self::path_exists(local_path, &local_display).await? {
            return Err(StorageError::NotFound(local_display));
        }
        if !overwrite && Self::path_exists(&dest, storage_path).await? {
            warn!("File {} already exists and overwrite is false", dest.display());
            return Err(StorageError::AlreadyExists(storage_path.to_string()));
        }

        let part = self.resolve(&parent)?.join(part_file_name(&name));
        if let Err(e) = fs::copy(local_path, &part).await {
            let _ = fs::remove_file(&part).await;
            return Err(StorageError::from_io(e, storage_path));
        }

        // rename replaces atomically, hard_link refuses to clobber
        let placed = if overwrite {
            fs::rename(&part, &dest).await
        } else {
            let linked = fs::hard_link(&part, &dest).await;
            if let Err(e) = fs::remove_file(&part).await {
                warn!("Failed to remove part file {}: {}", part.display(), e);
            }
            linked
        };

        if let Err(e) = placed {
            let _ = fs::remove_file(&part).await;
            return Err(StorageError::from_io(e, storage_path));
        }

        info!("Uploaded file from {} to {}", local_display, dest.display());
        Ok(())
    }

    async fn download_file(&self, storage_path: &str, local_path: &Path) -> StorageResult<()> {
        let src = self.resolve(storage_path)?;
        let metadata = fs::metadata(&src)
            .await
            .map_err(|e| StorageError::from_io(e, storage_path))?;
        if metadata.is_dir() {
            return Err(StorageError::Backend {
                path: storage_path.to_string(),
                message: "is a directory".to_string(),
            });
        }

        fs::copy(&src, local_path)
            .await
            .map_err(|e| StorageError::from_io(e, &local_path.display().to_string()))?;
        info!("Downloaded file from {} to {}", src.display(), local_path.display());
        Ok(())
    }

    async fn read_file(&self, path: &str) -> StorageResult<Vec<u8>> {
        let full = self.resolve(path)?;
        let data = fs::read(&full)
            .await
            .map_err(|e| StorageError::from_io(e, path))?;
        debug!("Read {} bytes from {}", data.len(), full.display());
        Ok(data)
    }

    async fn list_directory(&self, path: &str) -> StorageResult<Vec<String>> {
        let full = self.resolve(path)?;
        let mut entries = fs::read_dir(&full)
            .await
            .map_err(|e| StorageError::from_io(e, path))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::from_io(e, path))?
        {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        Ok(names)
    }

    async fn file_status(&self, path: &str) -> StorageResult<FileStatus> {
        let full = self.resolve(path)?;
        let metadata = fs::metadata(&full)
            .await
            .map_err(|e| StorageError::from_io(e, path))?;

        Ok(FileStatus {
            size: metadata.len(),
            modified_at: to_utc(metadata.modified()),
            changed_at: changed_at(&metadata),
            kind: if metadata.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            },
            replication: None,
        })
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        let full = self.resolve(path)?;
        Self::path_exists(&full, path).await
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> StorageResult<()> {
        let old_full = self.resolve(old_path)?;
        let new_full = self.resolve(new_path)?;

        if !Self::path_exists(&old_full, old_path).await? {
            return Err(StorageError::NotFound(old_path.to_string()));
        }
        fs::rename(&old_full, &new_full)
            .await
            .map_err(|e| StorageError::from_io(e, new_path))?;
        info!("Renamed {} to {}", old_full.display(), new_full.display());
        Ok(())
    }

    async fn append_to_file(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        let full = self.resolve(path)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&full)
            .await
            .map_err(|e| StorageError::from_io(e, path))?;
        file.write_all(data)
            .await
            .map_err(|e| StorageError::from_io(e, path))?;
        file.flush()
            .await
            .map_err(|e| StorageError::from_io(e, path))?;
        debug!("Appended {} bytes to {}", data.len(), full.display());
        Ok(())
    }

    async fn set_replication(&self, path: &str, _factor: u16) -> StorageResult<()> {
        warn!("Attempted to set replication factor on local storage for {}", path);
        Err(StorageError::Unsupported(
            "replication factor is not applicable to local storage".to_string(),
        ))
    }

    fn storage_type(&self) -> &'static str {
        "local"
    }

    async fn initialize(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StorageError::from_io(e, &self.root.display().to_string()))?;
        info!("Local storage initialized at {}", self.root.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, LocalStorageBackend) {
        let dir = TempDir::new().unwrap();
        let backend = LocalStorageBackend::new(dir.path().join("store"));
        backend.initialize().await.unwrap();
        (dir, backend)
    }

    async fn staged(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_create_directory_is_idempotent() {
        let (_dir, backend) = setup().await;
        backend.create_directory("uploads/invoice").await.unwrap();
        backend.create_directory("uploads/invoice").await.unwrap();

        let status = backend.file_status("uploads/invoice").await.unwrap();
        assert!(status.is_directory());
        assert!(!status.is_file());
    }

    #[tokio::test]
    async fn test_delete_missing_path_is_not_an_error() {
        let (_dir, backend) = setup().await;
        backend.delete_directory("uploads/never-created", true).await.unwrap();
        backend.delete_directory("uploads/never-created", false).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_recursive_delete_of_non_empty_directory_fails() {
        let (dir, backend) = setup().await;
        let src = staged(&dir, "a.pdf", b"%PDF-1.4").await;
        backend.create_directory("uploads/a").await.unwrap();
        backend.upload_file(&src, "uploads/a/a.pdf", true).await.unwrap();

        let err = backend.delete_directory("uploads/a", false).await.unwrap_err();
        assert!(!err.is_not_found());
        assert!(backend.exists("uploads/a/a.pdf").await.unwrap());

        backend.delete_directory("uploads/a", true).await.unwrap();
        assert!(!backend.exists("uploads/a").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_single_file() {
        let (dir, backend) = setup().await;
        let src = staged(&dir, "a.pdf", b"one").await;
        backend.create_directory("uploads/a").await.unwrap();
        backend.upload_file(&src, "uploads/a/a.pdf", true).await.unwrap();

        backend.delete_directory("uploads/a/a.pdf", false).await.unwrap();
        assert!(!backend.exists("uploads/a/a.pdf").await.unwrap());
        assert!(backend.exists("uploads/a").await.unwrap());
    }

    #[tokio::test]
    async fn test_refuses_to_delete_root() {
        let (_dir, backend) = setup().await;
        let err = backend.delete_directory("/", true).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_upload_without_overwrite_keeps_existing_content() {
        let (dir, backend) = setup().await;
        let first = staged(&dir, "first.pdf", b"first").await;
        let second = staged(&dir, "second.pdf", b"second").await;
        backend.create_directory("uploads/doc").await.unwrap();

        backend.upload_file(&first, "uploads/doc/doc.pdf", false).await.unwrap();
        let err = backend
            .upload_file(&second, "uploads/doc/doc.pdf", false)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
        assert_eq!(backend.read_file("uploads/doc/doc.pdf").await.unwrap(), b"first");

        backend.upload_file(&second, "uploads/doc/doc.pdf", true).await.unwrap();
        assert_eq!(backend.read_file("uploads/doc/doc.pdf").await.unwrap(), b"second");

        // no part files left behind
        assert_eq!(backend.list_directory("uploads/doc").await.unwrap(), vec!["doc.pdf"]);
    }

    #[tokio::test]
    async fn test_upload_missing_source_is_not_found() {
        let (dir, backend) = setup().await;
        backend.create_directory("uploads").await.unwrap();
        let err = backend
            .upload_file(&dir.path().join("ghost.pdf"), "uploads/ghost.pdf", true)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_download_and_read_missing_object() {
        let (dir, backend) = setup().await;
        let err = backend
            .download_file("uploads/missing.pdf", &dir.path().join("out.pdf"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(backend.read_file("uploads/missing.pdf").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_download_copies_bytes() {
        let (dir, backend) = setup().await;
        let src = staged(&dir, "in.pdf", b"payload").await;
        backend.create_directory("uploads/in").await.unwrap();
        backend.upload_file(&src, "uploads/in/in.pdf", true).await.unwrap();

        let out = dir.path().join("out.pdf");
        backend.download_file("uploads/in/in.pdf", &out).await.unwrap();
        assert_eq!(fs::read(&out).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_rename_semantics() {
        let (_dir, backend) = setup().await;
        let err = backend.rename("nope.txt", "other.txt").await.unwrap_err();
        assert!(err.is_not_found());

        backend.append_to_file("a.txt", b"a").await.unwrap();
        backend.append_to_file("b.txt", b"b").await.unwrap();
        backend.rename("a.txt", "b.txt").await.unwrap();
        assert_eq!(backend.read_file("b.txt").await.unwrap(), b"a");
        assert!(!backend.exists("a.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_append_creates_then_appends() {
        let (_dir, backend) = setup().await;
        backend.append_to_file("log.txt", b"Hello, ").await.unwrap();
        backend.append_to_file("log.txt", b"world!").await.unwrap();
        assert_eq!(backend.read_file("log.txt").await.unwrap(), b"Hello, world!");

        let status = backend.file_status("log.txt").await.unwrap();
        assert_eq!(status.size, 13);
        assert!(status.is_file());
        assert!(status.modified_at.is_some());
    }

    #[tokio::test]
    async fn test_set_replication_is_unsupported() {
        let (_dir, backend) = setup().await;
        backend.append_to_file("x.txt", b"x").await.unwrap();
        let err = backend.set_replication("x.txt", 3).await.unwrap_err();
        assert!(matches!(err, StorageError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_paths_cannot_escape_root() {
        let (_dir, backend) = setup().await;
        let err = backend.read_file("../outside.txt").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_exists_and_status_for_missing_path() {
        let (_dir, backend) = setup().await;
        assert!(!backend.exists("uploads/none").await.unwrap());
        assert!(backend.file_status("uploads/none").await.unwrap_err().is_not_found());
    }
}
