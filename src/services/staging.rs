//! Local staging of incoming uploads
//!
//! Bytes are written to the staging directory before anything touches the
//! backend. A [`StagedFile`] owns its file and removes it when dropped, so no
//! exit path of an upload leaves staging debris behind.

use futures_util::{Stream, StreamExt};
use std::fmt::Display;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::errors::{DocumentError, DocumentResult};

#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
    allowed_extensions: Vec<String>,
    max_bytes: u64,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>, allowed_extensions: Vec<String>, max_bytes: u64) -> Self {
        Self {
            dir: dir.into(),
            allowed_extensions: allowed_extensions
                .into_iter()
                .map(|ext| ext.to_ascii_lowercase())
                .collect(),
            max_bytes,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.tmp_directory,
            config.allowed_file_types.clone(),
            config.max_file_size_bytes(),
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub async fn initialize(&self) -> DocumentResult<()> {
        fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    /// Reject file names whose extension is not on the allow-list
    pub fn validate_filename(&self, filename: &str) -> DocumentResult<()> {
        if filename.trim().is_empty() {
            return Err(DocumentError::InvalidInput("no file selected".to_string()));
        }
        let extension = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();

        if !self.allowed_extensions.iter().any(|allowed| *allowed == extension) {
            return Err(DocumentError::InvalidInput(format!(
                "unsupported file type for {}, allowed: {}",
                filename,
                self.allowed_extensions.join(", ")
            )));
        }
        Ok(())
    }

    fn staging_path(&self, filename: &str) -> PathBuf {
        self.dir.join(format!("{}_{}", Uuid::new_v4(), base_name(filename)))
    }

    /// Stage an upload arriving as a stream of chunks, enforcing the size
    /// ceiling while writing.
    pub async fn stage_stream<S, B, E>(&self, filename: &str, stream: S) -> DocumentResult<StagedFile>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
    {
        self.validate_filename(filename)?;
        fs::create_dir_all(&self.dir).await?;

        let path = self.staging_path(filename);
        let mut file = fs::File::create(&path).await?;
        let mut staged = StagedFile::new(path, filename);
        let mut stream = std::pin::pin!(stream);

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                DocumentError::InvalidInput(format!("upload of {} was interrupted: {}", filename, e))
            })?;
            let chunk = chunk.as_ref();
            staged.size += chunk.len() as u64;
            if staged.size > self.max_bytes {
                return Err(self.too_large(filename));
            }
            file.write_all(chunk).await?;
        }

        file.flush().await?;
        file.sync_all().await?;
        debug!("Staged {} ({} bytes) at {}", filename, staged.size, staged.path.display());
        Ok(staged)
    }

    pub async fn stage_bytes(&self, filename: &str, data: &[u8]) -> DocumentResult<StagedFile> {
        self.validate_filename(filename)?;
        if data.len() as u64 > self.max_bytes {
            return Err(self.too_large(filename));
        }
        fs::create_dir_all(&self.dir).await?;

        let path = self.staging_path(filename);
        let mut staged = StagedFile::new(path, filename);
        fs::write(&staged.path, data).await?;
        staged.size = data.len() as u64;
        Ok(staged)
    }

    /// Reserve a uniquely named scratch path for a download
    pub fn scratch_path(&self, filename: &str) -> PathBuf {
        self.staging_path(filename)
    }

    fn too_large(&self, filename: &str) -> DocumentError {
        DocumentError::InvalidInput(format!(
            "{} exceeds the maximum upload size of {} bytes",
            filename, self.max_bytes
        ))
    }
}

/// Final component of a client-supplied file name, which may carry the
/// client's directory path
pub fn base_name(filename: &str) -> &str {
    filename.rsplit(['/', '\\']).next().unwrap_or(filename)
}

/// A fully written local file awaiting upload
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    original_name: String,
    size: u64,
    removed: bool,
}

impl StagedFile {
    fn new(path: PathBuf, original_name: &str) -> Self {
        Self {
            path,
            original_name: original_name.to_string(),
            size: 0,
            removed: false,
        }
    }

    /// Take ownership of an existing local file; it is removed once the
    /// upload finishes.
    pub async fn adopt(path: impl Into<PathBuf>, original_name: &str) -> io::Result<Self> {
        let path = path.into();
        let metadata = fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        let mut staged = Self::new(path, original_name);
        staged.size = metadata.len();
        Ok(staged)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Delete the staged file now. An already missing file is not an error.
    pub async fn remove(mut self) -> io::Result<()> {
        self.removed = true;
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed staged file {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove staged file {}: {}", self.path.display(), e),
        }
    }
}
