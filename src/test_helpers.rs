/*!
 * Test Helpers and Utilities
 *
 * Builds throwaway environments (SQLite file, local storage root, staging
 * directory) inside a temp dir, plus wrappers that inject storage and
 * database failures on demand.
 */

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::{
    config::{Config, FileSystem},
    db::{Database, RecordStore},
    errors::{DocumentError, DocumentResult},
    models::{NewRecord, Record, RecordFilter, RecordKind},
    services::{DocumentService, StagedFile, StagingArea},
    storage::{
        layout::StorageLayout, local::LocalStorageBackend, FileStatus, StorageBackend, StorageError,
        StorageResult,
    },
    AppState,
};

/// Creates a test configuration rooted in `root`
pub fn create_test_config(root: &Path) -> Config {
    Config {
        database_url: format!("sqlite://{}", root.join("test.db").display()),
        server_address: "127.0.0.1:0".to_string(),
        parent_directory: "uploads".to_string(),
        tmp_directory: root.join("tmp").to_string_lossy().into_owned(),
        log_directory: root.join("logs").to_string_lossy().into_owned(),
        max_file_size_mb: 1,
        allowed_file_types: vec!["pdf".to_string(), "png".to_string(), "jpg".to_string(), "jpeg".to_string()],
        file_system: FileSystem::Local,
        local_storage_root: root.join("storage").to_string_lossy().into_owned(),
        hadoop_namenode_url: None,
        hadoop_username: None,
        hadoop_base_path: None,
        hadoop_max_retries: 0,
        backend_timeout_seconds: 5,
    }
}

pub struct TestContext {
    pub dir: TempDir,
    pub config: Config,
    pub db: Database,
    pub storage: Arc<LocalStorageBackend>,
    pub staging: Arc<StagingArea>,
    pub layout: StorageLayout,
}

impl TestContext {
    pub async fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let config = create_test_config(dir.path());

        let db = Database::new(&config.database_url)
            .await
            .expect("Failed to open test database");
        db.migrate().await.expect("Failed to migrate test database");

        let storage = Arc::new(LocalStorageBackend::new(&config.local_storage_root));
        storage.initialize().await.expect("Failed to initialize storage");

        let staging = Arc::new(StagingArea::from_config(&config));
        staging.initialize().await.expect("Failed to create staging dir");

        let layout = StorageLayout::new(&config.parent_directory).expect("valid layout root");

        Self {
            dir,
            config,
            db,
            storage,
            staging,
            layout,
        }
    }

    pub fn storage_root(&self) -> PathBuf {
        PathBuf::from(&self.config.local_storage_root)
    }

    /// Whether the local backend holds an object at `stored_path`
    pub fn blob_exists(&self, stored_path: &str) -> bool {
        self.storage_root().join(stored_path).exists()
    }

    pub fn blob_content(&self, stored_path: &str) -> Vec<u8> {
        std::fs::read(self.storage_root().join(stored_path)).expect("stored blob should be readable")
    }

    pub fn service(&self) -> DocumentService {
        self.service_with(self.storage.clone(), Arc::new(self.db.clone()))
    }

    pub fn service_with(&self, storage: Arc<dyn StorageBackend>, records: Arc<dyn RecordStore>) -> DocumentService {
        DocumentService::new(storage, records, self.layout.clone())
    }

    pub async fn stage(&self, name: &str, data: &[u8]) -> StagedFile {
        self.staging
            .stage_bytes(name, data)
            .await
            .expect("Failed to stage test file")
    }

    /// Number of files left in the staging directory
    pub fn staged_file_count(&self) -> usize {
        std::fs::read_dir(self.staging.dir())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    pub fn app_state(&self) -> Arc<AppState> {
        self.app_state_with(Arc::new(self.service()))
    }

    pub fn app_state_with(&self, documents: Arc<DocumentService>) -> Arc<AppState> {
        Arc::new(AppState {
            documents,
            staging: self.staging.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    NotFound,
    PermissionDenied,
    Unavailable,
}

impl Fault {
    fn to_error(self, path: &str) -> StorageError {
        match self {
            Fault::NotFound => StorageError::NotFound(path.to_string()),
            Fault::PermissionDenied => StorageError::PermissionDenied(path.to_string()),
            Fault::Unavailable => StorageError::Unavailable(format!("injected outage at {}", path)),
        }
    }
}

/// Handle on a held backend call; see [`FaultInjectingBackend::hold`]
#[derive(Clone, Default)]
pub struct Gate {
    entered: Arc<Notify>,
    released: Arc<Notify>,
}

impl Gate {
    /// Wait until the held call has run against the inner backend
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let the held call return to its caller
    pub fn release(&self) {
        self.released.notify_one();
    }
}

/// Backend wrapper failing chosen operations until healed, or parking them
/// after they ran until released
pub struct FaultInjectingBackend {
    inner: Arc<dyn StorageBackend>,
    faults: Mutex<HashMap<&'static str, Fault>>,
    gates: Mutex<HashMap<&'static str, Gate>>,
}

impl FaultInjectingBackend {
    pub fn new(inner: Arc<dyn StorageBackend>) -> Self {
        Self {
            inner,
            faults: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Park the next call of `operation` once the inner backend has
    /// completed it, until the returned gate is released
    pub fn hold(&self, operation: &'static str) -> Gate {
        let gate = Gate::default();
        self.gates.lock().unwrap().insert(operation, gate.clone());
        gate
    }

    async fn pass<T>(&self, operation: &'static str, result: StorageResult<T>) -> StorageResult<T> {
        let gate = self.gates.lock().unwrap().remove(operation);
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.released.notified().await;
        }
        result
    }

    /// Make every call of `operation` (a trait method name) fail
    pub fn fail(&self, operation: &'static str, fault: Fault) {
        self.faults.lock().unwrap().insert(operation, fault);
    }

    pub fn heal(&self, operation: &'static str) {
        self.faults.lock().unwrap().remove(operation);
    }

    fn check(&self, operation: &'static str, path: &str) -> StorageResult<()> {
        match self.faults.lock().unwrap().get(operation) {
            Some(fault) => Err(fault.to_error(path)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl StorageBackend for FaultInjectingBackend {
    async fn create_directory(&self, path: &str) -> StorageResult<()> {
        self.check("create_directory", path)?;
        let result = self.inner.create_directory(path).await;
        self.pass("create_directory", result).await
    }

    async fn delete_directory(&self, path: &str, recursive: bool) -> StorageResult<()> {
        self.check("delete_directory", path)?;
        let result = self.inner.delete_directory(path, recursive).await;
        self.pass("delete_directory", result).await
    }

    async fn upload_file(&self, local_path: &Path, storage_path: &str, overwrite: bool) -> StorageResult<()> {
        self.check("upload_file", storage_path)?;
        let result = self.inner.upload_file(local_path, storage_path, overwrite).await;
        self.pass("upload_file", result).await
    }

    async fn download_file(&self, storage_path: &str, local_path: &Path) -> StorageResult<()> {
        self.check("download_file", storage_path)?;
        let result = self.inner.download_file(storage_path, local_path).await;
        self.pass("download_file", result).await
    }

    async fn read_file(&self, path: &str) -> StorageResult<Vec<u8>> {
        self.check("read_file", path)?;
        let result = self.inner.read_file(path).await;
        self.pass("read_file", result).await
    }

    async fn list_directory(&self, path: &str) -> StorageResult<Vec<String>> {
        self.check("list_directory", path)?;
        let result = self.inner.list_directory(path).await;
        self.pass("list_directory", result).await
    }

    async fn file_status(&self, path: &str) -> StorageResult<FileStatus> {
        self.check("file_status", path)?;
        let result = self.inner.file_status(path).await;
        self.pass("file_status", result).await
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        self.check("exists", path)?;
        let result = self.inner.exists(path).await;
        self.pass("exists", result).await
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> StorageResult<()> {
        self.check("rename", old_path)?;
        let result = self.inner.rename(old_path, new_path).await;
        self.pass("rename", result).await
    }

    async fn append_to_file(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        self.check("append_to_file", path)?;
        let result = self.inner.append_to_file(path, data).await;
        self.pass("append_to_file", result).await
    }

    async fn set_replication(&self, path: &str, factor: u16) -> StorageResult<()> {
        self.check("set_replication", path)?;
        let result = self.inner.set_replication(path, factor).await;
        self.pass("set_replication", result).await
    }

    fn storage_type(&self) -> &'static str {
        self.inner.storage_type()
    }

    async fn initialize(&self) -> StorageResult<()> {
        self.inner.initialize().await
    }
}

/// Record store wrapper whose inserts and deletes can be switched off
pub struct FailingRecordStore {
    inner: Database,
    fail_inserts: AtomicBool,
    fail_deletes: AtomicBool,
}

impl FailingRecordStore {
    pub fn new(inner: Database) -> Self {
        Self {
            inner,
            fail_inserts: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
        }
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    fn injected() -> DocumentError {
        DocumentError::Database(sqlx::Error::Protocol("injected database failure".to_string()))
    }
}

#[async_trait]
impl RecordStore for FailingRecordStore {
    async fn get_record(&self, id: Uuid) -> DocumentResult<Option<Record>> {
        self.inner.get_record(id).await
    }

    async fn find_by_stored_path(&self, kind: RecordKind, stored_path: &str) -> DocumentResult<Option<Record>> {
        self.inner.find_by_stored_path(kind, stored_path).await
    }

    async fn find_documents_in_directory(&self, directory: &str) -> DocumentResult<Vec<Record>> {
        self.inner.find_documents_in_directory(directory).await
    }

    async fn insert_record(&self, record: NewRecord) -> DocumentResult<Record> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(Self::injected());
        }
        self.inner.insert_record(record).await
    }

    async fn list_records(&self, filter: &RecordFilter) -> DocumentResult<Vec<Record>> {
        self.inner.list_records(filter).await
    }

    async fn delete_record(&self, record: &Record) -> DocumentResult<bool> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Self::injected());
        }
        self.inner.delete_record(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_context_layout() {
        let ctx = TestContext::new().await;
        assert!(ctx.storage_root().is_dir());
        assert!(ctx.staging.dir().is_dir());
        assert_eq!(ctx.staged_file_count(), 0);

        let staged = ctx.stage("a.pdf", b"data").await;
        assert_eq!(ctx.staged_file_count(), 1);
        drop(staged);
        assert_eq!(ctx.staged_file_count(), 0);
    }

    #[tokio::test]
    async fn test_fault_injection_can_be_healed() {
        let ctx = TestContext::new().await;
        let backend = FaultInjectingBackend::new(ctx.storage.clone());

        backend.fail("exists", Fault::Unavailable);
        assert!(backend.exists("uploads").await.unwrap_err().is_unavailable());

        backend.heal("exists");
        assert!(!backend.exists("uploads").await.unwrap());
    }
}
