//! Entry point for everything that stores, finds, fetches or removes records

use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::RecordStore;
use crate::errors::{DocumentError, DocumentResult};
use crate::models::{Metadata, ReconciliationReport, Record, RecordFilter};
use crate::services::deletion_coordinator::DeletionCoordinator;
use crate::services::path_locks::PathLocks;
use crate::services::staging::StagedFile;
use crate::services::upload_coordinator::{UploadCoordinator, UploadRequest};
use crate::storage::layout::StorageLayout;
use crate::storage::StorageBackend;

pub struct DocumentService {
    storage: Arc<dyn StorageBackend>,
    records: Arc<dyn RecordStore>,
    uploads: UploadCoordinator,
    deletions: Arc<DeletionCoordinator>,
}

impl DocumentService {
    pub fn new(storage: Arc<dyn StorageBackend>, records: Arc<dyn RecordStore>, layout: StorageLayout) -> Self {
        let locks = PathLocks::new();
        let deletions = Arc::new(DeletionCoordinator::new(
            Arc::clone(&storage),
            Arc::clone(&records),
            locks.clone(),
        ));
        let uploads = UploadCoordinator::new(
            Arc::clone(&storage),
            Arc::clone(&records),
            locks,
            layout,
            Arc::clone(&deletions),
        );

        Self {
            storage,
            records,
            uploads,
            deletions,
        }
    }

    pub fn storage_type(&self) -> &'static str {
        self.storage.storage_type()
    }

    pub async fn upload_document(
        &self,
        parent_id: Option<Uuid>,
        display_name: &str,
        metadata: Metadata,
        staged: StagedFile,
    ) -> DocumentResult<Record> {
        let mut request = UploadRequest::new(staged, display_name).with_metadata(metadata);
        request.parent_id = parent_id;
        self.upload(request).await
    }

    pub async fn upload(&self, request: UploadRequest) -> DocumentResult<Record> {
        self.uploads.upload(request).await
    }

    pub async fn list_records(&self, filter: &RecordFilter) -> DocumentResult<Vec<Record>> {
        self.records.list_records(filter).await
    }

    pub async fn get_record(&self, id: Uuid) -> DocumentResult<Record> {
        self.records
            .get_record(id)
            .await?
            .ok_or_else(|| DocumentError::NotFound(format!("record {}", id)))
    }

    /// Copy a record's stored bytes to a local file
    pub async fn fetch_to_local(&self, id: Uuid, destination: &Path) -> DocumentResult<()> {
        let record = self.get_record(id).await?;
        match self.storage.download_file(&record.stored_path, destination).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                error!("Record {} has no stored bytes at {}", record.id, record.stored_path);
                Err(DocumentError::Inconsistent(format!(
                    "record {} has no stored bytes at {}",
                    record.id, record.stored_path
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete_record(&self, id: Uuid) -> DocumentResult<Record> {
        self.deletions.delete(id).await
    }

    /// Check that a record's bytes are present in the backend
    pub async fn verify_record(&self, id: Uuid) -> DocumentResult<Record> {
        let record = self.get_record(id).await?;
        if self.storage.exists(&record.stored_path).await? {
            Ok(record)
        } else {
            Err(DocumentError::Inconsistent(format!(
                "record {} has no stored bytes at {}",
                record.id, record.stored_path
            )))
        }
    }

    /// Compare every record against the backend and report the ones whose
    /// bytes are missing
    pub async fn reconcile(&self) -> DocumentResult<ReconciliationReport> {
        let records = self.records.list_records(&RecordFilter::default()).await?;
        let checked = records.len();
        let mut missing = Vec::new();

        for record in records {
            if !self.storage.exists(&record.stored_path).await? {
                let inconsistency = DocumentError::Inconsistent(format!(
                    "{} {} has no stored bytes at {}",
                    record.kind, record.id, record.stored_path
                ));
                warn!("{}", inconsistency);
                missing.push(record);
            }
        }

        info!(
            "Reconciliation checked {} records against {} storage, {} missing",
            checked,
            self.storage.storage_type(),
            missing.len()
        );
        Ok(ReconciliationReport { checked, missing })
    }
}
