use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::RecordStore;
use crate::errors::{DocumentError, DocumentResult};
use crate::models::{Metadata, NewRecord, Record, RecordKind};
use crate::services::deletion_coordinator::DeletionCoordinator;
use crate::services::path_locks::PathLocks;
use crate::services::staging::StagedFile;
use crate::storage::layout::{document_directory_of, StorageLayout};
use crate::storage::{split_parent, StorageBackend};

pub struct UploadRequest {
    pub staged: StagedFile,
    pub display_name: String,
    /// Owning document when uploading an attachment
    pub parent_id: Option<Uuid>,
    pub metadata: Metadata,
    pub replace_existing: bool,
}

impl UploadRequest {
    pub fn new(staged: StagedFile, display_name: impl Into<String>) -> Self {
        Self {
            staged,
            display_name: display_name.into(),
            parent_id: None,
            metadata: Metadata::new(),
            replace_existing: true,
        }
    }

    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn replace_existing(mut self, replace: bool) -> Self {
        self.replace_existing = replace;
        self
    }
}

/// Where a new record goes and which lock guards it
struct Placement {
    kind: RecordKind,
    stored_path: String,
    identity: String,
}

/// Commits staged files to the backend and records them in the database
pub struct UploadCoordinator {
    storage: Arc<dyn StorageBackend>,
    records: Arc<dyn RecordStore>,
    locks: PathLocks,
    layout: StorageLayout,
    deletion: Arc<DeletionCoordinator>,
}

impl UploadCoordinator {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        records: Arc<dyn RecordStore>,
        locks: PathLocks,
        layout: StorageLayout,
        deletion: Arc<DeletionCoordinator>,
    ) -> Self {
        Self {
            storage,
            records,
            locks,
            layout,
            deletion,
        }
    }

    pub async fn upload(&self, request: UploadRequest) -> DocumentResult<Record> {
        let UploadRequest {
            staged,
            display_name,
            parent_id,
            metadata,
            replace_existing,
        } = request;

        let result = self
            .commit(&staged, &display_name, parent_id, metadata, replace_existing)
            .await;

        let staged_path = staged.path().to_path_buf();
        if let Err(e) = staged.remove().await {
            error!("Failed to remove staged file {}: {}", staged_path.display(), e);
        }

        result
    }

    async fn place(&self, display_name: &str, parent_id: Option<Uuid>) -> DocumentResult<Placement> {
        StorageLayout::validate_name(display_name)?;

        match parent_id {
            None => Ok(Placement {
                kind: RecordKind::Document,
                stored_path: self.layout.document_path(display_name)?,
                identity: self.layout.document_directory(display_name)?,
            }),
            Some(parent_id) => {
                let parent = self
                    .records
                    .get_record(parent_id)
                    .await?
                    .ok_or_else(|| DocumentError::NotFound(format!("document {}", parent_id)))?;
                if !parent.is_document() {
                    return Err(DocumentError::InvalidInput(format!(
                        "{} is an attachment; attachments belong to documents",
                        parent_id
                    )));
                }
                Ok(Placement {
                    kind: RecordKind::Attachment,
                    stored_path: self.layout.attachment_path(&parent.stored_path, display_name)?,
                    identity: document_directory_of(&parent.stored_path)?,
                })
            }
        }
    }

    /// Existing record with the same identity, if any
    async fn find_existing(&self, placement: &Placement, display_name: &str) -> DocumentResult<Option<Record>> {
        match placement.kind {
            RecordKind::Document => {
                let occupants = self.records.find_documents_in_directory(&placement.identity).await?;
                if let Some(other) = occupants.iter().find(|r| r.stored_path != placement.stored_path) {
                    return Err(DocumentError::AlreadyExists(format!(
                        "{}: directory {} already holds {}",
                        display_name, placement.identity, other.original_filename
                    )));
                }
                Ok(occupants.into_iter().find(|r| r.stored_path == placement.stored_path))
            }
            RecordKind::Attachment => {
                self.records
                    .find_by_stored_path(RecordKind::Attachment, &placement.stored_path)
                    .await
            }
        }
    }

    async fn commit(
        &self,
        staged: &StagedFile,
        display_name: &str,
        parent_id: Option<Uuid>,
        metadata: Metadata,
        replace_existing: bool,
    ) -> DocumentResult<Record> {
        let placement = self.place(display_name, parent_id).await?;
        let _guard = self.locks.lock(&placement.identity).await;

        // the parent may have been deleted while we waited for its lock
        if let Some(parent_id) = parent_id {
            if self.records.get_record(parent_id).await?.is_none() {
                return Err(DocumentError::NotFound(format!("document {}", parent_id)));
            }
        }

        if let Some(existing) = self.find_existing(&placement, display_name).await? {
            if !replace_existing {
                return Err(DocumentError::AlreadyExists(placement.stored_path));
            }
            info!(
                "Replacing {} {} at {}",
                existing.kind, existing.id, existing.stored_path
            );
            self.deletion.remove_locked(&existing).await?;
        }

        let (directory, _) = split_parent(&placement.stored_path)?;
        self.storage.create_directory(&directory).await?;
        self.storage
            .upload_file(staged.path(), &placement.stored_path, replace_existing)
            .await?;

        let new_record = NewRecord {
            kind: placement.kind,
            parent_id,
            original_filename: display_name.to_string(),
            stored_path: placement.stored_path.clone(),
            metadata,
        };

        match self.records.insert_record(new_record).await {
            Ok(record) => {
                info!(
                    "Uploaded {} {} ({} bytes) to {}",
                    record.kind,
                    record.id,
                    staged.size(),
                    record.stored_path
                );
                Ok(record)
            }
            Err(insert_error) => {
                error!(
                    "Failed to record upload of {}: {}; removing stored bytes",
                    placement.stored_path, insert_error
                );
                self.compensate(&placement.stored_path, insert_error).await
            }
        }
    }

    /// Undo a blob upload whose row could not be written
    async fn compensate(&self, stored_path: &str, cause: DocumentError) -> DocumentResult<Record> {
        match self.storage.delete_directory(stored_path, false).await {
            Ok(()) => Err(cause),
            Err(e) if e.is_not_found() => {
                warn!("Uploaded bytes at {} were already gone", stored_path);
                Err(cause)
            }
            Err(e) => {
                error!(
                    "Orphaned stored bytes at {}: row insert failed ({}) and removal failed ({})",
                    stored_path, cause, e
                );
                Err(DocumentError::Inconsistent(format!(
                    "{} is stored but has no record: insert failed ({}), cleanup failed ({})",
                    stored_path, cause, e
                )))
            }
        }
    }
}
