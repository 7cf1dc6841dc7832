use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::RecordStore;
use crate::errors::{DocumentError, DocumentResult};
use crate::models::{Record, RecordKind};
use crate::services::path_locks::PathLocks;
use crate::storage::layout::{document_directory_of, owning_directory_of};
use crate::storage::StorageBackend;

/// Lock key serializing work on a record: the directory of the document it
/// is, or belongs to. A recursive document delete covers every attachment,
/// so attachments share their document's key.
pub(crate) fn identity_key(record: &Record) -> DocumentResult<String> {
    match record.kind {
        RecordKind::Document => Ok(document_directory_of(&record.stored_path)?),
        RecordKind::Attachment => Ok(owning_directory_of(&record.stored_path)?),
    }
}

/// Removes records together with their stored bytes, backend first
pub struct DeletionCoordinator {
    storage: Arc<dyn StorageBackend>,
    records: Arc<dyn RecordStore>,
    locks: PathLocks,
}

impl DeletionCoordinator {
    pub fn new(storage: Arc<dyn StorageBackend>, records: Arc<dyn RecordStore>, locks: PathLocks) -> Self {
        Self {
            storage,
            records,
            locks,
        }
    }

    pub async fn delete(&self, id: Uuid) -> DocumentResult<Record> {
        let record = self.require(id).await?;
        let _guard = self.locks.lock(&identity_key(&record)?).await;

        // the record may have been replaced or removed while we waited
        let record = self.require(id).await?;
        self.remove_locked(&record).await?;
        Ok(record)
    }

    async fn require(&self, id: Uuid) -> DocumentResult<Record> {
        self.records
            .get_record(id)
            .await?
            .ok_or_else(|| DocumentError::NotFound(format!("record {}", id)))
    }

    /// Delete the stored bytes, then the row. The caller must hold the
    /// record's identity lock.
    pub(crate) async fn remove_locked(&self, record: &Record) -> DocumentResult<()> {
        let (target, recursive) = match record.kind {
            RecordKind::Document => (document_directory_of(&record.stored_path)?, true),
            RecordKind::Attachment => (record.stored_path.clone(), false),
        };

        match self.storage.delete_directory(&target, recursive).await {
            Ok(()) => info!("Deleted stored {} at {}", record.kind, target),
            Err(e) if e.is_not_found() => {
                warn!("Stored {} at {} was already missing", record.kind, target);
            }
            Err(e) => {
                error!(
                    "Failed to delete {} {} from {} storage ({}): {}",
                    record.kind,
                    record.id,
                    self.storage.storage_type(),
                    e.kind(),
                    e
                );
                return Err(e.into());
            }
        }

        if !self.records.delete_record(record).await? {
            warn!("Row for {} {} was already gone", record.kind, record.id);
        }
        Ok(())
    }
}
