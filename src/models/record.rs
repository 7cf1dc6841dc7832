use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use utoipa::ToSchema;

/// Free-form key/value metadata attached to a record
pub type Metadata = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
pub enum RecordKind {
    #[serde(rename = "document")]
    Document,
    #[serde(rename = "attachment")]
    Attachment,
}

impl RecordKind {
    pub fn table(&self) -> &'static str {
        match self {
            RecordKind::Document => "documents",
            RecordKind::Attachment => "attachments",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKind::Document => write!(f, "document"),
            RecordKind::Attachment => write!(f, "attachment"),
        }
    }
}

/// A stored document or attachment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Record {
    pub id: Uuid,
    pub kind: RecordKind,
    /// Owning document, set for attachments only
    pub parent_id: Option<Uuid>,
    pub original_filename: String,
    pub stored_path: String,
    #[schema(value_type = Object)]
    pub metadata: Metadata,
    pub uploaded_at: DateTime<Utc>,
}

impl Record {
    pub fn is_document(&self) -> bool {
        self.kind == RecordKind::Document
    }
}

/// Row about to be inserted
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub kind: RecordKind,
    pub parent_id: Option<Uuid>,
    pub original_filename: String,
    pub stored_path: String,
    pub metadata: Metadata,
}

impl NewRecord {
    pub fn into_record(self) -> Record {
        Record {
            id: Uuid::new_v4(),
            kind: self.kind,
            parent_id: self.parent_id,
            original_filename: self.original_filename,
            stored_path: self.stored_path,
            metadata: self.metadata,
            uploaded_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub kind: Option<RecordKind>,
    /// Case-insensitive substring of the original file name
    pub name: Option<String>,
    pub meta_key: Option<String>,
    /// Compared against the text form of the value under `meta_key`
    pub meta_value: Option<String>,
    /// Restrict to the attachments of this document
    pub parent_id: Option<Uuid>,
}

impl RecordFilter {
    pub fn documents() -> Self {
        Self {
            kind: Some(RecordKind::Document),
            ..Default::default()
        }
    }

    pub fn attachments_of(parent_id: Uuid) -> Self {
        Self {
            kind: Some(RecordKind::Attachment),
            parent_id: Some(parent_id),
            ..Default::default()
        }
    }
}

/// Text form used when comparing metadata values in filters
pub fn metadata_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReconciliationReport {
    pub checked: usize,
    /// Records whose stored bytes are missing from the backend
    pub missing: Vec<Record>,
}

impl ReconciliationReport {
    pub fn is_consistent(&self) -> bool {
        self.missing.is_empty()
    }
}
