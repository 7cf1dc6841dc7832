use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

use super::{Database, RecordStore};
use crate::errors::{DocumentError, DocumentResult};
use crate::models::{metadata_text, Metadata, NewRecord, Record, RecordFilter, RecordKind};

fn columns(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::Document => "id, original_filename, stored_path, metadata, uploaded_at",
        RecordKind::Attachment => "id, document_id, original_filename, stored_path, metadata, uploaded_at",
    }
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn record_from_row(row: &SqliteRow, kind: RecordKind) -> DocumentResult<Record> {
    let id: Uuid = row.try_get("id")?;
    let raw_metadata: String = row.try_get("metadata")?;
    let metadata: Metadata = serde_json::from_str(&raw_metadata).map_err(|e| {
        DocumentError::Inconsistent(format!("metadata of {} {} is not a JSON object: {}", kind, id, e))
    })?;

    let parent_id = match kind {
        RecordKind::Document => None,
        RecordKind::Attachment => Some(row.try_get("document_id")?),
    };

    Ok(Record {
        id,
        kind,
        parent_id,
        original_filename: row.try_get("original_filename")?,
        stored_path: row.try_get("stored_path")?,
        metadata,
        uploaded_at: row.try_get("uploaded_at")?,
    })
}

impl Database {
    pub async fn get_record_by_id(&self, id: Uuid) -> DocumentResult<Option<Record>> {
        for kind in [RecordKind::Document, RecordKind::Attachment] {
            let sql = format!("SELECT {} FROM {} WHERE id = ?", columns(kind), kind.table());
            let row = self
                .with_retry(|| sqlx::query(&sql).bind(id).fetch_optional(&self.pool))
                .await?;
            if let Some(row) = row {
                return record_from_row(&row, kind).map(Some);
            }
        }
        Ok(None)
    }

    pub async fn get_record_by_stored_path(
        &self,
        kind: RecordKind,
        stored_path: &str,
    ) -> DocumentResult<Option<Record>> {
        let sql = format!("SELECT {} FROM {} WHERE stored_path = ?", columns(kind), kind.table());
        let row = self
            .with_retry(|| sqlx::query(&sql).bind(stored_path).fetch_optional(&self.pool))
            .await?;
        row.map(|row| record_from_row(&row, kind)).transpose()
    }

    pub async fn get_documents_in_directory(&self, directory: &str) -> DocumentResult<Vec<Record>> {
        let prefix = format!("{}/", directory);
        let pattern = format!("{}%", escape_like(&prefix));
        let sql = format!(
            "SELECT {} FROM documents WHERE stored_path LIKE ? ESCAPE '\\' ORDER BY uploaded_at",
            columns(RecordKind::Document)
        );
        let rows = self
            .with_retry(|| sqlx::query(&sql).bind(&pattern).fetch_all(&self.pool))
            .await?;

        let mut documents = Vec::new();
        for row in &rows {
            let record = record_from_row(row, RecordKind::Document)?;
            // LIKE ignores ASCII case and matches nested paths, so check exactly
            let direct_child = record
                .stored_path
                .strip_prefix(&prefix)
                .map(|rest| !rest.contains('/'))
                .unwrap_or(false);
            if direct_child {
                documents.push(record);
            }
        }
        Ok(documents)
    }

    /// Insert a record in its own transaction
    pub async fn create_record(&self, new_record: NewRecord) -> DocumentResult<Record> {
        let record = new_record.into_record();
        let metadata = serde_json::to_string(&record.metadata)
            .map_err(|e| DocumentError::InvalidInput(format!("metadata cannot be stored: {}", e)))?;

        let pool = &self.pool;
        let row = &record;
        let metadata = metadata.as_str();
        self.with_retry(|| async move {
            let mut tx = pool.begin().await?;
            match row.kind {
                RecordKind::Document => {
                    sqlx::query(
                        r#"INSERT INTO documents (id, original_filename, stored_path, metadata, uploaded_at)
                           VALUES (?, ?, ?, ?, ?)"#,
                    )
                    .bind(row.id)
                    .bind(&row.original_filename)
                    .bind(&row.stored_path)
                    .bind(metadata)
                    .bind(row.uploaded_at)
                    .execute(&mut *tx)
                    .await?;
                }
                RecordKind::Attachment => {
                    sqlx::query(
                        r#"INSERT INTO attachments (id, document_id, original_filename, stored_path, metadata, uploaded_at)
                           VALUES (?, ?, ?, ?, ?, ?)"#,
                    )
                    .bind(row.id)
                    .bind(row.parent_id)
                    .bind(&row.original_filename)
                    .bind(&row.stored_path)
                    .bind(metadata)
                    .bind(row.uploaded_at)
                    .execute(&mut *tx)
                    .await?;
                }
            }
            tx.commit().await
        })
        .await?;

        info!("Created {} record {} at {}", record.kind, record.id, record.stored_path);
        Ok(record)
    }

    pub async fn list_records_filtered(&self, filter: &RecordFilter) -> DocumentResult<Vec<Record>> {
        if filter.meta_value.is_some() && filter.meta_key.is_none() {
            return Err(DocumentError::InvalidInput(
                "meta_value requires meta_key".to_string(),
            ));
        }

        let kinds = match (filter.kind, filter.parent_id) {
            // documents never have a parent
            (Some(RecordKind::Document), Some(_)) => Vec::new(),
            (_, Some(_)) => vec![RecordKind::Attachment],
            (Some(kind), None) => vec![kind],
            (None, None) => vec![RecordKind::Document, RecordKind::Attachment],
        };

        let mut records = Vec::new();
        for kind in kinds {
            records.extend(self.list_kind(kind, filter).await?);
        }

        if let (Some(key), Some(expected)) = (&filter.meta_key, &filter.meta_value) {
            records.retain(|record| {
                record
                    .metadata
                    .get(key)
                    .map(|value| metadata_text(value) == *expected)
                    .unwrap_or(false)
            });
        }

        records.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at));
        debug!("Listed {} records", records.len());
        Ok(records)
    }

    async fn list_kind(&self, kind: RecordKind, filter: &RecordFilter) -> DocumentResult<Vec<Record>> {
        let table = kind.table();
        let mut sql = format!("SELECT {} FROM {}", columns(kind), table);
        let mut conditions = Vec::new();

        let name_pattern = filter.name.as_ref().map(|name| format!("%{}%", escape_like(name)));
        if name_pattern.is_some() {
            conditions.push("original_filename LIKE ? ESCAPE '\\'".to_string());
        }
        let parent_id = match kind {
            RecordKind::Attachment => filter.parent_id,
            RecordKind::Document => None,
        };
        if parent_id.is_some() {
            conditions.push("document_id = ?".to_string());
        }
        if filter.meta_key.is_some() {
            conditions.push(format!(
                "EXISTS (SELECT 1 FROM json_each({}.metadata) WHERE json_each.key = ?)",
                table
            ));
        }

        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY uploaded_at");

        let rows = self
            .with_retry(|| {
                let mut query = sqlx::query(&sql);
                if let Some(pattern) = &name_pattern {
                    query = query.bind(pattern);
                }
                if let Some(parent_id) = parent_id {
                    query = query.bind(parent_id);
                }
                if let Some(key) = &filter.meta_key {
                    query = query.bind(key);
                }
                query.fetch_all(&self.pool)
            })
            .await?;

        rows.iter().map(|row| record_from_row(row, kind)).collect()
    }

    pub async fn delete_record_row(&self, record: &Record) -> DocumentResult<bool> {
        let sql = format!("DELETE FROM {} WHERE id = ?", record.kind.table());
        let pool = &self.pool;
        let sql = sql.as_str();
        let id = record.id;

        let affected = self
            .with_retry(|| async move {
                let mut tx = pool.begin().await?;
                let result = sqlx::query(sql).bind(id).execute(&mut *tx).await?;
                tx.commit().await?;
                Ok(result.rows_affected())
            })
            .await?;

        if affected > 0 {
            info!("Deleted {} record {}", record.kind, record.id);
        }
        Ok(affected > 0)
    }
}

#[async_trait]
impl RecordStore for Database {
    async fn get_record(&self, id: Uuid) -> DocumentResult<Option<Record>> {
        self.get_record_by_id(id).await
    }

    async fn find_by_stored_path(&self, kind: RecordKind, stored_path: &str) -> DocumentResult<Option<Record>> {
        self.get_record_by_stored_path(kind, stored_path).await
    }

    async fn find_documents_in_directory(&self, directory: &str) -> DocumentResult<Vec<Record>> {
        self.get_documents_in_directory(directory).await
    }

    async fn insert_record(&self, record: NewRecord) -> DocumentResult<Record> {
        self.create_record(record).await
    }

    async fn list_records(&self, filter: &RecordFilter) -> DocumentResult<Vec<Record>> {
        self.list_records_filtered(filter).await
    }

    async fn delete_record(&self, record: &Record) -> DocumentResult<bool> {
        self.delete_record_row(record).await
    }
}
