use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::info;
use utoipa::IntoParams;
use uuid::Uuid;

use super::{download_response, read_upload, require_kind, DeleteResponse, ErrorResponse};
use crate::errors::DocumentResult;
use crate::models::{Record, RecordFilter, RecordKind};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_attachments))
        .route("/download/{id}", get(download_attachment))
        .route("/{id}", post(upload_attachment).get(get_attachment).delete(delete_attachment))
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ListAttachmentsQuery {
    /// Only attachments of this document
    pub pdf_id: Option<Uuid>,
    pub name: Option<String>,
    pub meta_key: Option<String>,
    pub meta_value: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/attachments/{pdf_id}",
    tag = "attachments",
    params(("pdf_id" = Uuid, Path, description = "Owning document ID")),
    request_body(content = super::UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Attachment stored", body = Record),
        (status = 400, description = "Missing file, bad metadata, disallowed type or too large", body = ErrorResponse),
        (status = 404, description = "No such document", body = ErrorResponse),
        (status = 503, description = "Storage backend unavailable", body = ErrorResponse)
    )
)]
pub async fn upload_attachment(
    State(state): State<Arc<AppState>>,
    Path(pdf_id): Path<Uuid>,
    multipart: Multipart,
) -> DocumentResult<(StatusCode, Json<Record>)> {
    let (staged, filename, metadata) = read_upload(&state, multipart).await?;
    info!("Attachment upload received for {}: {} ({} bytes)", pdf_id, filename, staged.size());

    let record = state
        .documents
        .upload_document(Some(pdf_id), &filename, metadata, staged)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

#[utoipa::path(
    get,
    path = "/api/attachments",
    tag = "attachments",
    params(ListAttachmentsQuery),
    responses(
        (status = 200, description = "Matching attachments, oldest first", body = Vec<Record>),
        (status = 400, description = "meta_value given without meta_key", body = ErrorResponse)
    )
)]
pub async fn list_attachments(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListAttachmentsQuery>,
) -> DocumentResult<Json<Vec<Record>>> {
    let filter = RecordFilter {
        kind: Some(RecordKind::Attachment),
        parent_id: query.pdf_id,
        name: query.name.filter(|n| !n.is_empty()),
        meta_key: query.meta_key.filter(|k| !k.is_empty()),
        meta_value: query.meta_value,
    };
    let records = state.documents.list_records(&filter).await?;
    info!("Found {} attachments matching filters", records.len());
    Ok(Json(records))
}

#[utoipa::path(
    get,
    path = "/api/attachments/{id}",
    tag = "attachments",
    params(("id" = Uuid, Path, description = "Attachment ID")),
    responses(
        (status = 200, description = "Attachment record", body = Record),
        (status = 404, description = "No such attachment", body = ErrorResponse)
    )
)]
pub async fn get_attachment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> DocumentResult<Json<Record>> {
    Ok(Json(require_kind(&state, id, RecordKind::Attachment).await?))
}

#[utoipa::path(
    get,
    path = "/api/attachments/download/{id}",
    tag = "attachments",
    params(("id" = Uuid, Path, description = "Attachment ID")),
    responses(
        (status = 200, description = "File content", content_type = "application/octet-stream"),
        (status = 404, description = "No such attachment", body = ErrorResponse)
    )
)]
pub async fn download_attachment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> DocumentResult<Response> {
    let record = require_kind(&state, id, RecordKind::Attachment).await?;
    download_response(&state, &record).await
}

#[utoipa::path(
    delete,
    path = "/api/attachments/{id}",
    tag = "attachments",
    params(("id" = Uuid, Path, description = "Attachment ID")),
    responses(
        (status = 200, description = "Attachment deleted", body = DeleteResponse),
        (status = 404, description = "No such attachment", body = ErrorResponse),
        (status = 503, description = "Storage backend unavailable; nothing was deleted", body = ErrorResponse)
    )
)]
pub async fn delete_attachment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> DocumentResult<Json<DeleteResponse>> {
    require_kind(&state, id, RecordKind::Attachment).await?;
    let record = state.documents.delete_record(id).await?;
    Ok(Json(DeleteResponse {
        message: "Attachment deleted successfully".to_string(),
        record,
    }))
}
