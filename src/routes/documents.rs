use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::Response,
    routing::get,
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
        .route("/", get(list_documents).post(upload_document))
        .route("/download/{id}", get(download_document))
        .route("/{id}", get(get_document).delete(delete_document))
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ListDocumentsQuery {
    /// Case-insensitive substring of the file name
    pub name: Option<String>,
    pub meta_key: Option<String>,
    /// Requires `meta_key`
    pub meta_value: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/pdfs",
    tag = "documents",
    request_body(content = super::UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Document stored", body = Record),
        (status = 400, description = "Missing file, bad metadata, disallowed type or too large", body = ErrorResponse),
        (status = 409, description = "Another document occupies the same directory", body = ErrorResponse),
        (status = 503, description = "Storage backend unavailable", body = ErrorResponse)
    )
)]
pub async fn upload_document(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> DocumentResult<(StatusCode, Json<Record>)> {
    let (staged, filename, metadata) = read_upload(&state, multipart).await?;
    info!("Document upload received: {} ({} bytes)", filename, staged.size());

    let record = state
        .documents
        .upload_document(None, &filename, metadata, staged)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

#[utoipa::path(
    get,
    path = "/api/pdfs",
    tag = "documents",
    params(ListDocumentsQuery),
    responses(
        (status = 200, description = "Matching documents, oldest first", body = Vec<Record>),
        (status = 400, description = "meta_value given without meta_key", body = ErrorResponse)
    )
)]
pub async fn list_documents(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListDocumentsQuery>,
) -> DocumentResult<Json<Vec<Record>>> {
    let filter = RecordFilter {
        name: query.name.filter(|n| !n.is_empty()),
        meta_key: query.meta_key.filter(|k| !k.is_empty()),
        meta_value: query.meta_value,
        ..RecordFilter::documents()
    };
    let records = state.documents.list_records(&filter).await?;
    info!("Found {} documents matching filters", records.len());
    Ok(Json(records))
}

#[utoipa::path(
    get,
    path = "/api/pdfs/{id}",
    tag = "documents",
    params(("id" = Uuid, Path, description = "Document ID")),
    responses(
        (status = 200, description = "Document record", body = Record),
        (status = 404, description = "No such document", body = ErrorResponse)
    )
)]
pub async fn get_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> DocumentResult<Json<Record>> {
    Ok(Json(require_kind(&state, id, RecordKind::Document).await?))
}

#[utoipa::path(
    get,
    path = "/api/pdfs/download/{id}",
    tag = "documents",
    params(("id" = Uuid, Path, description = "Document ID")),
    responses(
        (status = 200, description = "File content", content_type = "application/octet-stream"),
        (status = 404, description = "No such document", body = ErrorResponse),
        (status = 503, description = "Storage backend unavailable", body = ErrorResponse)
    )
)]
pub async fn download_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> DocumentResult<Response> {
    let record = require_kind(&state, id, RecordKind::Document).await?;
    download_response(&state, &record).await
}

#[utoipa::path(
    delete,
    path = "/api/pdfs/{id}",
    tag = "documents",
    params(("id" = Uuid, Path, description = "Document ID")),
    responses(
        (status = 200, description = "Document and its attachments deleted", body = DeleteResponse),
        (status = 404, description = "No such document", body = ErrorResponse),
        (status = 503, description = "Storage backend unavailable; nothing was deleted", body = ErrorResponse)
    )
)]
pub async fn delete_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> DocumentResult<Json<DeleteResponse>> {
    require_kind(&state, id, RecordKind::Document).await?;
    let record = state.documents.delete_record(id).await?;
    Ok(Json(DeleteResponse {
        message: "Document deleted successfully".to_string(),
        record,
    }))
}
