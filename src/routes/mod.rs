use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use crate::errors::{DocumentError, DocumentResult};
use crate::models::{Metadata, Record, RecordKind};
use crate::services::staging::base_name;
use crate::services::StagedFile;
use crate::AppState;

pub mod attachments;
pub mod documents;

/// Multipart overhead allowed on top of the staging size ceiling
const MULTIPART_SLACK_BYTES: u64 = 1024 * 1024;

#[derive(OpenApi)]
#[openapi(
    paths(
        documents::upload_document,
        documents::list_documents,
        documents::get_document,
        documents::download_document,
        documents::delete_document,
        attachments::upload_attachment,
        attachments::list_attachments,
        attachments::get_attachment,
        attachments::download_attachment,
        attachments::delete_attachment,
        health_check,
    ),
    components(schemas(Record, RecordKind, UploadForm, DeleteResponse, ErrorResponse, HealthResponse)),
    tags(
        (name = "documents", description = "Top-level documents"),
        (name = "attachments", description = "Files attached to a document"),
        (name = "health", description = "Service health"),
    )
)]
pub struct ApiDoc;

pub fn create_router(state: Arc<AppState>) -> Router {
    let body_limit = state.staging.max_bytes().saturating_add(MULTIPART_SLACK_BYTES);

    Router::new()
        .nest("/api/pdfs", documents::router())
        .nest("/api/attachments", attachments::router())
        .route("/api/health", get(health_check))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::max(usize::try_from(body_limit).unwrap_or(usize::MAX)))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub storage: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeleteResponse {
    pub message: String,
    pub record: Record,
}

/// Multipart body accepted by the upload endpoints
#[allow(dead_code)]
#[derive(ToSchema)]
pub struct UploadForm {
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
    /// JSON object with free-form metadata
    metadata: Option<String>,
}

impl IntoResponse for DocumentError {
    fn into_response(self) -> Response {
        let status = match &self {
            DocumentError::NotFound(_) => StatusCode::NOT_FOUND,
            DocumentError::AlreadyExists(_) => StatusCode::CONFLICT,
            DocumentError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            DocumentError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            DocumentError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            DocumentError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            DocumentError::Inconsistent(_)
            | DocumentError::Storage { .. }
            | DocumentError::Database(_)
            | DocumentError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("Request failed with {}: {}", status, self);
        } else {
            warn!("Request rejected with {}: {}", status, self);
        }

        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}

#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        storage: state.documents.storage_type().to_string(),
    })
}

/// Stage the `file` field of an upload and parse the optional `metadata`
/// field. Returns the staged file, its display name and the metadata.
pub(crate) async fn read_upload(
    state: &AppState,
    mut multipart: Multipart,
) -> DocumentResult<(StagedFile, String, Metadata)> {
    let mut staged = None;
    let mut metadata = Metadata::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| DocumentError::InvalidInput(format!("malformed multipart body: {}", e)))?
    {
        match field.name() {
            Some("file") => {
                let filename = field.file_name().map(|name| base_name(name).to_string()).unwrap_or_default();
                if filename.is_empty() {
                    return Err(DocumentError::InvalidInput("no selected file".to_string()));
                }
                let file = state.staging.stage_stream(&filename, field).await?;
                staged = Some((file, filename));
            }
            Some("metadata") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| DocumentError::InvalidInput(format!("unreadable metadata: {}", e)))?;
                metadata = parse_metadata(&text)?;
            }
            other => {
                info!("Ignoring unexpected multipart field {:?}", other);
            }
        }
    }

    let (file, filename) = staged.ok_or_else(|| DocumentError::InvalidInput("no file part".to_string()))?;
    Ok((file, filename, metadata))
}

fn parse_metadata(text: &str) -> DocumentResult<Metadata> {
    if text.trim().is_empty() {
        return Ok(Metadata::new());
    }
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => Err(DocumentError::InvalidInput(
            "metadata must be a JSON object".to_string(),
        )),
        Err(e) => Err(DocumentError::InvalidInput(format!(
            "metadata must be valid JSON: {}",
            e
        ))),
    }
}

/// Load a record and make sure it is of the kind the endpoint serves
pub(crate) async fn require_kind(state: &AppState, id: Uuid, kind: RecordKind) -> DocumentResult<Record> {
    let record = state.documents.get_record(id).await?;
    if record.kind != kind {
        return Err(DocumentError::NotFound(format!("{} {}", kind, id)));
    }
    Ok(record)
}

/// Fetch a record's bytes through a scratch file and return them as a download
pub(crate) async fn download_response(state: &AppState, record: &Record) -> DocumentResult<Response> {
    let scratch = state.staging.scratch_path(&record.original_filename);
    if let Some(parent) = scratch.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let fetched = state.documents.fetch_to_local(record.id, &scratch).await;
    let data = match fetched {
        Ok(()) => tokio::fs::read(&scratch).await,
        Err(e) => {
            let _ = tokio::fs::remove_file(&scratch).await;
            return Err(e);
        }
    };
    if let Err(e) = tokio::fs::remove_file(&scratch).await {
        warn!("Failed to remove download scratch file {}: {}", scratch.display(), e);
    }
    let data = data?;

    let content_type = mime_guess::from_path(&record.original_filename)
        .first_or_octet_stream()
        .to_string();
    let disposition = format!(
        "attachment; filename=\"{}\"",
        record.original_filename.replace('"', "")
    );

    info!("Serving {} ({} bytes)", record.stored_path, data.len());
    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        data,
    )
        .into_response())
}
