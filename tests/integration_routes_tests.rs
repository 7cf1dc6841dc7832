use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::util::ServiceExt;

use document_manager::routes::create_router;
use document_manager::test_helpers::{Fault, FaultInjectingBackend, TestContext};

const BOUNDARY: &str = "X-DOCUMENT-MANAGER-BOUNDARY";

fn multipart_body(filename: &str, data: &[u8], metadata: Option<&str>) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            BOUNDARY, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(b"\r\n");
    if let Some(metadata) = metadata {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"metadata\"\r\n\r\n{}\r\n",
                BOUNDARY, metadata
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload_request(uri: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

fn request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(app, request).await;
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

async fn upload(app: &Router, uri: &str, filename: &str, data: &[u8], metadata: Option<&str>) -> Value {
    let (status, json) = send_json(app, upload_request(uri, multipart_body(filename, data, metadata))).await;
    assert_eq!(status, StatusCode::CREATED, "upload of {} failed: {}", filename, json);
    json
}

#[tokio::test]
async fn test_health_reports_storage_type() {
    let ctx = TestContext::new().await;
    let app = create_router(ctx.app_state());

    let (status, json) = send_json(&app, request("GET", "/api/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["storage"], "local");
}

#[tokio::test]
async fn test_upload_and_fetch_document() {
    let ctx = TestContext::new().await;
    let app = create_router(ctx.app_state());

    let created = upload(
        &app,
        "/api/pdfs",
        "Quarterly Report.pdf",
        b"%PDF-1.7 quarterly",
        Some(r#"{"author":"Jane","year":2024}"#),
    )
    .await;
    assert_eq!(created["kind"], "document");
    assert_eq!(created["original_filename"], "Quarterly Report.pdf");
    assert_eq!(created["stored_path"], "uploads/Quarterly Report/Quarterly Report.pdf");
    assert_eq!(created["metadata"]["author"], "Jane");
    assert!(created["parent_id"].is_null());
    assert!(ctx.blob_exists("uploads/Quarterly Report/Quarterly Report.pdf"));
    assert_eq!(ctx.staged_file_count(), 0);

    let id = created["id"].as_str().unwrap();
    let (status, fetched) = send_json(&app, request("GET", &format!("/api/pdfs/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched, created);
}

#[tokio::test]
async fn test_client_directory_is_stripped_from_filename() {
    let ctx = TestContext::new().await;
    let app = create_router(ctx.app_state());

    let created = upload(&app, "/api/pdfs", "scans/2024/memo.pdf", b"memo", None).await;
    assert_eq!(created["original_filename"], "memo.pdf");
    assert_eq!(created["stored_path"], "uploads/memo/memo.pdf");
}

#[tokio::test]
async fn test_upload_rejections() {
    let ctx = TestContext::new().await;
    let app = create_router(ctx.app_state());

    let (status, json) = send_json(
        &app,
        upload_request("/api/pdfs", multipart_body("tool.exe", b"MZ", None)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("unsupported file type"));

    let (status, _) = send_json(
        &app,
        upload_request("/api/pdfs", multipart_body("a.pdf", b"x", Some("[1,2,3]"))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send_json(
        &app,
        upload_request("/api/pdfs", multipart_body("a.pdf", b"x", Some("{broken"))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let no_file = format!(
        "--{}\r\nContent-Disposition: form-data; name=\"metadata\"\r\n\r\n{{}}\r\n--{}--\r\n",
        BOUNDARY, BOUNDARY
    );
    let (status, json) = send_json(&app, upload_request("/api/pdfs", no_file.into_bytes())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("no file part"));

    let too_big = vec![b'a'; 1024 * 1024 + 1];
    let (status, json) = send_json(
        &app,
        upload_request("/api/pdfs", multipart_body("big.pdf", &too_big, None)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("maximum upload size"));

    assert_eq!(ctx.staged_file_count(), 0);
    let (_, listed) = send_json(&app, request("GET", "/api/pdfs")).await;
    assert_eq!(listed.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_attachment_lifecycle() {
    let ctx = TestContext::new().await;
    let app = create_router(ctx.app_state());

    let doc = upload(&app, "/api/pdfs", "contract.pdf", b"contract", None).await;
    let doc_id = doc["id"].as_str().unwrap().to_string();

    let attachment = upload(
        &app,
        &format!("/api/attachments/{}", doc_id),
        "signature.png",
        b"\x89PNG signature",
        Some(r#"{"signed_by":"Jane"}"#),
    )
    .await;
    assert_eq!(attachment["kind"], "attachment");
    assert_eq!(attachment["parent_id"], doc["id"]);
    assert_eq!(attachment["stored_path"], "uploads/contract/attachments/signature.png");
    let attachment_id = attachment["id"].as_str().unwrap().to_string();

    let (status, listed) = send_json(
        &app,
        request("GET", &format!("/api/attachments?pdf_id={}", doc_id)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);

    // the two endpoint families do not serve each other's records
    let (status, _) = send_json(&app, request("GET", &format!("/api/pdfs/{}", attachment_id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send_json(&app, request("DELETE", &format!("/api/attachments/{}", doc_id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, deleted) = send_json(&app, request("DELETE", &format!("/api/pdfs/{}", doc_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["message"], "Document deleted successfully");
    assert_eq!(deleted["record"]["id"], doc["id"]);

    let (status, _) = send_json(&app, request("GET", &format!("/api/attachments/{}", attachment_id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(!ctx.blob_exists("uploads/contract"));
}

#[tokio::test]
async fn test_attachment_upload_to_unknown_document() {
    let ctx = TestContext::new().await;
    let app = create_router(ctx.app_state());

    let (status, json) = send_json(
        &app,
        upload_request(
            &format!("/api/attachments/{}", uuid::Uuid::new_v4()),
            multipart_body("orphan.png", b"png", None),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].is_string());
    assert_eq!(ctx.staged_file_count(), 0);
}

#[tokio::test]
async fn test_list_filters() {
    let ctx = TestContext::new().await;
    let app = create_router(ctx.app_state());

    upload(&app, "/api/pdfs", "Invoice-March.pdf", b"1", Some(r#"{"author":"Jane"}"#)).await;
    upload(&app, "/api/pdfs", "invoice-april.pdf", b"2", Some(r#"{"author":"John"}"#)).await;
    upload(&app, "/api/pdfs", "notes.pdf", b"3", Some(r#"{"reviewed":true}"#)).await;

    let (_, all) = send_json(&app, request("GET", "/api/pdfs")).await;
    let names: Vec<&str> = all
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["original_filename"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Invoice-March.pdf", "invoice-april.pdf", "notes.pdf"]);

    let (_, by_name) = send_json(&app, request("GET", "/api/pdfs?name=INVOICE")).await;
    assert_eq!(by_name.as_array().unwrap().len(), 2);

    let (_, by_key) = send_json(&app, request("GET", "/api/pdfs?meta_key=author")).await;
    assert_eq!(by_key.as_array().unwrap().len(), 2);

    let (_, by_value) = send_json(&app, request("GET", "/api/pdfs?meta_key=author&meta_value=Jane")).await;
    let by_value = by_value.as_array().unwrap();
    assert_eq!(by_value.len(), 1);
    assert_eq!(by_value[0]["original_filename"], "Invoice-March.pdf");

    let (_, by_bool) = send_json(&app, request("GET", "/api/pdfs?meta_key=reviewed&meta_value=true")).await;
    assert_eq!(by_bool.as_array().unwrap().len(), 1);

    let (status, _) = send_json(&app, request("GET", "/api/pdfs?meta_value=Jane")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_download_sets_headers() {
    let ctx = TestContext::new().await;
    let app = create_router(ctx.app_state());

    let doc = upload(&app, "/api/pdfs", "manual.pdf", b"%PDF manual", None).await;
    let attachment = upload(
        &app,
        &format!("/api/attachments/{}", doc["id"].as_str().unwrap()),
        "diagram.png",
        b"png bytes",
        None,
    )
    .await;

    let response = app
        .clone()
        .oneshot(request("GET", &format!("/api/pdfs/download/{}", doc["id"].as_str().unwrap())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"manual.pdf\""
    );
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"%PDF manual");

    let (status, body) = send(
        &app,
        request(
            "GET",
            &format!("/api/attachments/download/{}", attachment["id"].as_str().unwrap()),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"png bytes");
    assert_eq!(ctx.staged_file_count(), 0);
}

#[tokio::test]
async fn test_reupload_conflicting_directory_is_conflict() {
    let ctx = TestContext::new().await;
    let app = create_router(ctx.app_state());

    upload(&app, "/api/pdfs", "scan.pdf", b"pdf", None).await;
    let (status, json) = send_json(
        &app,
        upload_request("/api/pdfs", multipart_body("scan.png", b"png", None)),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn test_unavailable_storage_maps_to_503() {
    let ctx = TestContext::new().await;
    let backend = Arc::new(FaultInjectingBackend::new(ctx.storage.clone()));
    let service = ctx.service_with(backend.clone(), Arc::new(ctx.db.clone()));
    let app = create_router(ctx.app_state_with(Arc::new(service)));

    let doc = upload(&app, "/api/pdfs", "steady.pdf", b"steady", None).await;
    let id = doc["id"].as_str().unwrap();

    backend.fail("delete_directory", Fault::Unavailable);
    let (status, json) = send_json(&app, request("DELETE", &format!("/api/pdfs/{}", id))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(json["error"].as_str().unwrap().contains("unavailable"));

    backend.fail("upload_file", Fault::Unavailable);
    let (status, _) = send_json(
        &app,
        upload_request("/api/pdfs", multipart_body("later.pdf", b"later", None)),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(ctx.staged_file_count(), 0);

    let (status, _) = send_json(&app, request("GET", &format!("/api/pdfs/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_malformed_ids_and_unknown_records() {
    let ctx = TestContext::new().await;
    let app = create_router(ctx.app_state());

    let (status, _) = send(&app, request("GET", "/api/pdfs/not-a-uuid")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = send_json(&app, request("DELETE", &format!("/api/pdfs/{}", uuid::Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn test_openapi_document_lists_endpoints() {
    let ctx = TestContext::new().await;
    let app = create_router(ctx.app_state());

    let (status, json) = send_json(&app, request("GET", "/api-docs/openapi.json")).await;
    assert_eq!(status, StatusCode::OK);
    let paths = json["paths"].as_object().unwrap();
    for path in [
        "/api/pdfs",
        "/api/pdfs/{id}",
        "/api/pdfs/download/{id}",
        "/api/attachments",
        "/api/attachments/{pdf_id}",
        "/api/attachments/download/{id}",
        "/api/health",
    ] {
        assert!(paths.contains_key(path), "missing {}", path);
    }
}
