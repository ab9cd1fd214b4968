//! HTTP surface tests: the axum router driven in-process with
//! `tower::ServiceExt::oneshot`, converters replaced by closures.

#![cfg(feature = "server")]

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use edgequake_convert::server::router;
use edgequake_convert::{
    ConversionService, FileCategory, OperationError, OperationTable, OutputNaming, Parameters,
    ServiceConfig,
};
use http_body_util::BodyExt;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "edgequake-test-boundary";

// ── Test helpers ─────────────────────────────────────────────────────────────

fn table() -> OperationTable {
    let mut table = OperationTable::new();
    table.register(
        FileCategory::Pdf,
        "pdf_to_txt",
        OutputNaming::fixed("", "txt"),
        |_i: &Path, o: &Path, _p: &Parameters| -> Result<PathBuf, OperationError> {
            std::fs::write(o, "extracted text\n").map_err(|e| OperationError::io("write", e))?;
            Ok(o.to_path_buf())
        },
    );
    table.register(
        FileCategory::Image,
        "image_rotate",
        OutputNaming::fixed("_rotated", "jpg"),
        |_i: &Path, o: &Path, p: &Parameters| -> Result<PathBuf, OperationError> {
            let angle: i64 = p.parse_or("angle", 90)?;
            if angle % 90 != 0 {
                return Err(OperationError::failed(format!(
                    "Image rotation failed: unsupported angle {angle}"
                )));
            }
            std::fs::write(o, b"jpeg").map_err(|e| OperationError::io("write", e))?;
            Ok(o.to_path_buf())
        },
    );
    table
}

fn app_with(dir: &Path, max_upload_bytes: u64) -> (Router, Arc<ConversionService>) {
    let config = ServiceConfig::builder()
        .upload_dir(dir.join("uploads"))
        .download_dir(dir.join("downloads"))
        .temp_dir(dir.join("tmp"))
        .max_upload_bytes(max_upload_bytes)
        .no_journal()
        .build()
        .unwrap();
    let service = Arc::new(ConversionService::with_operations(config, table()).unwrap());
    (router(Arc::clone(&service)), service)
}

fn app(dir: &Path) -> (Router, Arc<ConversionService>) {
    app_with(dir, 16 * 1024 * 1024)
}

/// Hand-built multipart body: text fields, then an optional file part.
fn multipart(fields: &[(&str, &str)], file: Option<(&str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
Content-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn post_multipart(uri: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// ── Routes ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health() {
    let dir = TempDir::new().unwrap();
    let (app, _) = app(dir.path());

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_convert_then_download() {
    let dir = TempDir::new().unwrap();
    let (app, service) = app(dir.path());

    let body = multipart(
        &[("conversion_type", "pdf_to_txt")],
        Some(("report.pdf", &b"%PDF-1.7 fake body"[..])),
    );
    let response = app
        .clone()
        .oneshot(post_multipart("/convert", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let result = json_body(response).await;
    assert_eq!(result["success"], true);
    assert!(result.get("output_path").is_none(), "server paths stay private");
    let url = result["download_url"].as_str().unwrap().to_string();
    assert!(url.starts_with("/download/") && url.ends_with("_report.txt"), "{url}");

    let response = app.oneshot(get(&url)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("attachment;"), "{disposition}");
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"extracted text\n");

    assert_eq!(service.stats().successful_conversions, 1);
}

#[tokio::test]
async fn test_form_fields_become_parameters() {
    let dir = TempDir::new().unwrap();
    let (app, _) = app(dir.path());

    let body = multipart(
        &[("conversion_type", "image_rotate"), ("angle", "45")],
        Some(("photo.png", &b"not really a png"[..])),
    );
    let response = app.oneshot(post_multipart("/convert", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let result = json_body(response).await;
    assert_eq!(result["success"], false);
    assert_eq!(result["error_kind"], "operation_failure");
    assert!(result["error"].as_str().unwrap().contains("unsupported angle 45"));
    assert!(result.get("download_url").is_none());
}

#[tokio::test]
async fn test_rejections_are_400() {
    let dir = TempDir::new().unwrap();
    let (app, service) = app(dir.path());

    let empty = multipart(&[("conversion_type", "pdf_to_txt")], Some(("empty.pdf", &b""[..])));
    let response = app
        .clone()
        .oneshot(post_multipart("/convert", empty))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "File is empty");

    let no_type = multipart(&[], Some(("a.pdf", &b"%PDF"[..])));
    let response = app
        .clone()
        .oneshot(post_multipart("/convert", no_type))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "No conversion type selected");

    let no_file = multipart(&[("conversion_type", "pdf_to_txt")], None);
    let response = app
        .clone()
        .oneshot(post_multipart("/convert", no_file))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let not_allowed = multipart(
        &[("conversion_type", "audio_to_text")],
        Some(("clip.mp4", &b"\0\0\0\x18ftyp"[..])),
    );
    let response = app
        .oneshot(post_multipart("/convert", not_allowed))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(service.stats().total_conversions, 0);
}

#[tokio::test]
async fn test_oversized_upload_is_413() {
    let dir = TempDir::new().unwrap();
    let (app, _) = app_with(dir.path(), 1024);

    let big = vec![b'x'; 8 * 1024];
    let body = multipart(&[("conversion_type", "pdf_to_txt")], Some(("big.pdf", big.as_slice())));
    let response = app.oneshot(post_multipart("/convert", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_download_unknown_or_unsafe_is_404() {
    let dir = TempDir::new().unwrap();
    let (app, _) = app(dir.path());
    std::fs::write(dir.path().join("secret.txt"), "nope").unwrap();

    for uri in ["/download/missing.txt", "/download/..%2Fsecret.txt", "/download/.hidden"] {
        let response = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
    }
}

#[tokio::test]
async fn test_supported_conversions_and_stats() {
    let dir = TempDir::new().unwrap();
    let (app, _) = app(dir.path());

    let response = app
        .clone()
        .oneshot(get("/api/supported_conversions"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["video"], serde_json::json!(["video_to_audio"]));
    assert!(body["pdf"]
        .as_array()
        .unwrap()
        .iter()
        .any(|v| v == "pdf_to_txt"));

    let response = app.oneshot(get("/api/stats")).await.unwrap();
    let body = json_body(response).await;
    assert_eq!(body["total_conversions"], 0);
    assert_eq!(body["most_popular_conversion"], "None");
}

#[tokio::test]
async fn test_file_info_probe() {
    let dir = TempDir::new().unwrap();
    let (app, _) = app(dir.path());

    let body = multipart(&[], Some(("notes.txt", &b"abc"[..])));
    let response = app
        .oneshot(post_multipart("/api/file_info", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let info = json_body(response).await;
    assert_eq!(info["filename"], "notes.txt");
    assert_eq!(info["file_type"], "document");
    assert_eq!(info["file_size"], 3);
    assert_eq!(info["is_valid"], true);
    assert_eq!(
        info["sha256"],
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
    assert!(std::fs::read_dir(dir.path().join("tmp")).unwrap().next().is_none());
}

#[tokio::test]
async fn test_cleanup_accepts_get_and_post() {
    let dir = TempDir::new().unwrap();
    let (app, _) = app(dir.path());

    let response = app.clone().oneshot(get("/cleanup")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["total_cleaned"], 0);

    let post = Request::builder()
        .method("POST")
        .uri("/cleanup")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(post).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
