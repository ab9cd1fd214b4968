//! Route handlers.

use super::error::ApiError;
use crate::convert::ConversionResult;
use crate::converters::Parameters;
use crate::service::{ConversionService, FileInfo, SweepReport, Upload};
use crate::stats::StatsSummary;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub fn router() -> Router<Arc<ConversionService>> {
    Router::new()
        .route("/health", get(health))
        .route("/convert", post(convert))
        .route("/download/{filename}", get(download))
        .route("/api/supported_conversions", get(supported_conversions))
        .route("/api/stats", get(stats))
        .route("/api/file_info", post(file_info))
        .route("/cleanup", get(cleanup).post(cleanup))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// Fields of a conversion form: the file, the conversion type, and every
/// other text field as a parameter.
#[derive(Default)]
struct ConvertForm {
    upload: Option<Upload>,
    conversion_type: Option<String>,
    parameters: Parameters,
}

async fn read_form(mut multipart: Multipart) -> Result<ConvertForm, ApiError> {
    let mut form = ConvertForm::default();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await?;
                debug!("received upload {} ({} bytes)", file_name, bytes.len());
                form.upload = Some(Upload::from_bytes(file_name, bytes.to_vec()));
            }
            "conversion_type" => {
                form.conversion_type = Some(field.text().await?.trim().to_string());
            }
            "" => {}
            _ => {
                let value = field.text().await?;
                form.parameters.insert(name, value);
            }
        }
    }
    Ok(form)
}

fn require_upload(upload: Option<Upload>) -> Result<Upload, ApiError> {
    upload.ok_or_else(|| ApiError::BadRequest("No file provided".into()))
}

/// Wire shape of a result: the server-side path is dropped and a download
/// link added on success.
fn result_body(result: &ConversionResult) -> Result<Value, ApiError> {
    let mut body =
        serde_json::to_value(result).map_err(|e| ApiError::Internal(format!("serialise result: {e}")))?;
    if let Some(obj) = body.as_object_mut() {
        obj.remove("output_path");
        if let Some(name) = &result.output_filename {
            obj.insert("download_url".into(), json!(format!("/download/{name}")));
        }
    }
    Ok(body)
}

async fn convert(
    State(service): State<Arc<ConversionService>>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let form = read_form(multipart).await?;
    let upload = require_upload(form.upload)?;
    let conversion_type = form
        .conversion_type
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::BadRequest("No conversion type selected".into()))?;

    let result = service
        .submit(upload, &conversion_type, form.parameters)
        .await?;
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    Ok((status, Json(result_body(&result)?)))
}

async fn download(
    State(service): State<Arc<ConversionService>>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    let path = service
        .artifact_path(&filename)
        .ok_or_else(|| ApiError::NotFound("File not found or has expired".into()))?;
    let bytes = tokio::fs::read(&path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ApiError::NotFound("File not found or has expired".into())
        } else {
            ApiError::Internal(format!("read {}: {e}", path.display()))
        }
    })?;
    let disposition = format!("attachment; filename=\"{filename}\"");
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

async fn supported_conversions(State(service): State<Arc<ConversionService>>) -> Json<Value> {
    Json(json!(service.supported_conversions()))
}

async fn stats(State(service): State<Arc<ConversionService>>) -> Json<StatsSummary> {
    Json(service.stats_summary())
}

async fn file_info(
    State(service): State<Arc<ConversionService>>,
    multipart: Multipart,
) -> Result<Json<FileInfo>, ApiError> {
    let form = read_form(multipart).await?;
    let upload = require_upload(form.upload)?;
    Ok(Json(service.file_info(upload).await?))
}

async fn cleanup(State(service): State<Arc<ConversionService>>) -> Json<SweepReport> {
    Json(service.sweep().await)
}
