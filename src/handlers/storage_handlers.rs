//! Tenant-facing upload, download and metadata handlers.

use super::auth::Tenant;
use crate::{
    errors::AppError,
    models::file_metadata::FileMetadata,
    providers::ByteStream,
    services::storage_service::StorageService,
};
use axum::{
    Extension, Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::Serialize;
use std::io;
use uuid::Uuid;

pub const BUCKET_HEADER: &str = "x-bucket-name";
pub const FILENAME_HEADER: &str = "x-original-filename";

#[derive(Serialize)]
pub struct UploadResponse {
    #[serde(flatten)]
    pub file: FileMetadata,
    /// Ids of the copies written to replication targets.
    pub replicas: Vec<Uuid>,
    pub replica_failures: usize,
}

fn required_header(headers: &HeaderMap, name: &str) -> Result<String, AppError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::bad_request(format!("missing `{}` header", name)))
}

/// `POST /api/v1/storage/upload`
pub async fn upload_file(
    State(service): State<StorageService>,
    Extension(Tenant(app_id)): Extension<Tenant>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let bucket = required_header(&headers, BUCKET_HEADER)?;
    let filename = required_header(&headers, FILENAME_HEADER)?;

    let stream: ByteStream = Box::pin(body.into_data_stream().map(|chunk| chunk.map_err(io::Error::other)));

    let result = service.upload_file(app_id, &bucket, &filename, stream).await?;

    let response = UploadResponse {
        replicas: result.replicas.iter().map(|r| r.id).collect(),
        replica_failures: result.failed,
        file: result.primary,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// `GET /api/v1/storage/download/{id}`
pub async fn download_file(
    State(service): State<StorageService>,
    Extension(Tenant(app_id)): Extension<Tenant>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let download = service.download_file(app_id, id).await?;

    let mut response = Response::new(Body::from_stream(download.body));
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&download.meta.content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&content_disposition(&download.meta.original_name)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

/// `GET /api/v1/storage/metadata/{id}`
pub async fn get_metadata(
    State(service): State<StorageService>,
    Extension(Tenant(app_id)): Extension<Tenant>,
    Path(id): Path<Uuid>,
) -> Result<Json<FileMetadata>, AppError> {
    Ok(Json(service.get_metadata(app_id, id).await?))
}

/// `attachment; filename="<name>"` with characters that cannot sit inside a
/// quoted header value replaced.
fn content_disposition(original_name: &str) -> String {
    let safe: String = original_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();
    format!("attachment; filename=\"{}\"", safe)
}
