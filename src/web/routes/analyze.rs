// Classification route handlers: uploaded image data or a path on disk.

use std::path::{Path, PathBuf};

use hyper::{Body, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};

use triage_types::{ClassificationFailure, ClassificationResult};

use crate::web::error::ApiError;
use crate::web::request_parsing::{
    content_type, decode_image_data, multipart_boundary, parse_json_body, read_body,
    read_image_part,
};
use crate::web::response_helpers::json_response;
use crate::web::server::AppState;
use crate::{sys_info, sys_warn};

#[derive(Debug, Deserialize)]
struct ImageDataRequest {
    image_data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImagePathRequest {
    image_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub success: bool,
    pub response: String,
    /// Seconds spent in the worker exchange.
    pub processing_time: f64,
}

/// `POST /analyze`: a multipart `image` part, JSON `{image_data}` (base64),
/// or a raw JPEG/PNG body.
pub async fn handle_upload(req: Request<Body>, state: &AppState) -> Result<Response<Body>, ApiError> {
    let media_type = content_type(&req).unwrap_or_default();
    sys_info!("[HTTP] /analyze with Content-Type `{media_type}`");

    let bytes = match media_type.as_str() {
        "multipart/form-data" => {
            let boundary = multipart_boundary(&req)?;
            read_image_part(req.into_body(), boundary).await?
        }
        "application/json" => {
            let body: ImageDataRequest = parse_json_body(req.into_body()).await?;
            let data = body
                .image_data
                .filter(|d| !d.trim().is_empty())
                .ok_or_else(|| ApiError::MalformedRequest("No image data provided".into()))?;
            decode_image_data(&data)?
        }
        "image/jpeg" | "image/png" => {
            let bytes = read_body(req.into_body()).await?;
            if bytes.is_empty() {
                return Err(ApiError::MalformedRequest("No image data provided".into()));
            }
            bytes.to_vec()
        }
        other => return Err(ApiError::UnsupportedMediaType(other.to_string())),
    };

    let upload = save_upload(&state.upload_dir, &bytes).await?;
    let result = classify_upload(state, upload).await?;
    Ok(success(result))
}

/// `POST /analyze/path`: JSON `{image_path}` naming a file on this host.
pub async fn handle_path(req: Request<Body>, state: &AppState) -> Result<Response<Body>, ApiError> {
    let body: ImagePathRequest = parse_json_body(req.into_body()).await?;
    let image_path = body
        .image_path
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ApiError::MalformedRequest("No image path provided".into()))?;

    let full_path = tokio::fs::canonicalize(&image_path)
        .await
        .map_err(|_| ApiError::NotFound(format!("Image not found: {image_path}")))?;
    if !full_path.is_file() {
        return Err(ApiError::NotFound(format!("Image not found: {image_path}")));
    }

    let pending = state.session.submit(full_path)?;
    let result = pending.await_result(state.result_wait).await?;
    Ok(success(result))
}

/// Write upload bytes to `upload_<uuid>.jpg` under `dir`.
pub async fn save_upload(dir: &Path, bytes: &[u8]) -> Result<PathBuf, ApiError> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("upload_{}.jpg", uuid::Uuid::new_v4()));
    tokio::fs::write(&path, bytes).await?;
    // The worker resolves paths on its own side of the volume mapping.
    let path = tokio::fs::canonicalize(&path).await?;
    sys_info!("[HTTP] Saved {} bytes to {}", bytes.len(), path.display());
    Ok(path)
}

/// Classify a file this handler owns and remove it once the session is
/// done with it. When the wait bound expires the request may already be
/// with the worker, so removal waits for it to settle.
async fn classify_upload(state: &AppState, upload: PathBuf) -> Result<ClassificationResult, ApiError> {
    let mut pending = match state.session.submit(&upload) {
        Ok(pending) => pending,
        Err(e) => {
            remove_upload(&upload).await;
            return Err(e.into());
        }
    };

    match pending.wait(state.result_wait).await {
        Some(outcome) => {
            remove_upload(&upload).await;
            Ok(outcome?)
        }
        None => {
            sys_info!(
                "[HTTP] Keeping {} until request #{} settles",
                upload.display(),
                pending.id()
            );
            tokio::spawn(async move {
                let _ = pending.settled().await;
                remove_upload(&upload).await;
            });
            Err(ClassificationFailure::Busy(state.result_wait).into())
        }
    }
}

async fn remove_upload(upload: &Path) {
    if let Err(e) = tokio::fs::remove_file(upload).await {
        sys_warn!("[HTTP] Could not remove {}: {e}", upload.display());
    }
}

fn success(result: ClassificationResult) -> Response<Body> {
    json_response(
        StatusCode::OK,
        &AnalyzeResponse {
            success: true,
            response: result.text,
            processing_time: result.elapsed.as_secs_f64(),
        },
    )
}
