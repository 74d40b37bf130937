// Request parsing utilities for HTTP handlers

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hyper::body::Bytes;
use hyper::{Body, Request};
use serde::de::DeserializeOwned;

use crate::sys_debug;
use crate::web::error::ApiError;

/// Media type of the request without parameters, lower-cased.
pub fn content_type<B>(req: &Request<B>) -> Option<String> {
    let raw = req.headers().get(hyper::header::CONTENT_TYPE)?.to_str().ok()?;
    let essence = raw.split(';').next().unwrap_or_default().trim();
    (!essence.is_empty()).then(|| essence.to_ascii_lowercase())
}

/// Boundary parameter of a `multipart/form-data` Content-Type.
pub fn multipart_boundary<B>(req: &Request<B>) -> Result<String, ApiError> {
    let raw = req
        .headers()
        .get(hyper::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    multer::parse_boundary(raw)
        .map_err(|e| ApiError::MalformedRequest(format!("Invalid multipart request: {e}")))
}

/// Bytes of the file part named `image` in a multipart body.
pub async fn read_image_part(body: Body, boundary: String) -> Result<Vec<u8>, ApiError> {
    let invalid = |e: multer::Error| ApiError::MalformedRequest(format!("Invalid multipart body: {e}"));

    let mut multipart = multer::Multipart::new(body, boundary);
    while let Some(field) = multipart.next_field().await.map_err(invalid)? {
        if field.name() != Some("image") {
            continue;
        }
        let named = field.file_name().is_some_and(|name| !name.trim().is_empty());
        if !named {
            return Err(ApiError::MalformedRequest("No selected file".into()));
        }
        let bytes = field.bytes().await.map_err(invalid)?;
        sys_debug!("[HTTP] Multipart image part of {} bytes", bytes.len());
        if bytes.is_empty() {
            return Err(ApiError::MalformedRequest("No image data provided".into()));
        }
        return Ok(bytes.to_vec());
    }
    Err(ApiError::MalformedRequest("No image file provided".into()))
}

pub async fn read_body(body: Body) -> Result<Bytes, ApiError> {
    hyper::body::to_bytes(body)
        .await
        .map_err(|e| ApiError::MalformedRequest(format!("Failed to read request body: {e}")))
}

/// Parse a JSON request body into a typed structure.
pub async fn parse_json_body<T: DeserializeOwned>(body: Body) -> Result<T, ApiError> {
    let bytes = read_body(body).await?;
    sys_debug!("[HTTP] JSON body of {} bytes", bytes.len());
    serde_json::from_slice::<T>(&bytes)
        .map_err(|e| ApiError::MalformedRequest(format!("Invalid JSON format: {e}")))
}

/// Decode base64 image data, accepting an optional `data:<type>;base64,` prefix.
pub fn decode_image_data(data: &str) -> Result<Vec<u8>, ApiError> {
    let payload = match data.split_once(',') {
        Some((header, rest)) if header.starts_with("data:") => rest,
        _ => data,
    };
    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(cleaned)
        .map_err(|e| ApiError::MalformedRequest(format!("Invalid base64 image data: {e}")))?;
    if bytes.is_empty() {
        return Err(ApiError::MalformedRequest("No image data provided".into()));
    }
    Ok(bytes)
}
