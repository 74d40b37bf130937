// Camera capture route handler

use hyper::{Body, Response, StatusCode};
use serde::Serialize;

use crate::camera::capture_image;
use crate::web::error::ApiError;
use crate::web::response_helpers::json_response;
use crate::web::server::AppState;

#[derive(Debug, Serialize)]
struct CaptureResponse {
    success: bool,
    image_path: String,
}

/// `POST /capture`: take a picture; the image is not classified.
pub async fn handle(state: &AppState) -> Result<Response<Body>, ApiError> {
    let config = state.capture.clone();
    let path = tokio::task::spawn_blocking(move || capture_image(&config))
        .await
        .map_err(|e| ApiError::Internal(format!("capture task failed: {e}")))??;

    Ok(json_response(
        StatusCode::OK,
        &CaptureResponse {
            success: true,
            image_path: path.display().to_string(),
        },
    ))
}
