// Errors surfaced by the HTTP routes and their status codes.

use hyper::{Body, Response, StatusCode};
use thiserror::Error;

use triage_types::ClassificationFailure;
use triage_worker::SubmitError;

use crate::camera::CaptureError;
use crate::web::response_helpers::json_error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    MalformedRequest(String),

    #[error("Unsupported Content-Type: {0}")]
    UnsupportedMediaType(String),

    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    Classification(#[from] ClassificationFailure),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Submit(SubmitError::QueueFull { .. })
            | Self::Classification(ClassificationFailure::Busy(_))
            | Self::Classification(ClassificationFailure::TimedOut(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Submit(_) | Self::Classification(_) | Self::Capture(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn into_response(self) -> Response<Body> {
        json_error(self.status(), &self.to_string())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        Self::Internal(e.to_string())
    }
}
