// Health check route handler

use hyper::{Body, Response, StatusCode};
use serde::Serialize;

use triage_types::{SessionState, SessionStatus, WorkerSession};

use crate::web::response_helpers::json_response;
use crate::web::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model: String,
    pub model_loaded: bool,
    pub processing: bool,
    pub state: SessionState,
    pub session: Option<WorkerSession>,
    pub restarts: u32,
    pub queue_depth: usize,
    pub last_error: Option<String>,
}

impl HealthResponse {
    pub fn from_status(model: &str, status: SessionStatus) -> Self {
        Self {
            status: if status.state.is_serving() {
                "healthy"
            } else {
                "unhealthy"
            },
            model: model.to_string(),
            model_loaded: status.state == SessionState::Running,
            processing: status.is_processing(),
            state: status.state,
            session: status.session,
            restarts: status.restarts,
            queue_depth: status.queue_depth,
            last_error: status.last_error,
        }
    }
}

pub fn handle(state: &AppState) -> Response<Body> {
    let health = HealthResponse::from_status(&state.model, state.session.status());
    let code = if health.state.is_serving() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    json_response(code, &health)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_session_is_healthy() {
        let status = SessionStatus {
            state: SessionState::Running,
            session: Some(WorkerSession::new(1, 4242)),
            in_flight: Some(7),
            queue_depth: 2,
            ..SessionStatus::default()
        };
        let health = HealthResponse::from_status("VILA1.5-3b", status);
        assert_eq!(health.status, "healthy");
        assert!(health.model_loaded);
        assert!(health.processing);
        assert_eq!(health.queue_depth, 2);
    }

    #[test]
    fn test_failed_session_is_unhealthy() {
        let status = SessionStatus {
            state: SessionState::Failed,
            restarts: 3,
            last_error: Some("model failed to load".into()),
            ..SessionStatus::default()
        };
        let health = HealthResponse::from_status("VILA1.5-3b", status);
        assert_eq!(health.status, "unhealthy");
        assert!(!health.model_loaded);
        assert!(!health.processing);

        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["last_error"], "model failed to load");
    }
}
