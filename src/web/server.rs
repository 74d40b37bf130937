// hyper server: routing and startup.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};

use triage_config::{CaptureConfig, LaunchSpec, TriageConfig};
use triage_worker::SharedSessionManager;

use crate::sys_info;
use crate::web::response_helpers::{cors_preflight, json_error};
use crate::web::routes::{analyze, capture, health};

/// Everything a request handler can reach.
pub struct AppState {
    pub session: SharedSessionManager,
    pub upload_dir: PathBuf,
    pub result_wait: Duration,
    pub capture: CaptureConfig,
    /// Model name reported by `/health`.
    pub model: String,
}

pub type SharedAppState = Arc<AppState>;

impl AppState {
    pub fn new(session: SharedSessionManager, config: &TriageConfig) -> Self {
        Self {
            session,
            upload_dir: config.http.upload_dir.clone(),
            result_wait: config.http.result_wait(),
            capture: config.capture.clone(),
            model: model_name(&config.launch),
        }
    }
}

/// Value following `--model` in the launch arguments, or the program name.
pub fn model_name(launch: &LaunchSpec) -> String {
    launch
        .args
        .windows(2)
        .find(|w| w[0] == "--model")
        .map(|w| w[1].clone())
        .unwrap_or_else(|| launch.program.clone())
}

pub async fn handle_request(
    req: Request<Body>,
    state: SharedAppState,
) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let result = match (&method, path.as_str()) {
        (&Method::GET, "/health") => Ok(health::handle(&state)),
        (&Method::POST, "/analyze") => analyze::handle_upload(req, &state).await,
        (&Method::POST, "/analyze/path") => analyze::handle_path(req, &state).await,
        (&Method::POST, "/capture") => capture::handle(&state).await,
        (&Method::OPTIONS, _) => Ok(cors_preflight()),
        _ => Ok(json_error(StatusCode::NOT_FOUND, "Not found")),
    };

    let response = result.unwrap_or_else(|e| {
        sys_info!("[HTTP] {method} {path} -> {}: {e}", e.status());
        e.into_response()
    });
    Ok(response)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    state: SharedAppState,
    shutdown: impl Future<Output = ()>,
) -> Result<(), hyper::Error> {
    let make_svc = make_service_fn({
        let state = state.clone();

        move |_conn| {
            let state = state.clone();

            async move {
                Ok::<_, Infallible>(service_fn(move |req| handle_request(req, state.clone())))
            }
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_svc);

    sys_info!("[HTTP] Wound triage server listening on http://{addr}");
    sys_info!("[HTTP]   GET  /health        - Session health");
    sys_info!("[HTTP]   POST /analyze       - Classify base64 JSON or raw image body");
    sys_info!("[HTTP]   POST /analyze/path  - Classify an image already on disk");
    sys_info!("[HTTP]   POST /capture       - Capture an image from the camera");

    server.with_graceful_shutdown(shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_name_from_launch_args() {
        let launch = LaunchSpec::default();
        assert_eq!(model_name(&launch), "Efficient-Large-Model/VILA1.5-3b");

        let direct = LaunchSpec::direct("python3", vec!["worker.py".into()]);
        assert_eq!(model_name(&direct), "python3");
    }
}
