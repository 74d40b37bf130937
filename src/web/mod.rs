//! HTTP ingress (hyper).
//!
//! Handlers never touch the worker: they submit to the shared session
//! manager and await the outcome with a bound from `http.result_wait_secs`.

pub mod error;
pub mod request_parsing;
pub mod response_helpers;
pub mod routes;
pub mod server;

pub use error::ApiError;
pub use server::{handle_request, serve, AppState, SharedAppState};
