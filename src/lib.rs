//! Wound triage service.
//!
//! Ingress adapters around the persistent worker session in
//! `triage-worker`: an HTTP API, a directory watcher, and camera capture.
//! Both binaries share the logging and CLI setup defined here.

pub mod camera;
pub mod cli;
pub mod logging;
pub mod watch;
pub mod web;

pub use triage_types::{sys_debug, sys_error, sys_info, sys_warn};
