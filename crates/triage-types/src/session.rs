//! Observable state of the worker session.

use std::fmt;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::request::RequestId;

/// Identity of one continuous lifetime of the worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerSession {
    /// Increments on every (re)start; 1 for the first worker.
    pub number: u64,
    pub pid: u32,
    pub started_at: DateTime<Local>,
}

impl WorkerSession {
    pub fn new(number: u64, pid: u32) -> Self {
        Self {
            number,
            pid,
            started_at: Local::now(),
        }
    }

    pub fn uptime_secs(&self) -> i64 {
        (Local::now() - self.started_at).num_seconds()
    }
}

/// Session manager state machine.
///
/// `Stopped` is terminal once an explicit stop was requested; `Failed` is
/// terminal once restart attempts are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Stopped,
    Running,
    Restarting,
    Failed,
}

impl SessionState {
    pub fn is_serving(self) -> bool {
        matches!(self, Self::Running | Self::Restarting)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Restarting => "restarting",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Point-in-time snapshot published by the consumption loop.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub session: Option<WorkerSession>,
    pub restarts: u32,
    pub in_flight: Option<RequestId>,
    pub queue_depth: usize,
    pub last_error: Option<String>,
}

impl SessionStatus {
    pub fn is_processing(&self) -> bool {
        self.in_flight.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serializes_lowercase() {
        let json = serde_json::to_string(&SessionState::Restarting).unwrap();
        assert_eq!(json, r#""restarting""#);
        assert_eq!(SessionState::Failed.to_string(), "failed");
    }

    #[test]
    fn test_serving_states() {
        assert!(SessionState::Running.is_serving());
        assert!(SessionState::Restarting.is_serving());
        assert!(!SessionState::Failed.is_serving());
        assert!(!SessionState::Stopped.is_serving());
    }

    #[test]
    fn test_default_status_is_idle() {
        let status = SessionStatus::default();
        assert_eq!(status.state, SessionState::Stopped);
        assert!(!status.is_processing());
        assert!(status.session.is_none());
    }
}
