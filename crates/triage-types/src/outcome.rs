//! Terminal outcomes of a classification request.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::request::RequestId;

/// Classification text produced by the worker for one image.
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationResult {
    pub request_id: RequestId,
    pub image: PathBuf,
    /// Terminal response line with the end-of-turn marker removed.
    pub text: String,
    /// Time from sending the prompt to reading the terminal line.
    pub elapsed: Duration,
    /// Session number of the worker that answered.
    pub session: u64,
    pub worker_pid: u32,
}

/// Why a request did not produce a classification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassificationFailure {
    /// No end-of-turn line arrived within the response timeout.
    #[error("worker did not finish its response within {0:?}")]
    TimedOut(Duration),

    /// The worker process exited while the request was in flight.
    #[error("worker process exited mid-exchange: {0}")]
    WorkerCrashed(String),

    /// Writing the prompt to the worker failed.
    #[error("failed to send prompt to worker: {0}")]
    WriteFailed(String),

    /// The caller cancelled before the request reached the worker.
    #[error("request cancelled before it was sent to the worker")]
    Cancelled,

    /// The caller's wait bound expired while other exchanges were running.
    #[error("model is busy processing another image (waited {0:?})")]
    Busy(Duration),

    /// The session manager stopped before servicing the request.
    #[error("session manager shut down before the request was serviced")]
    ShutDown,

    /// Restart attempts are exhausted; no worker is available.
    #[error("worker unavailable: {0}")]
    WorkerUnavailable(String),
}

impl ClassificationFailure {
    /// Conditions a caller can safely retry as a whole request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TimedOut(_) | Self::Busy(_))
    }
}

/// What the consumption loop delivers for every request, exactly once.
pub type ClassificationOutcome = Result<ClassificationResult, ClassificationFailure>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_failures() {
        assert!(ClassificationFailure::TimedOut(Duration::from_secs(30)).is_retryable());
        assert!(ClassificationFailure::Busy(Duration::from_secs(1)).is_retryable());
        assert!(!ClassificationFailure::WorkerCrashed("exit 1".into()).is_retryable());
        assert!(!ClassificationFailure::ShutDown.is_retryable());
    }

    #[test]
    fn test_busy_message_matches_http_wording() {
        let msg = ClassificationFailure::Busy(Duration::from_secs(2)).to_string();
        assert!(msg.starts_with("model is busy processing another image"));
    }
}
