//! Worker and submission error types.

use std::time::Duration;

use thiserror::Error;

/// Failures talking to the worker process.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The process could not be launched or exited straight away.
    #[error("failed to start worker `{command}`: {reason}{}", stderr_suffix(.stderr))]
    StartFailure {
        command: String,
        reason: String,
        stderr: String,
    },

    /// The prompt could not be written (pipe closed or process gone).
    #[error("failed to write to worker stdin: {reason}")]
    WriteFailure { reason: String },

    /// No terminal line arrived within the bound.
    #[error("no end-of-turn marker after {elapsed:?} ({} lines read)", .lines.len())]
    Timeout {
        elapsed: Duration,
        lines: Vec<String>,
    },

    /// The process died while a response was expected.
    #[error("worker exited ({status}){}", stderr_suffix(.stderr))]
    ProcessExited { status: String, stderr: String },
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.trim().is_empty() {
        String::new()
    } else {
        format!("; stderr: {}", stderr.trim())
    }
}

/// Why a request could not be enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// Bounded queue is full; the request was not accepted.
    #[error("request queue is full ({capacity} pending)")]
    QueueFull { capacity: usize },

    /// The session manager has been stopped.
    #[error("session manager is stopped")]
    Stopped,

    /// Restart attempts were exhausted; no worker will serve requests.
    #[error("worker unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_message_includes_stderr() {
        let err = WorkerError::ProcessExited {
            status: "exit status: 3".into(),
            stderr: "CUDA out of memory\n".into(),
        };
        assert_eq!(
            err.to_string(),
            "worker exited (exit status: 3); stderr: CUDA out of memory"
        );
    }

    #[test]
    fn test_start_failure_without_stderr() {
        let err = WorkerError::StartFailure {
            command: "jetson-containers run".into(),
            reason: "No such file or directory".into(),
            stderr: String::new(),
        };
        assert_eq!(
            err.to_string(),
            "failed to start worker `jetson-containers run`: No such file or directory"
        );
    }
}
