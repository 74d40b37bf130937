//! Per-concern configuration sections.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Capture args containing this token get the output file path.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

const DEFAULT_RUBRIC: &str = "You are given an image of a cartoon wound. Output the following based on how the wound would be classified on a human.

{0, 0}: No wound
{0, 0}: Minor bruise or scratch
{50, 2}: Minor cut
{250, 4}: Moderate bruise or cut
{500, 6}: Large cut
{1000, 10}: Non-fatal gunshot or stab wound
{1200, 12}: Fatal wound";

/// Consumption loop and restart policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionPolicy {
    pub response_timeout_secs: u64,
    /// Bounded wait on the queue so the loop can notice shutdown.
    pub dequeue_poll_ms: u64,
    /// Pause between terminating a dead worker and launching a new one.
    pub restart_grace_ms: u64,
    pub restart_max_attempts: u32,
    /// First backoff after a failed relaunch; doubles per attempt.
    pub restart_backoff_ms: u64,
    pub restart_backoff_max_ms: u64,
    /// Also restart the worker after a response timeout.
    pub restart_on_timeout: bool,
    /// `None` keeps the queue unbounded.
    pub queue_capacity: Option<usize>,
    pub end_of_turn_marker: String,
    /// Lines starting with this are prompt echoes, never responses.
    pub echo_prefix: String,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            response_timeout_secs: 30,
            dequeue_poll_ms: 1000,
            restart_grace_ms: 2000,
            restart_max_attempts: 5,
            restart_backoff_ms: 1000,
            restart_backoff_max_ms: 30_000,
            restart_on_timeout: false,
            queue_capacity: None,
            end_of_turn_marker: "</s>".to_string(),
            echo_prefix: ">>".to_string(),
        }
    }
}

impl SessionPolicy {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    pub fn dequeue_poll(&self) -> Duration {
        Duration::from_millis(self.dequeue_poll_ms)
    }

    pub fn restart_grace(&self) -> Duration {
        Duration::from_millis(self.restart_grace_ms)
    }

    /// Backoff before relaunch attempt `attempt` (1-based), capped.
    pub fn restart_backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let ms = self
            .restart_backoff_ms
            .saturating_mul(factor)
            .min(self.restart_backoff_max_ms);
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub rubric: String,
    /// When set, the rubric is read from this file instead.
    pub rubric_file: Option<PathBuf>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            rubric: DEFAULT_RUBRIC.to_string(),
            rubric_file: None,
        }
    }
}

impl PromptConfig {
    pub fn resolve_rubric(&self) -> Result<String, ConfigError> {
        match &self.rubric_file {
            Some(path) => std::fs::read_to_string(path)
                .map(|s| s.trim().to_string())
                .map_err(|e| ConfigError::io(path, e)),
            None => Ok(self.rubric.trim().to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub dir: PathBuf,
    /// Lower-case extensions without the dot.
    pub extensions: Vec<String>,
    /// Minimum time a new file must exist, unchanged, before it is queued.
    pub settle_ms: u64,
    pub poll_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./captured_images"),
            extensions: vec!["jpg".into(), "jpeg".into(), "png".into()],
            settle_ms: 1000,
            poll_ms: 500,
        }
    }
}

impl WatchConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    /// Where uploaded images are written before classification.
    pub upload_dir: PathBuf,
    /// Upper bound a request handler waits for its result.
    pub result_wait_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8050,
            upload_dir: PathBuf::from("./captured_images"),
            result_wait_secs: 60,
        }
    }
}

impl HttpConfig {
    pub fn result_wait(&self) -> Duration {
        Duration::from_secs(self.result_wait_secs)
    }
}

/// Camera capture command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub program: String,
    pub args: Vec<String>,
    pub output_dir: PathBuf,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            program: "fswebcam".to_string(),
            args: vec![
                "-r".into(),
                "1280x720".into(),
                "--no-banner".into(),
                OUTPUT_PLACEHOLDER.into(),
            ],
            output_dir: PathBuf::from("./captured_images"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: PathBuf::from("logs"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = SessionPolicy {
            restart_backoff_ms: 1000,
            restart_backoff_max_ms: 5000,
            ..SessionPolicy::default()
        };
        assert_eq!(policy.restart_backoff(1), Duration::from_millis(1000));
        assert_eq!(policy.restart_backoff(2), Duration::from_millis(2000));
        assert_eq!(policy.restart_backoff(3), Duration::from_millis(4000));
        assert_eq!(policy.restart_backoff(4), Duration::from_millis(5000));
        assert_eq!(policy.restart_backoff(40), Duration::from_millis(5000));
    }

    #[test]
    fn test_default_rubric_has_scores() {
        let rubric = PromptConfig::default().resolve_rubric().unwrap();
        assert!(rubric.contains("{50, 2}: Minor cut"));
        assert!(!rubric.ends_with('\n'));
    }

    #[test]
    fn test_rubric_file_overrides_inline() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "  Score this wound.  ").unwrap();

        let prompt = PromptConfig {
            rubric: "ignored".into(),
            rubric_file: Some(file.path().to_path_buf()),
        };
        assert_eq!(prompt.resolve_rubric().unwrap(), "Score this wound.");
    }

    #[test]
    fn test_capture_default_has_output_placeholder() {
        assert!(CaptureConfig::default()
            .args
            .iter()
            .any(|a| a == OUTPUT_PLACEHOLDER));
    }
}
