// Shared fixtures for session manager tests.
//
// Workers are small `sh` scripts speaking the same line protocol as the
// real model: prompt lines are echoed back with ">> ", and the answer ends
// with "</s>". Image names steer the script's behaviour.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tempfile::TempDir;
use triage_config::{LaunchSpec, SessionPolicy};
use triage_types::SessionState;
use triage_worker::{SessionConfig, SessionManager};

/// Scripted worker.
///
/// - `*crash.jpg`: writes to stderr and exits with status 3
/// - `*slow.jpg`: sleeps two seconds before answering
/// - `*hang.jpg`: never answers
/// - anything else: answers immediately
///
/// Every image path is appended to `$LOG` when it is read. When the file
/// named by `$FLAG` exists, the worker exits at startup.
pub const SCRIPTED_WORKER: &str = r#"
if [ -n "$FLAG" ] && [ -f "$FLAG" ]; then
  echo "model failed to load" >&2
  exit 1
fi
img=""
hang=0
while IFS= read -r line; do
  case "$line" in
    "") continue ;;
    *.jpg)
      img="$line"
      echo ">> $line"
      if [ -n "$LOG" ]; then echo "$img" >> "$LOG"; fi
      case "$img" in
        *crash.jpg) echo "CUDA error: out of memory" >&2; exit 3 ;;
        *slow.jpg) sleep 2 ;;
        *hang.jpg) hang=1 ;;
      esac
      ;;
    *)
      echo ">> $line"
      if [ "$hang" = 1 ]; then hang=0; continue; fi
      echo "classification: $(basename "$img") Minor cut {400, 4}</s>"
      ;;
  esac
done
"#;

pub struct Harness {
    pub dir: TempDir,
    pub config: SessionConfig,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");

        let mut launch = LaunchSpec::direct("sh", vec!["-c".into(), SCRIPTED_WORKER.into()]);
        launch.startup_probe_ms = 100;
        launch.terminate_grace_ms = 500;
        launch
            .env
            .insert("LOG".into(), dir.path().join("seen.log").display().to_string());
        launch
            .env
            .insert("FLAG".into(), dir.path().join("broken").display().to_string());

        let policy = SessionPolicy {
            response_timeout_secs: 5,
            dequeue_poll_ms: 50,
            restart_grace_ms: 50,
            restart_max_attempts: 2,
            restart_backoff_ms: 10,
            restart_backoff_max_ms: 100,
            ..SessionPolicy::default()
        };

        Self {
            dir,
            config: SessionConfig {
                launch,
                policy,
                rubric: "Classify the wound.".to_string(),
            },
        }
    }

    pub fn start(&self) -> SessionManager {
        SessionManager::start(self.config.clone()).expect("worker should start")
    }

    /// Image paths in the order the worker read them.
    pub fn seen(&self) -> Vec<String> {
        std::fs::read_to_string(self.dir.path().join("seen.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Make every subsequent worker launch fail.
    pub fn break_worker(&self) {
        std::fs::write(self.dir.path().join("broken"), b"").expect("write flag");
    }

    pub fn image(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

pub fn name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Poll until `predicate` holds or `bound` elapses.
pub fn wait_for(
    manager: &SessionManager,
    bound: Duration,
    predicate: impl Fn(&SessionManager) -> bool,
) -> bool {
    let deadline = Instant::now() + bound;
    while Instant::now() < deadline {
        if predicate(manager) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    predicate(manager)
}

pub fn wait_for_state(manager: &SessionManager, state: SessionState, bound: Duration) -> bool {
    wait_for(manager, bound, |m| m.state() == state)
}
