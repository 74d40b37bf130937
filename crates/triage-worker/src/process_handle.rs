//! Worker process lifecycle.
//!
//! Spawns the inference worker with piped stdio, reads its stdout on a
//! dedicated thread (pipe reads block), keeps a tail of its stderr for
//! diagnostics, and terminates it with SIGTERM before falling back to a
//! hard kill.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use triage_config::LaunchSpec;
use triage_types::{sys_debug, sys_info, sys_warn, WorkerSession};

use crate::error::WorkerError;
use crate::terminator::Terminator;

/// Stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 200;

/// Granularity of exit checks while waiting on output.
const EXIT_POLL: Duration = Duration::from_millis(50);

/// How long to wait for the stderr reader to reach EOF after an exit.
const STDERR_SETTLE: Duration = Duration::from_millis(500);

/// Lines read during one exchange.
#[derive(Debug, Clone)]
pub struct ResponseLines {
    /// Every line read, echoes included, in arrival order.
    pub lines: Vec<String>,
    /// The line that satisfied the terminator.
    pub terminal: String,
}

#[derive(Debug, Clone, Default)]
struct StderrTail(Arc<Mutex<VecDeque<String>>>);

impl StderrTail {
    fn push(&self, line: String) {
        if let Ok(mut tail) = self.0.lock() {
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    }

    fn snapshot(&self) -> String {
        self.0
            .lock()
            .map(|tail| tail.iter().cloned().collect::<Vec<_>>().join("\n"))
            .unwrap_or_default()
    }
}

/// One running instance of the worker.
pub struct WorkerProcess {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    lines: Receiver<String>,
    stderr_tail: StderrTail,
    stderr_reader: Option<JoinHandle<()>>,
    session: WorkerSession,
    terminate_grace: Duration,
    exit_status: Option<ExitStatus>,
}

impl WorkerProcess {
    /// Launch the worker and make sure it survives its first `startup_probe_ms`.
    ///
    /// `number` identifies the session in logs and results.
    pub fn start(spec: &LaunchSpec, number: u64) -> Result<Self, WorkerError> {
        let display = spec.display_command();
        sys_info!("[WORKER] Starting session {number}: {display}");

        let start_failure = |reason: String, stderr: String| WorkerError::StartFailure {
            command: display.clone(),
            reason,
            stderr,
        };

        let mut command = Command::new(&spec.program);
        command
            .args(spec.command_args())
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| start_failure(e.to_string(), String::new()))?;

        let pipes = (child.stdin.take(), child.stdout.take(), child.stderr.take());
        let (Some(stdin), Some(stdout), Some(stderr)) = pipes else {
            reap(&mut child);
            return Err(start_failure("worker stdio not piped".into(), String::new()));
        };

        let (line_tx, line_rx) = crossbeam_channel::unbounded::<String>();
        let stderr_tail = StderrTail::default();

        let readers = spawn_stdout_reader(number, stdout, line_tx).and_then(|_| {
            spawn_stderr_reader(number, stderr, stderr_tail.clone())
        });
        let stderr_reader = match readers {
            Ok(handle) => handle,
            Err(e) => {
                reap(&mut child);
                return Err(start_failure(
                    format!("cannot spawn reader thread: {e}"),
                    String::new(),
                ));
            }
        };

        let session = WorkerSession::new(number, child.id());
        let mut worker = Self {
            child: Some(child),
            stdin: Some(stdin),
            lines: line_rx,
            stderr_tail,
            stderr_reader: Some(stderr_reader),
            session,
            terminate_grace: Duration::from_millis(spec.terminate_grace_ms),
            exit_status: None,
        };

        // A broken launch (bad image, missing runtime) usually dies at once.
        thread::sleep(Duration::from_millis(spec.startup_probe_ms));
        if let Some(status) = worker.poll_exit() {
            let stderr = worker.stderr_after_exit();
            worker.child = None;
            return Err(start_failure(format!("exited during startup ({status})"), stderr));
        }

        sys_info!(
            "[WORKER] Session {number} running (pid={})",
            worker.session.pid
        );
        Ok(worker)
    }

    pub fn session(&self) -> &WorkerSession {
        &self.session
    }

    pub fn pid(&self) -> u32 {
        self.session.pid
    }

    pub fn is_alive(&mut self) -> bool {
        self.child.is_some() && self.poll_exit().is_none()
    }

    /// Write `text` plus a newline to the worker and flush.
    pub fn send(&mut self, text: &str) -> Result<(), WorkerError> {
        if let Some(status) = self.poll_exit() {
            return Err(WorkerError::WriteFailure {
                reason: format!("worker already exited ({status})"),
            });
        }
        let stdin = self.stdin.as_mut().ok_or_else(|| WorkerError::WriteFailure {
            reason: "stdin closed".to_string(),
        })?;

        writeln!(stdin, "{text}")
            .and_then(|_| stdin.flush())
            .map_err(|e| WorkerError::WriteFailure {
                reason: e.to_string(),
            })
    }

    /// Read lines until one satisfies `terminator`, the worker exits, or
    /// `timeout` elapses. Never blocks longer than `timeout`.
    ///
    /// Lines already written by a worker that has since exited are still
    /// delivered before the exit is reported.
    pub fn receive_until(
        &mut self,
        terminator: &dyn Terminator,
        timeout: Duration,
    ) -> Result<ResponseLines, WorkerError> {
        let started = Instant::now();
        let mut lines = Vec::new();

        loop {
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(WorkerError::Timeout { elapsed, lines });
            }

            match self.lines.recv_timeout((timeout - elapsed).min(EXIT_POLL)) {
                Ok(line) => {
                    if let Some(response) = self.accept_line(line, terminator, &mut lines) {
                        return Ok(response);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(status) = self.poll_exit() {
                        // The reader thread may not have forwarded the last
                        // lines yet.
                        while let Ok(line) = self.lines.recv_timeout(STDERR_SETTLE) {
                            if let Some(response) = self.accept_line(line, terminator, &mut lines) {
                                return Ok(response);
                            }
                        }
                        return Err(self.exited(Some(status)));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    // stdout hit EOF; the process is on its way out.
                    let status = self.wait_exit(STDERR_SETTLE);
                    return Err(self.exited(status));
                }
            }
        }
    }

    fn accept_line(
        &self,
        line: String,
        terminator: &dyn Terminator,
        lines: &mut Vec<String>,
    ) -> Option<ResponseLines> {
        sys_debug!("[WORKER] session {} stdout: {line}", self.session.number);
        let done = terminator.is_terminal(&line);
        lines.push(line);
        done.then(|| ResponseLines {
            terminal: lines.last().cloned().unwrap_or_default(),
            lines: std::mem::take(lines),
        })
    }

    /// Drop output left over from an earlier exchange (e.g. a reply that
    /// arrived after its request timed out). Returns how many lines went.
    pub fn discard_pending_output(&mut self) -> usize {
        let stale: Vec<String> = self.lines.try_iter().collect();
        for line in &stale {
            sys_debug!("[WORKER] session {} discarding: {line}", self.session.number);
        }
        stale.len()
    }

    /// Stop the worker: close stdin, SIGTERM, wait up to the grace period,
    /// then kill. Safe to call any number of times.
    pub fn terminate(&mut self) {
        drop(self.stdin.take());

        let Some(mut child) = self.child.take() else {
            return;
        };

        if let Ok(Some(status)) = child.try_wait() {
            self.exit_status = Some(status);
            return;
        }

        sys_info!(
            "[WORKER] Terminating session {} (pid={})",
            self.session.number,
            self.session.pid
        );
        request_termination(&mut child);

        let deadline = Instant::now() + self.terminate_grace;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    self.exit_status = Some(status);
                    break;
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(EXIT_POLL),
                _ => {
                    sys_warn!(
                        "[WORKER] Session {} ignored SIGTERM, killing",
                        self.session.number
                    );
                    let _ = child.kill();
                    if let Ok(status) = child.wait() {
                        self.exit_status = Some(status);
                    }
                    break;
                }
            }
        }
    }

    /// Last lines the worker wrote to stderr.
    pub fn stderr_tail(&self) -> String {
        self.stderr_tail.snapshot()
    }

    fn poll_exit(&mut self) -> Option<ExitStatus> {
        if self.exit_status.is_none() {
            if let Some(child) = self.child.as_mut() {
                if let Ok(Some(status)) = child.try_wait() {
                    self.exit_status = Some(status);
                }
            }
        }
        self.exit_status
    }

    fn wait_exit(&mut self, bound: Duration) -> Option<ExitStatus> {
        let deadline = Instant::now() + bound;
        loop {
            if let Some(status) = self.poll_exit() {
                return Some(status);
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(EXIT_POLL);
        }
    }

    fn stderr_after_exit(&mut self) -> String {
        if let Some(reader) = self.stderr_reader.take() {
            let deadline = Instant::now() + STDERR_SETTLE;
            while !reader.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
        }
        self.stderr_tail.snapshot()
    }

    fn exited(&mut self, status: Option<ExitStatus>) -> WorkerError {
        let status = status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "stdout closed".to_string());
        WorkerError::ProcessExited {
            status,
            stderr: self.stderr_after_exit(),
        }
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn spawn_stdout_reader(
    number: u64,
    stdout: impl Read + Send + 'static,
    line_tx: Sender<String>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("worker-{number}-stdout"))
        .spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                match line {
                    Ok(l) if !l.trim().is_empty() => {
                        if line_tx.send(l.trim_end().to_string()).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        sys_warn!("[WORKER] session {number} stdout read error: {e}");
                        break;
                    }
                }
            }
            sys_debug!("[WORKER] session {number} stdout reader exiting");
        })
}

fn spawn_stderr_reader(
    number: u64,
    stderr: impl Read + Send + 'static,
    tail: StderrTail,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("worker-{number}-stderr"))
        .spawn(move || {
            let reader = BufReader::new(stderr);
            for line in reader.lines().map_while(Result::ok) {
                sys_debug!("[WORKER] session {number} stderr: {line}");
                tail.push(line);
            }
        })
}

#[cfg(unix)]
fn request_termination(child: &mut Child) {
    let Ok(pid) = libc::pid_t::try_from(child.id()) else {
        let _ = child.kill();
        return;
    };
    // SAFETY: kill(2) on a child we spawned and have not reaped yet.
    let result = unsafe { libc::kill(pid, libc::SIGTERM) };
    if result != 0 {
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) {
    let _ = child.kill();
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}
