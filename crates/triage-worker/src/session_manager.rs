//! Session manager: one worker, one consumption thread, many callers.
//!
//! Callers only ever touch the request queue. A single thread owns the
//! worker process, takes requests off the queue in order, exchanges
//! prompt and response over the worker's pipes, and relaunches the worker
//! when it dies. Every request is resolved exactly once.
//!
//! Restart policy:
//! - write failure or worker exit: fail the request, then restart
//! - response timeout: fail the request, keep the worker (unless
//!   `restart_on_timeout`); leftover output is discarded before the next
//!   prompt
//! - relaunch failure: back off and retry up to `restart_max_attempts`,
//!   then enter `Failed` and refuse further work

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use triage_config::{ConfigError, LaunchSpec, SessionPolicy, TriageConfig};
use triage_types::{
    sys_error, sys_info, sys_warn, CancellationFlag, ClassificationFailure, ClassificationOutcome,
    ClassificationRequest, ClassificationResult, RequestId, SessionState, SessionStatus,
};

use crate::error::{SubmitError, WorkerError};
use crate::process_handle::WorkerProcess;
use crate::prompt::PromptBuilder;
use crate::request_queue::{request_queue, QueueConsumer, QueueProducer, QueuedRequest};
use crate::terminator::EndOfTurn;

/// Sleep granularity while waiting out restart pauses.
const SHUTDOWN_CHECK: Duration = Duration::from_millis(50);

/// Everything the session manager needs to run.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub launch: LaunchSpec,
    pub policy: SessionPolicy,
    pub rubric: String,
}

impl SessionConfig {
    pub fn from_config(config: &TriageConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            launch: config.launch.clone(),
            policy: config.session.clone(),
            rubric: config.prompt.resolve_rubric()?,
        })
    }
}

/// Shared reference handed to every ingress adapter.
pub type SharedSessionManager = Arc<SessionManager>;

pub struct SessionManager {
    producer: QueueProducer,
    status: Arc<Mutex<SessionStatus>>,
    shutdown: Arc<AtomicBool>,
    next_id: AtomicU64,
    consumer_thread: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    /// Launch the first worker and the consumption thread.
    ///
    /// A worker that fails to start here is fatal: the error is returned
    /// and nothing keeps running.
    pub fn start(config: SessionConfig) -> Result<Self, WorkerError> {
        let worker = WorkerProcess::start(&config.launch, 1)?;

        let status = Arc::new(Mutex::new(SessionStatus {
            state: SessionState::Running,
            session: Some(worker.session().clone()),
            ..SessionStatus::default()
        }));
        let shutdown = Arc::new(AtomicBool::new(false));
        let (producer, consumer) = request_queue(config.policy.queue_capacity);

        let consumption = ConsumptionLoop {
            terminator: EndOfTurn::from_policy(&config.policy),
            prompt: PromptBuilder::new(config.rubric, config.launch.clone()),
            launch: config.launch,
            policy: config.policy,
            worker: Some(worker),
            next_session: 2,
            consumer,
            status: status.clone(),
            shutdown: shutdown.clone(),
        };

        let handle = thread::Builder::new()
            .name("session-loop".to_string())
            .spawn(move || consumption.run())
            .map_err(|e| WorkerError::StartFailure {
                command: "session-loop".to_string(),
                reason: format!("cannot spawn consumption thread: {e}"),
                stderr: String::new(),
            })?;

        Ok(Self {
            producer,
            status,
            shutdown,
            next_id: AtomicU64::new(1),
            consumer_thread: Mutex::new(Some(handle)),
        })
    }

    /// Queue an image and get a handle to await its outcome.
    pub fn submit(&self, image: impl Into<PathBuf>) -> Result<PendingClassification, SubmitError> {
        self.ensure_accepting()?;

        let request = ClassificationRequest::new(self.next_request_id(), image);
        let (tx, rx) = oneshot::channel();
        let pending = PendingClassification {
            id: request.id,
            cancel: request.cancellation_flag(),
            rx,
        };

        self.producer.enqueue(QueuedRequest::new(request, Some(tx)))?;
        Ok(pending)
    }

    /// Queue an image whose outcome is only logged.
    pub fn submit_detached(&self, image: impl Into<PathBuf>) -> Result<RequestId, SubmitError> {
        self.ensure_accepting()?;

        let request = ClassificationRequest::new(self.next_request_id(), image);
        let id = request.id;
        self.producer.enqueue(QueuedRequest::detached(request))?;
        Ok(id)
    }

    pub fn status(&self) -> SessionStatus {
        let mut status = self
            .status
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default();
        status.queue_depth = self.producer.len();
        status
    }

    pub fn state(&self) -> SessionState {
        self.status.lock().map(|s| s.state).unwrap_or_default()
    }

    /// Stop the consumption loop, resolve queued requests with
    /// `ShutDown`, and terminate the worker. Waits for an in-flight
    /// exchange to finish first. Idempotent.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);

        let handle = self
            .consumer_thread
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());
        if let Some(handle) = handle {
            if handle.join().is_err() {
                sys_error!("[SESSION] Consumption thread panicked");
            }
        }
    }

    fn ensure_accepting(&self) -> Result<(), SubmitError> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(SubmitError::Stopped);
        }
        if let Ok(status) = self.status.lock() {
            match status.state {
                SessionState::Failed => {
                    let reason = status
                        .last_error
                        .clone()
                        .unwrap_or_else(|| "restart attempts exhausted".to_string());
                    return Err(SubmitError::Unavailable(reason));
                }
                SessionState::Stopped => return Err(SubmitError::Stopped),
                SessionState::Running | SessionState::Restarting => {}
            }
        }
        Ok(())
    }

    fn next_request_id(&self) -> RequestId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Caller's handle on a submitted request.
#[derive(Debug)]
pub struct PendingClassification {
    id: RequestId,
    cancel: CancellationFlag,
    rx: oneshot::Receiver<ClassificationOutcome>,
}

impl PendingClassification {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Ask the loop to skip this request. No effect once it was sent.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Wait up to `timeout` for the outcome.
    ///
    /// When the bound expires the request is cancelled (skipped if not yet
    /// sent) and `Busy` is returned.
    pub async fn await_result(mut self, timeout: Duration) -> ClassificationOutcome {
        match self.wait(timeout).await {
            Some(outcome) => outcome,
            None => Err(ClassificationFailure::Busy(timeout)),
        }
    }

    /// Like [`await_result`](Self::await_result), but keeps the handle when
    /// the bound expires: `None` means the request was cancelled and may
    /// still be in the worker's hands. [`settled`](Self::settled) then
    /// waits for the loop to be done with it.
    pub async fn wait(&mut self, timeout: Duration) -> Option<ClassificationOutcome> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(_)) => Some(Err(ClassificationFailure::ShutDown)),
            Err(_) => {
                self.cancel();
                None
            }
        }
    }

    /// Wait without bound for the final outcome: the answer, `Cancelled`
    /// when the loop skipped it, or `ShutDown`.
    pub async fn settled(self) -> ClassificationOutcome {
        self.rx.await.unwrap_or(Err(ClassificationFailure::ShutDown))
    }
}

/// State owned by the consumption thread.
struct ConsumptionLoop {
    launch: LaunchSpec,
    policy: SessionPolicy,
    prompt: PromptBuilder,
    terminator: EndOfTurn,
    worker: Option<WorkerProcess>,
    next_session: u64,
    consumer: QueueConsumer,
    status: Arc<Mutex<SessionStatus>>,
    shutdown: Arc<AtomicBool>,
}

impl ConsumptionLoop {
    fn run(mut self) {
        sys_info!("[SESSION] Consumption loop started");

        while !self.shutdown.load(Ordering::SeqCst) {
            let Some(item) = self.consumer.dequeue_with_timeout(self.policy.dequeue_poll()) else {
                continue;
            };
            self.service(item);
        }

        self.wind_down();
    }

    fn service(&mut self, item: QueuedRequest) {
        if item.request.is_cancelled() {
            deliver(item, Err(ClassificationFailure::Cancelled));
            return;
        }

        let Some(worker) = self.worker.as_mut() else {
            let reason = self
                .status
                .lock()
                .ok()
                .and_then(|s| s.last_error.clone())
                .unwrap_or_else(|| "no worker running".to_string());
            deliver(item, Err(ClassificationFailure::WorkerUnavailable(reason)));
            return;
        };

        let stale = worker.discard_pending_output();
        if stale > 0 {
            sys_warn!(
                "[SESSION] Discarded {stale} stale line(s) before request #{}",
                item.request.id
            );
        }

        set_status(&self.status, |s| s.in_flight = Some(item.request.id));
        let exchange = exchange(
            worker,
            &self.prompt,
            &self.terminator,
            self.policy.response_timeout(),
            &item.request,
        );
        set_status(&self.status, |s| s.in_flight = None);

        let restart_reason = match &exchange {
            Err(WorkerError::Timeout { .. }) if self.policy.restart_on_timeout => {
                Some("response timeout".to_string())
            }
            Err(WorkerError::Timeout { .. }) | Ok(_) => None,
            Err(e) => Some(e.to_string()),
        };

        let outcome = match exchange {
            Ok(result) => Ok(result),
            Err(WorkerError::Timeout { .. }) => Err(ClassificationFailure::TimedOut(
                self.policy.response_timeout(),
            )),
            Err(e @ WorkerError::WriteFailure { .. }) => {
                Err(ClassificationFailure::WriteFailed(e.to_string()))
            }
            Err(e) => Err(ClassificationFailure::WorkerCrashed(e.to_string())),
        };

        // The affected request is failed back before the (slow) restart.
        deliver(item, outcome);

        if let Some(reason) = restart_reason {
            self.restart(&reason);
        }
    }

    fn restart(&mut self, reason: &str) {
        sys_warn!("[SESSION] Restarting worker: {reason}");
        self.update_status(|s| {
            s.state = SessionState::Restarting;
            s.last_error = Some(reason.to_string());
        });

        if let Some(mut old) = self.worker.take() {
            old.terminate();
        }
        self.update_status(|s| s.session = None);

        if !self.pause(self.policy.restart_grace()) {
            return;
        }

        let max_attempts = self.policy.restart_max_attempts;
        for attempt in 1..=max_attempts {
            match WorkerProcess::start(&self.launch, self.next_session) {
                Ok(worker) => {
                    self.next_session += 1;
                    let session = worker.session().clone();
                    sys_info!(
                        "[SESSION] Worker restarted as session {} (pid={})",
                        session.number,
                        session.pid
                    );
                    self.update_status(|s| {
                        s.state = SessionState::Running;
                        s.session = Some(session);
                        s.restarts += 1;
                    });
                    self.worker = Some(worker);
                    return;
                }
                Err(e) => {
                    sys_error!("[SESSION] Restart attempt {attempt}/{max_attempts} failed: {e}");
                    self.update_status(|s| s.last_error = Some(e.to_string()));
                    if attempt < max_attempts && !self.pause(self.policy.restart_backoff(attempt)) {
                        return;
                    }
                }
            }
        }

        sys_error!(
            "[SESSION] Worker could not be restarted after {max_attempts} attempts; refusing further requests"
        );
        self.update_status(|s| s.state = SessionState::Failed);
    }

    /// Sleep for `duration` unless shutdown is requested first.
    fn pause(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            if self.shutdown.load(Ordering::SeqCst) {
                return false;
            }
            thread::sleep(SHUTDOWN_CHECK.min(deadline.saturating_duration_since(Instant::now())));
        }
        !self.shutdown.load(Ordering::SeqCst)
    }

    fn wind_down(&mut self) {
        let leftover = self.consumer.drain();
        if !leftover.is_empty() {
            sys_info!(
                "[SESSION] Resolving {} queued request(s) as shut down",
                leftover.len()
            );
        }
        for item in leftover {
            deliver(item, Err(ClassificationFailure::ShutDown));
        }

        if let Some(mut worker) = self.worker.take() {
            worker.terminate();
        }
        self.update_status(|s| {
            s.state = SessionState::Stopped;
            s.session = None;
            s.in_flight = None;
        });
        sys_info!("[SESSION] Consumption loop stopped");
    }

    fn update_status(&self, f: impl FnOnce(&mut SessionStatus)) {
        set_status(&self.status, f);
    }
}

fn set_status(status: &Mutex<SessionStatus>, f: impl FnOnce(&mut SessionStatus)) {
    if let Ok(mut status) = status.lock() {
        f(&mut status);
    }
}

/// One prompt/response round trip.
fn exchange(
    worker: &mut WorkerProcess,
    prompt: &PromptBuilder,
    terminator: &EndOfTurn,
    timeout: Duration,
    request: &ClassificationRequest,
) -> Result<ClassificationResult, WorkerError> {
    sys_info!(
        "[SESSION] Request #{} -> session {}: {}",
        request.id,
        worker.session().number,
        request.image.display()
    );

    let started = Instant::now();
    worker.send(&prompt.build(request.image()))?;
    let response = worker.receive_until(terminator, timeout)?;

    Ok(ClassificationResult {
        request_id: request.id,
        image: request.image.clone(),
        text: terminator.strip(&response.terminal),
        elapsed: started.elapsed(),
        session: worker.session().number,
        worker_pid: worker.pid(),
    })
}

fn deliver(item: QueuedRequest, outcome: ClassificationOutcome) {
    let id = item.request.id;
    match &outcome {
        Ok(result) => sys_info!(
            "[SESSION] Request #{id} ({}): {} [{:.2}s]",
            result.image.display(),
            result.text,
            result.elapsed.as_secs_f64()
        ),
        Err(failure) => sys_warn!(
            "[SESSION] Request #{id} ({}) failed: {failure}",
            item.request.image.display()
        ),
    }
    item.resolve(outcome);
}
