//! FIFO of pending classification requests.
//!
//! Any number of producers enqueue; exactly one consumer (the session's
//! consumption loop) dequeues. Enqueue never blocks: a bounded queue that
//! is full rejects the request up front instead of dropping it later.

use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tokio::sync::oneshot;

use triage_types::{ClassificationOutcome, ClassificationRequest};

use crate::error::SubmitError;

/// A request plus the channel its outcome goes back on.
///
/// Detached requests (filesystem ingress) have no reply channel; their
/// outcome is only logged.
#[derive(Debug)]
pub struct QueuedRequest {
    pub request: ClassificationRequest,
    reply: Option<oneshot::Sender<ClassificationOutcome>>,
}

impl QueuedRequest {
    pub fn new(
        request: ClassificationRequest,
        reply: Option<oneshot::Sender<ClassificationOutcome>>,
    ) -> Self {
        Self { request, reply }
    }

    pub fn detached(request: ClassificationRequest) -> Self {
        Self::new(request, None)
    }

    pub fn is_detached(&self) -> bool {
        self.reply.is_none()
    }

    /// Deliver the outcome. Consumes the request, so it resolves once.
    pub fn resolve(self, outcome: ClassificationOutcome) {
        if let Some(reply) = self.reply {
            // Caller may have given up waiting; nothing left to notify.
            let _ = reply.send(outcome);
        }
    }
}

/// Producer half; cheap to clone.
#[derive(Debug, Clone)]
pub struct QueueProducer {
    tx: Sender<QueuedRequest>,
}

impl QueueProducer {
    pub fn enqueue(&self, item: QueuedRequest) -> Result<(), SubmitError> {
        match self.tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SubmitError::QueueFull {
                capacity: self.tx.capacity().unwrap_or_default(),
            }),
            Err(TrySendError::Disconnected(_)) => Err(SubmitError::Stopped),
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

/// Consumer half, owned by the consumption loop.
#[derive(Debug)]
pub struct QueueConsumer {
    rx: Receiver<QueuedRequest>,
}

impl QueueConsumer {
    /// Wait up to `timeout` for the next request.
    pub fn dequeue_with_timeout(&self, timeout: Duration) -> Option<QueuedRequest> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Take everything still queued, in order.
    pub fn drain(&self) -> Vec<QueuedRequest> {
        self.rx.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Create a queue; `None` capacity means unbounded.
pub fn request_queue(capacity: Option<usize>) -> (QueueProducer, QueueConsumer) {
    let (tx, rx) = match capacity {
        Some(cap) => crossbeam_channel::bounded(cap),
        None => crossbeam_channel::unbounded(),
    };
    (QueueProducer { tx }, QueueConsumer { rx })
}
