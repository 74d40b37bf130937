//! Shared data model for the wound triage service.
//!
//! Everything that crosses a crate boundary lives here: the request a
//! producer enqueues, the outcome the consumption loop resolves it with,
//! and the observable state of the worker session.

pub mod logging;
pub mod outcome;
pub mod request;
pub mod session;

pub use outcome::{ClassificationFailure, ClassificationOutcome, ClassificationResult};
pub use request::{CancellationFlag, ClassificationRequest, RequestId};
pub use session::{SessionState, SessionStatus, WorkerSession};

#[doc(hidden)]
pub use log as __log;
