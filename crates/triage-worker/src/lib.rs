//! Persistent worker session.
//!
//! Launches the containerised inference worker once, keeps it alive across
//! requests, serialises access to its stdin/stdout through a single
//! consumption thread, and relaunches it when it dies.
//!
//! - [`process_handle`]: one child process and its pipes
//! - [`request_queue`]: FIFO between any number of producers and the loop
//! - [`session_manager`]: the loop, restart policy and caller-facing API

pub mod error;
pub mod process_handle;
pub mod prompt;
pub mod request_queue;
pub mod session_manager;
pub mod terminator;

pub use error::{SubmitError, WorkerError};
pub use process_handle::{ResponseLines, WorkerProcess};
pub use prompt::PromptBuilder;
pub use request_queue::{request_queue, QueueConsumer, QueueProducer, QueuedRequest};
pub use session_manager::{
    PendingClassification, SessionConfig, SessionManager, SharedSessionManager,
};
pub use terminator::{EndOfTurn, Terminator};
