//! Classification requests as they travel through the queue.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local};

/// Monotonic id assigned by the session manager at submit time.
pub type RequestId = u64;

/// Flag the caller flips to ask the consumption loop to skip a request.
pub type CancellationFlag = Arc<AtomicBool>;

/// One image waiting to be classified.
///
/// Created by an ingress adapter, consumed exactly once by the
/// consumption loop, never mutated in between (the cancellation flag is
/// shared with the caller, not owned by the request).
#[derive(Debug, Clone)]
pub struct ClassificationRequest {
    pub id: RequestId,
    pub image: PathBuf,
    pub enqueued_at: DateTime<Local>,
    cancel: CancellationFlag,
}

impl ClassificationRequest {
    pub fn new(id: RequestId, image: impl Into<PathBuf>) -> Self {
        Self {
            id,
            image: image.into(),
            enqueued_at: Local::now(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn image(&self) -> &Path {
        &self.image
    }

    /// Handle the caller keeps to cancel this request later.
    pub fn cancellation_flag(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_flag_is_shared() {
        let request = ClassificationRequest::new(7, "/tmp/wound_001.jpg");
        assert!(!request.is_cancelled());

        let flag = request.cancellation_flag();
        flag.store(true, Ordering::SeqCst);
        assert!(request.is_cancelled());
    }

    #[test]
    fn test_image_path_is_kept() {
        let request = ClassificationRequest::new(1, "captured_images/a.png");
        assert_eq!(request.image(), Path::new("captured_images/a.png"));
        assert_eq!(request.id, 1);
    }
}
