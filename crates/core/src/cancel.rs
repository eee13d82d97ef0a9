//! Cooperative cancellation for long-running background work

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Shared cancellation flag
///
/// Clones observe the same state. Workers poll [`is_cancelled`] at safe
/// points (between pages of an export, before committing output) and stop
/// early when it is set.
///
/// # Example
///
/// ```
/// use pdf_annotator_core::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// ```
///
/// [`is_cancelled`]: CancellationToken::is_cancelled
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Idempotent; every clone observes the cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
