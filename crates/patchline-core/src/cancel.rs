//! Cooperative cancellation
//!
//! A [`CancelFlag`] is a cheap, cloneable handle. Long-running loops poll
//! [`CancelFlag::is_cancelled`] between units of work (chunks, archive
//! entries); async waits can race against [`CancelFlag::cancelled`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<CancelInner>,
}

impl CancelFlag {
    /// Create a flag in the "not cancelled" state
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Returns `true` if this call flipped the flag.
    pub fn cancel(&self) -> bool {
        let first = !self.inner.cancelled.swap(true, Ordering::SeqCst);
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    /// Check whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once cancellation is requested
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
