//! Out-of-band control of a running session

use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio_util::sync::CancellationToken;

/// Shared view of a session's in-flight state. Clones observe and cancel the
/// same send, so a UI thread can hold one while the session is borrowed.
#[derive(Clone)]
pub struct SessionHandle {
    pub(crate) cancel: Arc<Mutex<CancellationToken>>,
    pub(crate) is_busy: Arc<AtomicBool>,
}

impl SessionHandle {
    pub(crate) fn new() -> Self {
        Self {
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            is_busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Abort the send in flight, if any.
    pub fn abort(&self) {
        self.cancel.lock().cancel();
    }

    /// Whether a send is in flight. Callers use this to disable input; the
    /// session itself does not reject overlapping sends.
    pub fn is_busy(&self) -> bool {
        self.is_busy.load(Ordering::Acquire)
    }

    /// Install a fresh token for a new send and mark the session busy.
    pub(crate) fn begin(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        self.is_busy.store(true, Ordering::Release);
        token
    }

    pub(crate) fn finish(&self) {
        self.is_busy.store(false, Ordering::Release);
    }
}

/// Clears the busy flag when a send finishes or its future is dropped.
pub(crate) struct BusyGuard(pub(crate) SessionHandle);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.finish();
    }
}
