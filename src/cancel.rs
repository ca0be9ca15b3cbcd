use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Run-wide cancellation signal.
///
/// Cloned into every worker; `cancel` wakes all blocked waiters immediately so
/// polling backoffs observe the signal without waiting out their interval.
/// In-flight cleanup work deliberately ignores the token so staged records and
/// files are still removed after an abort.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cancelled: Mutex<bool>,
    condvar: Condvar,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let mut flag = self.inner.cancelled.lock().unwrap_or_else(|e| e.into_inner());
        *flag = true;
        self.inner.condvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sleeps for `timeout` or until cancelled, whichever comes first.
    /// Returns true if the token was cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut flag = self.inner.cancelled.lock().unwrap_or_else(|e| e.into_inner());
        let deadline = std::time::Instant::now() + timeout;
        while !*flag {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let (guard, wait) = self
                .inner
                .condvar
                .wait_timeout(flag, remaining)
                .unwrap_or_else(|e| e.into_inner());
            flag = guard;
            if wait.timed_out() && !*flag {
                return false;
            }
        }
        true
    }
}
