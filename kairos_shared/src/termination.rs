use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::{Condvar, Mutex};

#[derive(Default)]
struct Inner {
    terminating: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
}

/// Process wide "terminating" flag.
///
/// Cloning is cheap and every clone observes the same flag. Threads that sleep through
/// [`TerminationFlag::wait_timeout`] are woken up as soon as the flag is set.
#[derive(Clone, Default)]
pub struct TerminationFlag {
    inner: Arc<Inner>,
}

impl TerminationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag and wakes up all sleeping threads. Can be called from any thread.
    pub fn set(&self) {
        self.inner.terminating.store(true, Ordering::SeqCst);
        let _guard = self.inner.mutex.lock();
        self.inner.condvar.notify_all();
    }

    pub fn is_set(&self) -> bool {
        self.inner.terminating.load(Ordering::SeqCst)
    }

    /// Resets the flag so that the owner can be run again
    pub fn reset(&self) {
        self.inner.terminating.store(false, Ordering::SeqCst);
    }

    /// Sleeps for at most `timeout` and returns whether the flag is set
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut guard = self.inner.mutex.lock();
        if self.is_set() {
            return true;
        }
        self.inner.condvar.wait_for(&mut guard, timeout);
        self.is_set()
    }
}

impl std::fmt::Debug for TerminationFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminationFlag").field("terminating", &self.is_set()).finish()
    }
}
