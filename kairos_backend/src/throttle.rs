use std::time::Duration;

use kairos_shared::{
    parking_lot::{Condvar, Mutex},
    TerminationFlag,
};

/// Bounds the number of frames a surface has in flight.
///
/// A permit is taken when the next target is acquired and given back when the frame is retired.
/// Waiting for a permit gives up when the [`TerminationFlag`] is set.
#[derive(Debug)]
pub struct FrameThrottle {
    capacity: u32,
    available: Mutex<u32>,
    condvar: Condvar,
}

impl FrameThrottle {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            available: Mutex::new(capacity),
            condvar: Condvar::new(),
        }
    }

    /// Takes a permit and blocks while none is available.
    ///
    /// Returns `false` when the wait was cancelled. The flag is re-checked every `wait_slice`.
    pub fn acquire(&self, termination: &TerminationFlag, wait_slice: Duration) -> bool {
        let mut available = self.available.lock();
        loop {
            if termination.is_set() {
                return false;
            }
            if *available > 0 {
                *available -= 1;
                return true;
            }
            self.condvar.wait_for(&mut available, wait_slice);
        }
    }

    /// Takes a permit if one is available
    pub fn try_acquire(&self) -> bool {
        let mut available = self.available.lock();
        if *available > 0 {
            *available -= 1;
            true
        } else {
            false
        }
    }

    /// Returns a permit
    pub fn release(&self) {
        let mut available = self.available.lock();
        *available = (*available + 1).min(self.capacity);
        self.condvar.notify_one();
    }

    /// Wakes all waiters so that they re-check the terminating flag
    pub fn wake_all(&self) {
        let _available = self.available.lock();
        self.condvar.notify_all();
    }

    pub fn in_flight(&self) -> u32 {
        self.capacity - *self.available.lock()
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}
