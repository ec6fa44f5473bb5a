use parking_lot::{Condvar, Mutex};
use std::time::Instant;

/// An untracked counted semaphore
///
/// The building block under both the tracked [`Semaphore`](super::Semaphore)
/// and the generation pairs of the condition-variable emulator. It knows
/// nothing about the tracker; callers wrap each operation in the matching
/// bookkeeping.
#[derive(Debug, Default)]
pub struct RawSemaphore {
    count: Mutex<usize>,
    available: Condvar,
}

impl RawSemaphore {
    /// Create a semaphore holding `value` tokens
    pub fn new(value: usize) -> Self {
        RawSemaphore {
            count: Mutex::new(value),
            available: Condvar::new(),
        }
    }

    /// Add one token, waking a single waiter if any
    pub fn post(&self) {
        let mut count = self.count.lock();
        *count += 1;
        self.available.notify_one();
    }

    /// Take one token, sleeping until one is available
    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.available.wait(&mut count);
        }
        *count -= 1;
    }

    /// Take one token, giving up at `deadline`
    ///
    /// Returns `true` if a token was taken.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let mut count = self.count.lock();
        while *count == 0 {
            if self.available.wait_until(&mut count, deadline).timed_out() {
                break;
            }
        }
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    /// Take one token if one is available right now
    pub fn try_wait(&self) -> bool {
        let mut count = self.count.lock();
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    /// Number of tokens currently available
    pub fn value(&self) -> usize {
        *self.count.lock()
    }
}
