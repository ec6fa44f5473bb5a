pub mod condvar;
pub mod raw;
pub mod semaphore;

pub use condvar::Condvar;
pub use raw::RawSemaphore;
pub use semaphore::Semaphore;

/// A held mutex that a condition wait can release and reacquire
///
/// `unlocked` releases the lock, runs `f` and takes the lock back before
/// returning, so the caller's guard stays valid throughout.
pub trait ExternalLock {
    /// Run `f` with the lock released
    fn unlocked<R>(&mut self, f: impl FnOnce() -> R) -> R;
}

impl<T: ?Sized> ExternalLock for parking_lot::MutexGuard<'_, T> {
    fn unlocked<R>(&mut self, f: impl FnOnce() -> R) -> R {
        parking_lot::MutexGuard::unlocked(self, f)
    }
}
