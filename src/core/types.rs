use serde::{Deserialize, Serialize};

/// Thread identifier type
///
/// The `pthread_t` of the thread, widened to `usize`. Both the creating thread
/// (which sees the value returned by thread creation) and the thread itself
/// (through `pthread_self`) agree on it, which a counter handed out lazily
/// from thread-local storage could not guarantee.
pub type ThreadId = usize;

/// Semaphore identifier type
///
/// The address of the semaphore. Semaphores must not move while registered.
pub type SemId = usize;

/// Condition variable identifier type
///
/// The address of the condition variable (or, for the Rust-native
/// [`Condvar`](crate::Condvar), of a heap slot it owns).
pub type CondId = usize;

/// Get the identifier of the current thread
pub fn get_current_thread_id() -> ThreadId {
    // SAFETY: pthread_self has no preconditions and cannot fail.
    unsafe { libc::pthread_self() as ThreadId }
}

/// Events recorded by the tracker
///
/// Each mutation of the registry that can change the active-thread count is
/// logged as one of these, together with the block map that resulted from it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Events {
    /// A thread creation started in the parent
    SpawnBegin,
    /// A thread registered itself
    Spawn,
    /// A thread creation failed before the thread started
    SpawnCancel,
    /// The thread is exiting
    Exit,
    /// Thread entered a blocking primitive
    EnterBlocked,
    /// Thread returned from a blocking primitive
    LeaveBlocked,
    /// Thread started waiting for another thread to finish
    JoinBegin,
    /// Forced idle was enabled on the thread
    ForcedIdleOn,
    /// Forced idle was lifted
    ForcedIdleOff,
    /// A semaphore was registered
    SemCreate,
    /// A semaphore was unregistered
    SemDestroy,
    /// A post was recorded as a pending wakeup
    SemPost,
    /// Thread started waiting on a semaphore
    SemWaitBegin,
    /// Thread returned from a semaphore wait
    SemWaitEnd,
    /// A condition group was created
    CondvarCreate,
    /// A condition group was destroyed
    CondvarDestroy,
    /// Thread joined the current generation of a condition group
    CondvarWaitBegin,
    /// A timed-out waiter left its generation before any broadcast counted it
    CondvarWithdraw,
    /// A broadcast ended the current generation
    CondvarBroadcast,
    /// The published signal flipped to busy
    Busy,
    /// The published signal flipped to idle
    Idle,
}

/// Point-in-time view of the tracker
///
/// Returned by [`Monitor::snapshot`](crate::Monitor::snapshot), serialized by
/// the C API's diagnostics and used heavily by tests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    /// Number of threads that can currently make progress
    pub active: usize,
    /// Whether the published signal reads busy
    pub busy: bool,
    /// Number of busy to idle transitions so far
    pub times_idle: u64,
    /// Number of registered threads
    pub threads: usize,
    /// Number of thread creations that have not registered yet
    pub pending_spawns: usize,
    /// `x` for blocked threads, `-` for active ones, ordered by thread id
    pub block_map: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn test_thread_id_consistency() {
        let (tx, rx) = mpsc::channel();

        let handle = thread::spawn(move || {
            let id1 = get_current_thread_id();
            let id2 = get_current_thread_id();
            assert_eq!(id1, id2);
            tx.send(id1).unwrap();
        });

        let thread_id = rx.recv().unwrap();
        handle.join().unwrap();
        assert_ne!(thread_id, 0);
    }

    #[test]
    fn test_thread_id_matches_join_handle() {
        use std::os::unix::thread::JoinHandleExt;

        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            tx.send(get_current_thread_id()).unwrap();
        });
        let seen_from_parent = handle.as_pthread_t() as ThreadId;
        let seen_from_child = rx.recv().unwrap();
        handle.join().unwrap();

        assert_eq!(seen_from_parent, seen_from_child);
    }

    #[test]
    fn test_thread_id_uniqueness() {
        let (tx, rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = std::sync::Arc::new(std::sync::Mutex::new(release_rx));

        // Keep every thread alive until all ids are collected; pthread_t
        // values are reused after a thread is joined.
        let mut handles = vec![];
        for _ in 0..10 {
            let tx = tx.clone();
            let release_rx = std::sync::Arc::clone(&release_rx);
            handles.push(thread::spawn(move || {
                tx.send(get_current_thread_id()).unwrap();
                let _ = release_rx.lock().unwrap().recv();
            }));
        }

        let mut ids = vec![];
        for _ in 0..10 {
            ids.push(rx.recv().unwrap());
        }
        drop(release_tx);
        for handle in handles {
            handle.join().unwrap();
        }

        let mut unique_ids = ids.clone();
        unique_ids.sort();
        unique_ids.dedup();
        assert_eq!(ids.len(), unique_ids.len());
    }
}
