//! Activity classification
//!
//! Decides, from the registry alone, which threads can no longer make progress
//! without an external event.

use crate::core::registry::{Registry, ThreadRecord};

impl Registry {
    /// Has this thread gone to sleep in a way that keeps it from waking on its own?
    ///
    /// A thread is blocked when it is forced idle, or when it sleeps in a
    /// primitive that has nothing queued for it. Sleeping on a semaphore with
    /// a pending wakeup does not count: the thread is about to resume, and
    /// calling it blocked would publish an idle state that flips back at once.
    /// The same goes for joining a thread that has already exited.
    pub fn is_blocked(&self, record: &ThreadRecord) -> bool {
        if record.forced_idle {
            return true;
        }
        if !record.sleeping {
            return false;
        }
        if let Some(target) = record.joining
            && self.thread(target).is_none()
        {
            return false;
        }
        match record.waiting_on {
            None => true,
            Some(sem) => self
                .semaphore(sem)
                .is_none_or(|info| !info.named && info.pending_wakeups == 0),
        }
    }

    /// Number of registered threads that are not blocked
    pub fn active_count(&self) -> usize {
        self.threads()
            .filter(|(_, record)| !self.is_blocked(record))
            .count()
    }

    /// One character per thread, ordered by thread id: `x` blocked, `-` active
    pub fn block_map(&self) -> String {
        let mut threads: Vec<_> = self.threads().collect();
        threads.sort_unstable_by_key(|(id, _)| *id);
        threads
            .iter()
            .map(|(_, record)| if self.is_blocked(record) { "x" } else { "-" })
            .collect::<Vec<_>>()
            .join("|")
    }
}

#[cfg(test)]
mod tests {
    use crate::core::registry::{Registry, SemaphoreRecord, ThreadRecord};

    fn sleeping_on(sem: usize) -> ThreadRecord {
        ThreadRecord {
            sleeping: true,
            waiting_on: Some(sem),
            ..Default::default()
        }
    }

    #[test]
    fn test_awake_thread_is_active() {
        let registry = Registry::new();
        assert!(!registry.is_blocked(&ThreadRecord::default()));
    }

    #[test]
    fn test_forced_idle_wins_over_everything() {
        let registry = Registry::new();
        let record = ThreadRecord {
            forced_idle: true,
            ..Default::default()
        };
        assert!(registry.is_blocked(&record));
    }

    #[test]
    fn test_plain_sleep_is_blocked() {
        let registry = Registry::new();
        let record = ThreadRecord {
            sleeping: true,
            ..Default::default()
        };
        assert!(registry.is_blocked(&record));
    }

    #[test]
    fn test_pending_wakeup_keeps_sleeper_active() {
        let mut registry = Registry::new();
        registry.register_semaphore(0x10, SemaphoreRecord::unnamed(1));
        assert!(!registry.is_blocked(&sleeping_on(0x10)));

        registry.semaphore_mut(0x10).unwrap().pending_wakeups = 0;
        assert!(registry.is_blocked(&sleeping_on(0x10)));
    }

    #[test]
    fn test_named_semaphore_never_blocks() {
        let mut registry = Registry::new();
        registry.register_semaphore(0x30, SemaphoreRecord::named());
        assert!(!registry.is_blocked(&sleeping_on(0x30)));
    }

    #[test]
    fn test_unregistered_semaphore_counts_as_empty() {
        let registry = Registry::new();
        assert!(registry.is_blocked(&sleeping_on(0x20)));
    }

    #[test]
    fn test_join_on_exited_thread_is_not_blocked() {
        let mut registry = Registry::new();
        let joiner = ThreadRecord {
            sleeping: true,
            joining: Some(2),
            ..Default::default()
        };

        registry.register_thread(2);
        assert!(registry.is_blocked(&joiner));

        registry.unregister_thread(2);
        assert!(!registry.is_blocked(&joiner));
    }

    #[test]
    fn test_active_count_and_block_map() {
        let mut registry = Registry::new();
        for id in 1..=3 {
            registry.register_thread(id);
        }
        registry.thread_mut(2).unwrap().sleeping = true;

        assert_eq!(registry.active_count(), 2);
        assert_eq!(registry.block_map(), "-|x|-");

        registry.thread_mut(1).unwrap().forced_idle = true;
        registry.thread_mut(3).unwrap().sleeping = true;
        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.block_map(), "x|x|x");
    }
}
