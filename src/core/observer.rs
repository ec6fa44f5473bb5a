//! Reading the published signal from outside the instrumented process
//!
//! An observer opens the state file on its own descriptor and tries to take
//! the exclusive lock without blocking. If the instrumented process is busy it
//! holds the lock and the attempt fails with `EWOULDBLOCK`. Otherwise the
//! observer briefly owns the lock, reads the idle counter and lets go.
//!
//! While the observer holds the lock, a thread of the instrumented process
//! that wakes up stalls until the lock is released, so probes keep the lock
//! only for the duration of one read.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::time::{Duration, Instant};

/// What a probe saw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum Observation {
    /// Nothing in the process can make progress
    Idle {
        /// Busy to idle transitions so far
        times_idle: u64,
    },
    /// At least one thread can make progress
    Busy,
}

impl Observation {
    /// Whether the process was idle
    pub fn is_idle(&self) -> bool {
        matches!(self, Observation::Idle { .. })
    }

    /// The idle counter, if the process was idle
    pub fn times_idle(&self) -> Option<u64> {
        match self {
            Observation::Idle { times_idle } => Some(*times_idle),
            Observation::Busy => None,
        }
    }
}

impl std::fmt::Display for Observation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Observation::Idle { times_idle } => write!(f, "idle {times_idle}"),
            Observation::Busy => write!(f, "busy"),
        }
    }
}

/// Look at the state file at `path` once
pub fn probe<P: AsRef<Path>>(path: P) -> Result<Observation> {
    let path = path.as_ref();
    let mut file = File::open(path)
        .with_context(|| format!("Failed to open state file {}", path.display()))?;

    // SAFETY: the descriptor is owned by `file` and stays open.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
            return Ok(Observation::Busy);
        }
        return Err(err).with_context(|| format!("flock on {}", path.display()));
    }

    let mut contents = String::new();
    let read = file.read_to_string(&mut contents);

    // SAFETY: as above; closing the file would release the lock as well.
    unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };

    read.with_context(|| format!("Failed to read state file {}", path.display()))?;
    let times_idle = parse_counter(&contents)
        .with_context(|| format!("Malformed state file {}", path.display()))?;
    Ok(Observation::Idle { times_idle })
}

/// Parse the idle counter; a file that was never written reads as zero
fn parse_counter(contents: &str) -> Result<u64> {
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    Ok(trimmed.parse::<u64>()?)
}

/// Poll the state file until the process is idle with a counter above `after`
///
/// Returns the counter, or `None` if `timeout` passed first.
pub fn wait_for_idle<P: AsRef<Path>>(
    path: P,
    after: Option<u64>,
    poll: Duration,
    timeout: Option<Duration>,
) -> Result<Option<u64>> {
    if poll.is_zero() {
        bail!("poll interval must be positive");
    }
    let path = path.as_ref();
    let deadline = timeout.map(|timeout| Instant::now() + timeout);

    loop {
        if let Observation::Idle { times_idle } = probe(path)?
            && after.is_none_or(|after| times_idle > after)
        {
            return Ok(Some(times_idle));
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Ok(None);
        }
        std::thread::sleep(poll);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::publisher::{IdleSignal, StateFile};

    #[test]
    fn test_probe_follows_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state");
        let mut state = StateFile::create(&path).unwrap();

        assert_eq!(probe(&path).unwrap(), Observation::Idle { times_idle: 0 });

        state.acquire_busy().unwrap();
        assert_eq!(probe(&path).unwrap(), Observation::Busy);

        state.release_idle(4).unwrap();
        assert_eq!(probe(&path).unwrap(), Observation::Idle { times_idle: 4 });
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(probe(dir.path().join("absent")).is_err());
    }

    #[test]
    fn test_malformed_counter_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state");
        std::fs::write(&path, "not a number\n").unwrap();
        assert!(probe(&path).is_err());
    }

    #[test]
    fn test_wait_for_idle_times_out_while_busy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state");
        let mut state = StateFile::create(&path).unwrap();
        state.acquire_busy().unwrap();

        let seen = wait_for_idle(
            &path,
            None,
            Duration::from_millis(5),
            Some(Duration::from_millis(30)),
        )
        .unwrap();
        assert_eq!(seen, None);

        state.release_idle(1).unwrap();
        let seen = wait_for_idle(&path, Some(0), Duration::from_millis(5), None).unwrap();
        assert_eq!(seen, Some(1));
    }

    #[test]
    fn test_display_and_json() {
        let idle = Observation::Idle { times_idle: 3 };
        assert_eq!(idle.to_string(), "idle 3");
        assert_eq!(Observation::Busy.to_string(), "busy");
        assert_eq!(
            serde_json::to_string(&idle).unwrap(),
            r#"{"state":"idle","times_idle":3}"#
        );
        assert_eq!(
            serde_json::to_string(&Observation::Busy).unwrap(),
            r#"{"state":"busy"}"#
        );
    }
}
