//! Publishing the busy/idle signal
//!
//! The signal is a regular file used both as an exclusive advisory lock and a
//! data channel. While the process is busy the tracker holds an exclusive
//! `flock` on it. On every busy to idle edge the file is truncated, the
//! cumulative idle counter is written as decimal text followed by a newline,
//! and the lock is released. Observers find out which side of the edge the
//! process is on by trying to take the lock without blocking.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

/// Default name of the state file, relative to the working directory
pub const DEFAULT_STATE_FILE: &str = ".idlewatch_state";

/// Transport for the published busy/idle signal
pub trait IdleSignal: Send {
    /// Publish "busy"
    fn acquire_busy(&mut self) -> Result<()>;

    /// Publish "idle", recording the cumulative number of idle transitions
    fn release_idle(&mut self, times_idle: u64) -> Result<()>;
}

/// The file-based signal
#[derive(Debug)]
pub struct StateFile {
    file: File,
    path: PathBuf,
}

impl StateFile {
    /// Create (or truncate) the state file at `path`
    ///
    /// The file starts empty and unlocked; the publisher locks it as soon as it
    /// is constructed.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&path)
            .with_context(|| format!("Failed to open state file {}", path.display()))?;

        Ok(StateFile { file, path })
    }

    /// Path the signal is published at
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flock(&self, operation: libc::c_int) -> Result<()> {
        // SAFETY: the descriptor is owned by `self.file` and stays open.
        let rc = unsafe { libc::flock(self.file.as_raw_fd(), operation) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error())
                .with_context(|| format!("flock({operation}) on {}", self.path.display()));
        }
        Ok(())
    }
}

impl IdleSignal for StateFile {
    fn acquire_busy(&mut self) -> Result<()> {
        self.flock(libc::LOCK_EX)
    }

    fn release_idle(&mut self, times_idle: u64) -> Result<()> {
        self.file
            .set_len(0)
            .and_then(|_| self.file.seek(SeekFrom::Start(0)))
            .and_then(|_| writeln!(self.file, "{times_idle}"))
            .and_then(|_| self.file.flush())
            .with_context(|| format!("Failed to write state file {}", self.path.display()))?;
        self.flock(libc::LOCK_UN)
    }
}

/// Result of reconciling the published signal with the active-thread count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The signal flipped to busy
    WentBusy,
    /// The signal flipped to idle; carries the updated idle counter
    WentIdle(u64),
}

/// Owner of the published signal and the idle-transition counter
pub struct Publisher {
    signal: Box<dyn IdleSignal>,
    busy: bool,
    times_idle: u64,
}

impl Publisher {
    /// Take ownership of `signal` and publish the initial "busy" state
    pub fn new(mut signal: Box<dyn IdleSignal>) -> Result<Self> {
        signal
            .acquire_busy()
            .context("Failed to publish initial busy state")?;
        Ok(Publisher {
            signal,
            busy: true,
            times_idle: 0,
        })
    }

    /// Whether the signal currently reads busy
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Number of busy to idle transitions so far
    pub fn times_idle(&self) -> u64 {
        self.times_idle
    }

    /// Flip the signal if `active` crossed zero since the last call
    ///
    /// Idle is published exactly when the count reaches zero while the
    /// signal reads busy, busy exactly when it leaves zero while the signal
    /// reads idle. Repeated idle states never bump the counter.
    pub fn reconcile(&mut self, active: usize) -> Result<Option<Transition>> {
        if self.busy && active == 0 {
            let times_idle = self.times_idle + 1;
            self.signal.release_idle(times_idle)?;
            self.times_idle = times_idle;
            self.busy = false;
            return Ok(Some(Transition::WentIdle(times_idle)));
        }
        if !self.busy && active > 0 {
            self.signal.acquire_busy()?;
            self.busy = true;
            return Ok(Some(Transition::WentBusy));
        }
        Ok(None)
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("busy", &self.busy)
            .field("times_idle", &self.times_idle)
            .finish_non_exhaustive()
    }
}
