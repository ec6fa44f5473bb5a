use idlewatch::{IdleWatch, Monitor, Observation, probe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

#[allow(dead_code)]
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);
#[allow(dead_code)]
pub const QUIET_PERIOD: Duration = Duration::from_millis(100);

pub struct Harness {
    pub monitor: Arc<Monitor>,
    pub state_file: PathBuf,
    _dir: TempDir,
}

/// A standalone monitor publishing to a fresh state file
pub fn start_monitor() -> Harness {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let state_file = dir.path().join("state");
    let monitor = IdleWatch::new()
        .state_file(&state_file)
        .build()
        .expect("Failed to build monitor");
    Harness {
        monitor,
        state_file,
        _dir: dir,
    }
}

impl Harness {
    /// Look at the state file like an outside observer would
    #[allow(dead_code)]
    pub fn observe(&self) -> Observation {
        probe(&self.state_file).expect("Failed to probe state file")
    }

    /// Poll until the process is idle with a counter above `after`
    #[allow(dead_code)]
    pub fn expect_idle_after(&self, after: u64, timeout: Duration) -> u64 {
        let deadline = Instant::now() + timeout;
        loop {
            if let Observation::Idle { times_idle } = self.observe()
                && times_idle > after
            {
                return times_idle;
            }
            assert!(
                Instant::now() < deadline,
                "Process did not go idle past {after} within {timeout:?}: {:?}",
                self.monitor.snapshot()
            );
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    /// Poll until the process is idle
    #[allow(dead_code)]
    pub fn expect_idle(&self, timeout: Duration) -> u64 {
        let deadline = Instant::now() + timeout;
        loop {
            if let Observation::Idle { times_idle } = self.observe() {
                return times_idle;
            }
            assert!(
                Instant::now() < deadline,
                "Process did not go idle within {timeout:?}: {:?}",
                self.monitor.snapshot()
            );
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    /// Assert that the process stays busy for `period`
    #[allow(dead_code)]
    pub fn assert_stays_busy(&self, period: Duration) {
        let deadline = Instant::now() + period;
        while Instant::now() < deadline {
            assert_eq!(self.observe(), Observation::Busy, "Unexpected idle");
            std::thread::sleep(Duration::from_millis(2));
        }
    }
}

/// Poll `condition` until it holds
#[allow(dead_code)]
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !condition() {
        assert!(Instant::now() < deadline, "Condition not met within {timeout:?}");
        std::thread::sleep(Duration::from_millis(1));
    }
}
