// Core types
pub mod types;

// Errors and the fatal path
pub mod error;

// Configuration
pub mod config;

// Logging functionality
pub mod logger;

// Bookkeeping and classification
pub mod classifier;
pub mod registry;

// Published signal, and reading it back
pub mod observer;
pub mod publisher;

// Tracker and the global lock
pub mod tracker;

// Tracked primitives
pub mod locks;
pub mod thread;

use crate::core::config::Config;
use crate::core::error::{OrFatal, fatal};
use crate::core::logger::EventLogger;
use crate::core::publisher::StateFile;
use crate::core::tracker::{Monitor, Tracker};
use anyhow::{Context, Result, bail};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

static GLOBAL_MONITOR: OnceLock<Arc<Monitor>> = OnceLock::new();

/// The process-wide monitor
///
/// Created from the environment on first use unless [`IdleWatch::start`]
/// installed one earlier. The thread that triggers the lazy creation is
/// registered with it, exactly as `start` registers its caller.
pub fn global() -> &'static Arc<Monitor> {
    GLOBAL_MONITOR.get_or_init(|| {
        IdleWatch::from_env()
            .build_registered()
            .unwrap_or_else(|e| fatal(format!("{e:#}")))
    })
}

/// The process-wide monitor, if it exists yet
pub fn try_global() -> Option<&'static Arc<Monitor>> {
    GLOBAL_MONITOR.get()
}

/// Declare the calling thread idle, whatever it is doing
///
/// For threads that block in ways the tracker cannot see, such as polling
/// loops or foreign event loops. Aborts if the thread is not tracked or is
/// already forced idle.
pub fn enable_forced_idle() {
    global().enable_forced_idle().or_fatal()
}

/// Lift [`enable_forced_idle`] on the calling thread
///
/// Aborts if the thread is not forced idle.
pub fn disable_forced_idle() {
    global().disable_forced_idle().or_fatal()
}

/// Idlewatch configuration builder
///
/// # Example
///
/// ```no_run
/// use idlewatch::IdleWatch;
///
/// IdleWatch::new()
///     .state_file("/run/worker/idle")
///     .verbose(true)
///     .start()
///     .expect("failed to start idlewatch");
/// ```
#[derive(Debug, Clone, Default)]
pub struct IdleWatch {
    config: Config,
}

impl IdleWatch {
    /// Start from the defaults, ignoring the environment
    ///
    /// By default:
    /// - The state file is `.idlewatch_state` in the working directory
    /// - Logging is disabled
    pub fn new() -> Self {
        IdleWatch {
            config: Config::default(),
        }
    }

    /// Start from the configuration in the environment
    pub fn from_env() -> Self {
        IdleWatch {
            config: Config::from_env(),
        }
    }

    /// Set where the busy/idle signal is published
    pub fn state_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.state_file = path.into();
        self
    }

    /// Log every event to standard error
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    /// Append every event to the file at `path`
    ///
    /// Takes precedence over [`IdleWatch::verbose`].
    pub fn with_log<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.log_file = Some(path.into());
        self
    }

    /// The configuration built so far
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Build a standalone monitor
    ///
    /// The state file is created (or truncated) and locked busy right away.
    pub fn build(self) -> Result<Arc<Monitor>> {
        let signal = StateFile::create(&self.config.state_file)?;
        let logger = match (&self.config.log_file, self.config.verbose) {
            (Some(path), _) => EventLogger::with_file(path)?,
            (None, true) => EventLogger::stderr(),
            (None, false) => EventLogger::new(),
        };
        let tracker =
            Tracker::new(Box::new(signal), logger).context("Failed to publish initial state")?;
        Ok(Monitor::new(tracker))
    }

    /// Build the process-wide monitor and register the calling thread with it
    ///
    /// # Errors
    /// Returns an error if a global monitor already exists or if the state
    /// file or log file cannot be opened.
    pub fn start(self) -> Result<&'static Arc<Monitor>> {
        if GLOBAL_MONITOR.get().is_some() {
            bail!("idlewatch is already started");
        }
        let monitor = self.build_registered()?;
        if GLOBAL_MONITOR.set(monitor).is_err() {
            bail!("idlewatch is already started");
        }
        Ok(global())
    }

    /// Build a monitor that already tracks the calling thread
    ///
    /// The thread is registered before the monitor is shared, so no other
    /// thread can observe it without its initial thread.
    fn build_registered(self) -> Result<Arc<Monitor>> {
        let monitor = self.build()?;
        monitor
            .register_current_thread()
            .context("Failed to register the initial thread")?;
        Ok(monitor)
    }
}
