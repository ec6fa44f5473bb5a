//! Startup configuration
//!
//! Read once, from the environment of the instrumented process.

use crate::core::publisher::DEFAULT_STATE_FILE;
use std::path::PathBuf;

/// Environment variable overriding the state file path
pub const ENV_STATE_FILE: &str = "IDLEWATCH_STATEFILE";
/// Environment variable enabling verbose (stderr) event logging; any value enables it
pub const ENV_VERBOSE: &str = "IDLEWATCH_VERBOSE";
/// Environment variable naming a file to append event logs to
pub const ENV_LOG_FILE: &str = "IDLEWATCH_LOG";

lazy_static::lazy_static! {
    static ref ENV_CONFIG: Config = Config::from_lookup(|key| std::env::var_os(key));
}

/// Tracker configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Where the busy/idle signal is published
    pub state_file: PathBuf,
    /// Log every event to standard error
    pub verbose: bool,
    /// Append every event to this file instead
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            state_file: PathBuf::from(DEFAULT_STATE_FILE),
            verbose: false,
            log_file: None,
        }
    }
}

impl Config {
    /// The configuration of this process, read from the environment on first use
    pub fn from_env() -> Config {
        ENV_CONFIG.clone()
    }

    /// Build a configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Config
    where
        F: Fn(&str) -> Option<std::ffi::OsString>,
    {
        let defaults = Config::default();
        Config {
            state_file: lookup(ENV_STATE_FILE)
                .filter(|path| !path.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.state_file),
            verbose: lookup(ENV_VERBOSE).is_some(),
            log_file: lookup(ENV_LOG_FILE)
                .filter(|path| !path.is_empty())
                .map(PathBuf::from),
        }
    }
}
