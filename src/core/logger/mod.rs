//! Logging functionality for idlewatch
//!
//! Records every tracker event together with the resulting block map, so the
//! reason for each busy/idle flip can be reconstructed after the fact.

mod event_logger;

pub use event_logger::{EventLogger, LogEntry, LoggerMode};
