// Core types
pub mod types;

pub mod config;
pub mod error;
pub mod report;
pub mod trace;

mod handoff;
mod registry;

// Logging functionality
pub mod logger;
pub use logger::{flush_logs, init_logger};

// Callback delivery
pub mod detector;
pub use detector::init_detector;

// Lock primitives
pub mod locks;

use anyhow::{Context, Result};

/// Delock process-wide setup
///
/// Lock primitives work without it. Starting it adds an event log and a
/// callback that sees every deadlock error before it reaches the caller.
pub struct Delock {
    log_path: Option<String>,
    callback: Option<Box<dyn Fn(error::DeadlockError) + Send + Sync + 'static>>,
}

impl Default for Delock {
    fn default() -> Self {
        Self::new()
    }
}

impl Delock {
    /// Create a new Delock with default settings
    ///
    /// By default logging is disabled and no callback is installed.
    pub fn new() -> Self {
        Delock {
            log_path: None,
            callback: None,
        }
    }

    /// Activate logger and set the path for the log file
    ///
    /// # Arguments
    /// * `path` - Path to the log file. If the path contains "{timestamp}",
    ///   it will be replaced with the current timestamp.
    pub fn with_log<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.log_path = Some(path.as_ref().to_string_lossy().into_owned());
        self
    }

    /// Set a callback to be invoked, on a background thread, whenever a lock
    /// attempt times out
    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(error::DeadlockError) + Send + Sync + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Apply the configured settings
    ///
    /// # Errors
    /// Returns an error if logger initialization fails
    pub fn start(self) -> Result<()> {
        if let Some(log_path) = self.log_path {
            init_logger(Some(log_path)).context("Failed to initialize logger")?;
        }

        match self.callback {
            Some(callback) => init_detector(callback),
            None => detector::clear_detector(),
        }

        Ok(())
    }
}
