//! Logger for recording lock attempt lifecycles
//!
//! Every attempt, hand-over, release, timeout and reverted late acquisition
//! can be written to a JSON-lines file. Writes happen on a background thread
//! fed by a channel, so the lock paths only pay for a send. Logging is off
//! until [`init_logger`] is called with a path.

use crate::core::types::{AttemptId, Events, LockId, LockKind, ThreadId, get_current_thread_id};
use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread;
use std::time::Duration;

/// Fast-path check for the lock primitives
pub static LOGGING_ENABLED: AtomicBool = AtomicBool::new(false);

/// Structure for a single log entry
#[derive(Debug, Serialize, Clone)]
pub struct LogEntry {
    /// Thread that performed the action
    pub thread_id: ThreadId,
    /// Lock that was involved
    pub lock_id: LockId,
    /// Attempt the event belongs to
    pub attempt_id: AttemptId,
    /// Requested mode
    pub kind: LockKind,
    /// Type of event that occurred
    pub event: Events,
    /// Absolute timestamp of when the event occurred (seconds since Unix Epoch)
    pub timestamp: f64,
}

/// Commands for controlling the async logger thread
#[derive(Debug)]
pub enum LoggerCommand {
    /// Write a log entry to the file
    LogEntry(LogEntry),
    /// Flush all pending entries to disk and signal completion
    Flush(Sender<()>),
}

/// Event logger writing entries through a background thread
pub struct EventLogger {
    sender: Sender<LoggerCommand>,
}

impl Drop for EventLogger {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            eprintln!("Warning: Failed to flush logs during EventLogger drop: {e:?}");
        }
    }
}

impl EventLogger {
    /// Create a logger that writes to the specified file
    ///
    /// A `{timestamp}` placeholder in the file name is replaced with the
    /// current time. Missing parent directories are created.
    ///
    /// # Errors
    /// Returns an error if the directory or the file cannot be created.
    pub fn with_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = resolve_path(path.as_ref());

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;

        let (tx, rx) = channel::<LoggerCommand>();
        thread::Builder::new()
            .name("delock-logger".to_string())
            .spawn(move || async_logger_thread(file, rx))
            .context("Failed to spawn logger thread")?;

        Ok(EventLogger { sender: tx })
    }

    /// Queue one attempt event
    pub fn log_event(
        &self,
        thread_id: ThreadId,
        lock_id: LockId,
        attempt_id: AttemptId,
        kind: LockKind,
        event: Events,
    ) {
        let now = Utc::now();
        let timestamp = now.timestamp() as f64 + now.timestamp_subsec_micros() as f64 / 1_000_000.0;

        let entry = LogEntry {
            thread_id,
            lock_id,
            attempt_id,
            kind,
            event,
            timestamp,
        };

        if let Err(e) = self.sender.send(LoggerCommand::LogEntry(entry)) {
            eprintln!("Failed to send log entry: {e:?}");
        }
    }

    /// Block until every queued entry is on disk
    ///
    /// # Errors
    /// Returns an error if the writer thread is gone or does not answer in time.
    pub fn flush(&self) -> Result<()> {
        let (flush_tx, flush_rx) = channel();
        self.sender
            .send(LoggerCommand::Flush(flush_tx))
            .context("Logger thread is gone")?;

        flush_rx
            .recv_timeout(Duration::from_secs(10))
            .context("Flush operation timed out")
    }
}

fn resolve_path(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    let placeholder = "{timestamp}";
    if text.contains(placeholder) {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        PathBuf::from(text.replace(placeholder, &timestamp))
    } else {
        path.to_path_buf()
    }
}

fn async_logger_thread(file: File, rx: Receiver<LoggerCommand>) {
    let mut writer = BufWriter::new(file);

    while let Ok(cmd) = rx.recv() {
        match cmd {
            LoggerCommand::LogEntry(entry) => {
                if let Ok(json) = serde_json::to_string(&entry)
                    && let Err(e) = writeln!(writer, "{json}")
                {
                    eprintln!("Logger write error: {e:?}");
                }
            }
            LoggerCommand::Flush(responder) => {
                if let Err(e) = writer.flush() {
                    eprintln!("Logger flush error: {e:?}");
                }
                let _ = responder.send(());
            }
        }
    }

    if let Err(e) = writer.flush() {
        eprintln!("Logger final flush error: {e:?}");
    }
}

lazy_static::lazy_static! {
    static ref GLOBAL_LOGGER: RwLock<Option<EventLogger>> = RwLock::new(None);
}

/// Set the global logger to use the specified file, or disable logging if None
///
/// # Errors
/// Returns an error if the log file cannot be created.
pub fn init_logger<P: AsRef<Path>>(path: Option<P>) -> Result<()> {
    let logger = match path {
        Some(path) => Some(EventLogger::with_file(path).context("Failed to create logger with file")?),
        None => None,
    };

    let mut global = GLOBAL_LOGGER.write();
    LOGGING_ENABLED.store(logger.is_some(), Ordering::Release);
    *global = logger;
    Ok(())
}

/// Flush the global logger
///
/// # Errors
/// Returns an error if the pending entries could not be written.
pub fn flush_logs() -> Result<()> {
    match GLOBAL_LOGGER.read().as_ref() {
        Some(logger) => logger.flush(),
        None => Ok(()),
    }
}

/// Record an event of the current thread on the global logger
pub fn log_attempt_event(lock_id: LockId, attempt_id: AttemptId, kind: LockKind, event: Events) {
    if !LOGGING_ENABLED.load(Ordering::Relaxed) {
        return;
    }
    if let Some(logger) = GLOBAL_LOGGER.read().as_ref() {
        logger.log_event(get_current_thread_id(), lock_id, attempt_id, kind, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_basic_logging() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("basic.log");

        let logger = EventLogger::with_file(&log_path).unwrap();

        logger.log_event(1, 10, AttemptId(1), LockKind::Write, Events::Attempt);
        logger.log_event(1, 10, AttemptId(1), LockKind::Write, Events::Acquired);
        logger.log_event(1, 10, AttemptId(1), LockKind::Write, Events::Released);
        logger.flush().unwrap();

        let contents = std::fs::read_to_string(&log_path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("\"thread_id\":1"));
        assert!(lines[0].contains("\"lock_id\":10"));
        assert!(lines[0].contains("\"kind\":\"Write\""));
        assert!(lines[0].contains("\"event\":\"Attempt\""));
        assert!(lines[2].contains("\"event\":\"Released\""));
    }

    #[test]
    fn test_timestamp_placeholder_and_directories() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("nested/dir/run_{timestamp}.log");

        let _logger = EventLogger::with_file(&log_path).unwrap();

        let names: Vec<String> = std::fs::read_dir(temp_dir.path().join("nested/dir"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("run_"));
        assert!(names[0].ends_with(".log"));
        assert!(!names[0].contains("{timestamp}"));
    }

    #[test]
    fn test_logger_drop_flushes() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("drop_test.log");

        {
            let logger = EventLogger::with_file(&log_path).unwrap();
            logger.log_event(4, 2, AttemptId(9), LockKind::Read, Events::TimedOut);
        }

        let contents = std::fs::read_to_string(&log_path).unwrap();
        assert!(contents.contains("\"event\":\"TimedOut\""));
        assert!(contents.contains("\"attempt_id\":9"));
    }
}
