use crate::core::report::DeadlockReport;
use crate::core::types::{LockId, LockKind, ThreadId};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Returned when a lock could not be acquired within its timeout
///
/// The timeout only suggests a deadlock; no wait-for analysis is done. The
/// report lists every attempt that was live on the same lock when the caller
/// gave up, including the ones currently holding it.
#[derive(Debug, Clone, Serialize)]
pub struct DeadlockError {
    /// Lock the caller was waiting for
    pub lock_id: LockId,
    /// Thread that gave up
    pub thread_id: ThreadId,
    /// Mode the caller asked for
    pub kind: LockKind,
    /// How long the caller waited
    pub waited: Duration,
    /// Grouped view of the live attempts
    pub report: DeadlockReport,
    /// RFC 3339 timestamp of the timeout
    pub timestamp: String,
}

impl fmt::Display for DeadlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.report)
    }
}

impl std::error::Error for DeadlockError {}
