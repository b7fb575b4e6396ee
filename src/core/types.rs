use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Thread identifier type
///
/// Uniquely identifies a thread in the application.
pub type ThreadId = usize;

// Global counter for assigning unique thread IDs
static THREAD_ID_COUNTER: AtomicUsize = AtomicUsize::new(1);

// Thread-local storage for each thread's assigned ID
thread_local! {
    static THREAD_ID: ThreadId = {
        // Each thread gets a unique ID once, when this is first accessed
        THREAD_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
    };
}

/// Get a unique identifier of the current thread
/// This will always return the same ID for the lifetime of the thread
pub fn get_current_thread_id() -> ThreadId {
    THREAD_ID.with(|&id| id)
}

/// Lock identifier type
///
/// Identifies a lock instance in log output. Every raw primitive is assigned
/// one when created.
pub type LockId = usize;

/// Identifier of a single lock attempt
///
/// Attempt ids are allocated per primitive instance, strictly increase and
/// are never reused, so a stale unlock can never match a newer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttemptId(pub(crate) u64);

impl AttemptId {
    /// The raw numeric value of this id
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The mode a lock attempt asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockKind {
    /// Shared acquisition of a reader/writer lock
    Read,
    /// Exclusive acquisition (mutex, or writer side of a reader/writer lock)
    Write,
}

impl LockKind {
    /// Upper-case label used in reports
    pub fn label(self) -> &'static str {
        match self {
            LockKind::Read => "READ",
            LockKind::Write => "WRITE",
        }
    }
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Represents the lifecycle events of a lock attempt
///
/// These are written to the event log when logging is enabled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Events {
    /// A thread requested the lock
    Attempt,
    /// The lock was handed to the requesting thread
    Acquired,
    /// The holder released the lock
    Released,
    /// The requesting thread gave up after its timeout
    TimedOut,
    /// A background acquisition arrived after the caller left and was reverted
    Abandoned,
}
