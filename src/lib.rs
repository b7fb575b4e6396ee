//! # Delock
//!
//! Mutex and reader-writer lock replacements that turn a hang into an error.
//!
//! Every lock call is bounded by a timeout. When it expires the caller gets a
//! [`DeadlockError`] whose report lists every attempt live on that lock,
//! grouped by call site and mode, instead of blocking forever. Nothing is
//! proven about the cause; a timeout is taken as a likely deadlock.
//!
//! ## Features
//!
//! - Id-based primitives ([`RawMutex`], [`RawRwLock`]) and guard-based
//!   wrappers ([`Mutex`], [`RwLock`])
//! - Late acquisitions after a timeout are released, never leaked
//! - Reports group blocked callers by normalized stack trace
//! - Per-instance timeout, defaulting to `DELOCK_TIMEOUT` or 1000 ms
//! - Optional JSON-lines event log and deadlock callback via [`Delock`]
//!
//! ```rust
//! use delock::{LockConfig, Mutex};
//! use std::time::Duration;
//!
//! let config = LockConfig::from_env().with_timeout(Duration::from_millis(20));
//! let mutex = Mutex::with_config(0, config);
//!
//! let guard = mutex.lock().unwrap();
//! let err = match mutex.lock() {
//!     Err(err) => err,
//!     Ok(_) => unreachable!("the lock is held"),
//! };
//! assert!(err.to_string().starts_with("Deadlock detected"));
//! drop(guard);
//! ```

mod core;
pub use core::{
    Delock,
    config::{DEFAULT_TIMEOUT, LockConfig, TIMEOUT_ENV_VAR},
    error::DeadlockError,
    flush_logs,
    locks::mutex::{Mutex, MutexGuard, RawMutex},
    locks::rwlock::{RawRwLock, RwLock, RwLockReadGuard, RwLockWriteGuard},
    report::{DeadlockReport, ReportGroup},
    trace::{BacktraceProvider, CapturedTrace, Frame, ParsedTrace, StackTrace, TraceProvider},
    types::{AttemptId, Events, LockId, LockKind, ThreadId},
};
