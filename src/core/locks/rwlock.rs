//! Reader-writer lock with timeout-based deadlock detection
//!
//! Any number of readers or one writer, exactly as the wrapped
//! `parking_lot` lock provides. Attempts of both modes share one registry, so
//! a timed out writer sees the readers that keep it out, and the other way
//! round.
//!
//! # Example
//!
//! ```rust
//! use delock::RwLock;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let lock = Arc::new(RwLock::new(10));
//! let lock_clone = Arc::clone(&lock);
//!
//! thread::spawn(move || {
//!     let data = lock_clone.read().unwrap();
//!     assert!(*data >= 10);
//! })
//! .join()
//! .unwrap();
//!
//! *lock.write().unwrap() += 1;
//! ```

use crate::core::config::LockConfig;
use crate::core::error::DeadlockError;
use crate::core::handoff;
use crate::core::locks::{LockCore, log_abandoned};
use crate::core::types::{AttemptId, LockId, LockKind};
use parking_lot::RawRwLock as ParkingLotRawRwLock;
use parking_lot::lock_api::RawRwLock as _;
use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// The user-facing lock plus counts of what is held in each mode
///
/// Counts go up after the raw lock is taken and down before it is released.
struct SharedExclusive {
    raw: ParkingLotRawRwLock,
    readers: AtomicUsize,
    writer: AtomicBool,
}

impl SharedExclusive {
    fn new() -> Self {
        SharedExclusive {
            raw: ParkingLotRawRwLock::INIT,
            readers: AtomicUsize::new(0),
            writer: AtomicBool::new(false),
        }
    }

    fn acquire(&self, kind: LockKind) {
        match kind {
            LockKind::Read => {
                self.raw.lock_shared();
                self.readers.fetch_add(1, Ordering::AcqRel);
            }
            LockKind::Write => {
                self.raw.lock_exclusive();
                self.writer.store(true, Ordering::Release);
            }
        }
    }

    fn try_acquire(&self, kind: LockKind) -> bool {
        match kind {
            LockKind::Read => {
                if !self.raw.try_lock_shared() {
                    return false;
                }
                self.readers.fetch_add(1, Ordering::AcqRel);
            }
            LockKind::Write => {
                if !self.raw.try_lock_exclusive() {
                    return false;
                }
                self.writer.store(true, Ordering::Release);
            }
        }
        true
    }

    fn release(&self, kind: LockKind) {
        match kind {
            LockKind::Read => {
                let decremented = self
                    .readers
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
                if decremented.is_err() {
                    panic!("delock: release of unheld lock (rwlock is not read-locked)");
                }
                // SAFETY: the reader count was positive, so a shared lock taken
                // by a matching acquire is still outstanding. `send_guard`
                // allows the release from any thread.
                unsafe { self.raw.unlock_shared() }
            }
            LockKind::Write => {
                if !self.writer.swap(false, Ordering::AcqRel) {
                    panic!("delock: release of unheld lock (rwlock is not write-locked)");
                }
                // SAFETY: `writer` was set, so the exclusive lock is held and
                // has not been released since.
                unsafe { self.raw.unlock_exclusive() }
            }
        }
    }
}

/// Reader-writer lock with timeout-based deadlock detection, id based
///
/// `lock`/`unlock` take the exclusive side, `read_lock`/`read_unlock` the
/// shared side. Every acquisition is bounded by the configured timeout.
pub struct RawRwLock {
    core: LockCore,
    state: Arc<SharedExclusive>,
}

impl RawRwLock {
    /// Create a lock configured from the environment
    pub fn new() -> Self {
        Self::with_config(LockConfig::default())
    }

    /// Create a lock with an explicit configuration
    pub fn with_config(config: LockConfig) -> Self {
        RawRwLock {
            core: LockCore::new(config),
            state: Arc::new(SharedExclusive::new()),
        }
    }

    /// Get the unique ID of this lock
    pub fn id(&self) -> LockId {
        self.core.id()
    }

    /// Acquire the exclusive (write) side
    ///
    /// # Errors
    /// Returns [`DeadlockError`] when the lock could not be acquired in time.
    pub fn lock(&self) -> Result<AttemptId, DeadlockError> {
        self.acquire(LockKind::Write)
    }

    /// Release the exclusive side
    ///
    /// # Panics
    /// Panics if the lock is not write-locked.
    pub fn unlock(&self, id: AttemptId) {
        self.core.release(id, LockKind::Write);
        self.state.release(LockKind::Write);
    }

    /// Acquire the shared (read) side
    ///
    /// # Errors
    /// Returns [`DeadlockError`] when the lock could not be acquired in time.
    pub fn read_lock(&self) -> Result<AttemptId, DeadlockError> {
        self.acquire(LockKind::Read)
    }

    /// Release one shared hold
    ///
    /// # Panics
    /// Panics if the lock is not read-locked.
    pub fn read_unlock(&self, id: AttemptId) {
        self.core.release(id, LockKind::Read);
        self.state.release(LockKind::Read);
    }

    /// Acquire the exclusive side only if it is free right now
    pub fn try_lock(&self) -> Option<AttemptId> {
        self.try_acquire(LockKind::Write)
    }

    /// Acquire the shared side only if no writer holds the lock right now
    pub fn try_read_lock(&self) -> Option<AttemptId> {
        self.try_acquire(LockKind::Read)
    }

    fn acquire(&self, kind: LockKind) -> Result<AttemptId, DeadlockError> {
        let (id, timeout) = self.core.begin(kind);
        let started = Instant::now();

        if self.state.try_acquire(kind) {
            self.core.acquired(id, kind);
            return Ok(id);
        }

        let waiting = Arc::clone(&self.state);
        let late = Arc::clone(&self.state);
        let lock_id = self.core.id();
        let handed_over = handoff::acquire_within(
            timeout,
            move || waiting.acquire(kind),
            move || {
                late.release(kind);
                log_abandoned(lock_id, id, kind);
            },
        );

        if handed_over {
            self.core.acquired(id, kind);
            Ok(id)
        } else {
            Err(self.core.timed_out(id, kind, started.elapsed()))
        }
    }

    fn try_acquire(&self, kind: LockKind) -> Option<AttemptId> {
        let (id, _) = self.core.begin(kind);
        if self.state.try_acquire(kind) {
            self.core.acquired(id, kind);
            Some(id)
        } else {
            self.core.abort(id);
            None
        }
    }

    /// Change the timeout for attempts started from now on
    pub fn set_timeout(&self, timeout: Duration) {
        self.core.set_timeout(timeout);
    }

    pub fn timeout(&self) -> Duration {
        self.core.timeout()
    }

    /// Number of shared holds currently outstanding
    pub fn readers(&self) -> usize {
        self.state.readers.load(Ordering::Acquire)
    }

    pub fn is_write_locked(&self) -> bool {
        self.state.writer.load(Ordering::Acquire)
    }

    /// Number of attempts that are waiting for or holding this lock
    pub fn live_attempts(&self) -> usize {
        self.core.live_attempts()
    }
}

impl Default for RawRwLock {
    fn default() -> Self {
        Self::new()
    }
}

/// A reader-writer lock protecting a value, built on [`RawRwLock`]
pub struct RwLock<T> {
    raw: RawRwLock,
    data: UnsafeCell<T>,
}

// SAFETY: `raw` hands out either one writer or any number of readers.
unsafe impl<T: Send> Send for RwLock<T> {}
unsafe impl<T: Send + Sync> Sync for RwLock<T> {}

/// Guard for a shared (read) lock, released when dropped
pub struct RwLockReadGuard<'a, T> {
    lock: &'a RwLock<T>,
    attempt_id: AttemptId,
    _marker: PhantomData<&'a T>,
}

/// Guard for an exclusive (write) lock, released when dropped
pub struct RwLockWriteGuard<'a, T> {
    lock: &'a RwLock<T>,
    attempt_id: AttemptId,
    _marker: PhantomData<&'a mut T>,
}

impl<T> RwLock<T> {
    /// Create a new lock configured from the environment
    pub fn new(value: T) -> Self {
        Self::with_config(value, LockConfig::default())
    }

    /// Create a new lock with an explicit configuration
    pub fn with_config(value: T, config: LockConfig) -> Self {
        RwLock {
            raw: RawRwLock::with_config(config),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquire a shared (read) lock
    ///
    /// # Errors
    /// Returns [`DeadlockError`] when the lock could not be acquired in time.
    pub fn read(&self) -> Result<RwLockReadGuard<'_, T>, DeadlockError> {
        let attempt_id = self.raw.read_lock()?;
        Ok(self.read_guard(attempt_id))
    }

    /// Acquire an exclusive (write) lock
    ///
    /// # Errors
    /// Returns [`DeadlockError`] when the lock could not be acquired in time.
    pub fn write(&self) -> Result<RwLockWriteGuard<'_, T>, DeadlockError> {
        let attempt_id = self.raw.lock()?;
        Ok(self.write_guard(attempt_id))
    }

    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, T>> {
        self.raw.try_read_lock().map(|id| self.read_guard(id))
    }

    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, T>> {
        self.raw.try_lock().map(|id| self.write_guard(id))
    }

    fn read_guard(&self, attempt_id: AttemptId) -> RwLockReadGuard<'_, T> {
        RwLockReadGuard {
            lock: self,
            attempt_id,
            _marker: PhantomData,
        }
    }

    fn write_guard(&self, attempt_id: AttemptId) -> RwLockWriteGuard<'_, T> {
        RwLockWriteGuard {
            lock: self,
            attempt_id,
            _marker: PhantomData,
        }
    }

    /// The underlying id-based lock
    pub fn raw(&self) -> &RawRwLock {
        &self.raw
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.raw.set_timeout(timeout);
    }

    /// Consumes this RwLock, returning the underlying data
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    /// Returns a mutable reference to the underlying data
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T> RwLockReadGuard<'_, T> {
    pub fn attempt_id(&self) -> AttemptId {
        self.attempt_id
    }
}

impl<T> RwLockWriteGuard<'_, T> {
    pub fn attempt_id(&self) -> AttemptId {
        self.attempt_id
    }
}

impl<T> Deref for RwLockReadGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: a shared hold excludes writers.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Drop for RwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.raw.read_unlock(self.attempt_id);
    }
}

impl<T> Deref for RwLockWriteGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: the exclusive hold excludes everyone else.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for RwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the exclusive hold excludes everyone else.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for RwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.raw.unlock(self.attempt_id);
    }
}

impl<T: Default> Default for RwLock<T> {
    fn default() -> RwLock<T> {
        RwLock::new(Default::default())
    }
}

impl<T> From<T> for RwLock<T> {
    fn from(t: T) -> Self {
        RwLock::new(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick() -> LockConfig {
        LockConfig::from_env().with_timeout(Duration::from_millis(50))
    }

    #[test]
    fn test_readers_coexist() {
        let lock = RawRwLock::with_config(quick());
        let a = lock.read_lock().unwrap();
        let b = lock.read_lock().unwrap();
        assert_ne!(a, b);
        assert_eq!(lock.readers(), 2);
        lock.read_unlock(a);
        lock.read_unlock(b);
        assert_eq!(lock.readers(), 0);
        assert_eq!(lock.live_attempts(), 0);
    }

    #[test]
    fn test_writer_blocked_by_reader_reports_both() {
        let lock = RawRwLock::with_config(quick());
        let reader = lock.read_lock().unwrap();

        let err = lock.lock().unwrap_err();
        assert_eq!(err.kind, LockKind::Write);
        assert_eq!(err.report.total(), 1);
        assert_eq!(err.report.groups[0].kind, LockKind::Read);

        lock.read_unlock(reader);
        let writer = lock.lock().unwrap();
        assert!(lock.is_write_locked());
        lock.unlock(writer);
    }

    #[test]
    fn test_reader_blocked_by_writer() {
        let lock = RawRwLock::with_config(quick());
        let writer = lock.lock().unwrap();
        let err = lock.read_lock().unwrap_err();
        assert_eq!(err.kind, LockKind::Read);
        assert!(lock.try_read_lock().is_none());
        lock.unlock(writer);
    }

    #[test]
    fn test_unlock_with_reader_id_keeps_registry_entry() {
        let lock = RawRwLock::with_config(quick());
        let reader = lock.read_lock().unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| lock.unlock(reader)));
        assert!(result.is_err());
        assert_eq!(lock.live_attempts(), 1);
        lock.read_unlock(reader);
    }

    #[test]
    #[should_panic(expected = "release of unheld lock")]
    fn test_read_unlock_without_readers_panics() {
        let lock = RawRwLock::with_config(quick());
        let writer = lock.lock().unwrap();
        lock.read_unlock(writer);
    }

    #[test]
    fn test_guards() {
        let lock = RwLock::with_config(String::from("a"), quick());
        {
            let r1 = lock.read().unwrap();
            let r2 = lock.try_read().unwrap();
            assert_eq!(*r1, *r2);
            assert!(lock.try_write().is_none());
        }
        lock.write().unwrap().push('b');
        assert_eq!(lock.into_inner(), "ab");
    }
}
