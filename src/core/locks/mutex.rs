use crate::core::config::LockConfig;
use crate::core::error::DeadlockError;
use crate::core::handoff;
use crate::core::locks::{LockCore, log_abandoned};
use crate::core::types::{AttemptId, LockId, LockKind};
use parking_lot::RawMutex as ParkingLotRawMutex;
use parking_lot::lock_api::RawMutex as _;
use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// The user-facing exclusive lock plus a record of whether it is held
///
/// `held` is set right after the raw lock is taken and cleared right before
/// it is released, so it never claims more than the raw lock.
struct Exclusive {
    raw: ParkingLotRawMutex,
    held: AtomicBool,
}

impl Exclusive {
    fn new() -> Self {
        Exclusive {
            raw: ParkingLotRawMutex::INIT,
            held: AtomicBool::new(false),
        }
    }

    fn acquire(&self) {
        self.raw.lock();
        self.held.store(true, Ordering::Release);
    }

    fn try_acquire(&self) -> bool {
        if self.raw.try_lock() {
            self.held.store(true, Ordering::Release);
            true
        } else {
            false
        }
    }

    fn release(&self) {
        if !self.held.swap(false, Ordering::AcqRel) {
            panic!("delock: release of unheld lock (mutex is not locked)");
        }
        // SAFETY: `held` was true, so a matching acquire took the raw lock and
        // nobody released it since. parking_lot is built with `send_guard`,
        // which allows the release from any thread.
        unsafe { self.raw.unlock() }
    }
}

/// Exclusive lock with timeout-based deadlock detection
///
/// `lock` blocks for at most the configured timeout. On success it returns
/// the attempt id to pass to `unlock`; on timeout it returns a
/// [`DeadlockError`] describing every attempt live on this lock.
///
/// # Example
///
/// ```rust
/// use delock::RawMutex;
/// use std::time::Duration;
///
/// let mutex = RawMutex::new();
/// mutex.set_timeout(Duration::from_millis(100));
///
/// let id = mutex.lock().expect("uncontended lock");
/// // critical section
/// mutex.unlock(id);
/// ```
pub struct RawMutex {
    core: LockCore,
    state: Arc<Exclusive>,
}

impl RawMutex {
    /// Create a mutex configured from the environment
    pub fn new() -> Self {
        Self::with_config(LockConfig::default())
    }

    /// Create a mutex with an explicit configuration
    pub fn with_config(config: LockConfig) -> Self {
        RawMutex {
            core: LockCore::new(config),
            state: Arc::new(Exclusive::new()),
        }
    }

    /// Get the ID of this mutex, as used in the event log
    pub fn id(&self) -> LockId {
        self.core.id()
    }

    /// Acquire the lock, giving up after the timeout
    ///
    /// # Errors
    /// Returns [`DeadlockError`] when the lock could not be acquired in time.
    pub fn lock(&self) -> Result<AttemptId, DeadlockError> {
        let (id, timeout) = self.core.begin(LockKind::Write);
        let started = Instant::now();

        if self.state.try_acquire() {
            self.core.acquired(id, LockKind::Write);
            return Ok(id);
        }

        let waiting = Arc::clone(&self.state);
        let late = Arc::clone(&self.state);
        let lock_id = self.core.id();
        let handed_over = handoff::acquire_within(
            timeout,
            move || waiting.acquire(),
            move || {
                late.release();
                log_abandoned(lock_id, id, LockKind::Write);
            },
        );

        if handed_over {
            self.core.acquired(id, LockKind::Write);
            Ok(id)
        } else {
            Err(self.core.timed_out(id, LockKind::Write, started.elapsed()))
        }
    }

    /// Acquire the lock only if it is free right now
    pub fn try_lock(&self) -> Option<AttemptId> {
        let (id, _) = self.core.begin(LockKind::Write);
        if self.state.try_acquire() {
            self.core.acquired(id, LockKind::Write);
            Some(id)
        } else {
            self.core.abort(id);
            None
        }
    }

    /// Forget the attempt and release the lock
    ///
    /// Unknown or already released ids leave the registry untouched.
    ///
    /// # Panics
    /// Panics if the mutex is not locked.
    pub fn unlock(&self, id: AttemptId) {
        self.core.release(id, LockKind::Write);
        self.state.release();
    }

    /// Change the timeout for attempts started from now on
    pub fn set_timeout(&self, timeout: Duration) {
        self.core.set_timeout(timeout);
    }

    pub fn timeout(&self) -> Duration {
        self.core.timeout()
    }

    pub fn is_locked(&self) -> bool {
        self.state.held.load(Ordering::Acquire)
    }

    /// Number of attempts that are waiting for or holding this mutex
    pub fn live_attempts(&self) -> usize {
        self.core.live_attempts()
    }
}

impl Default for RawMutex {
    fn default() -> Self {
        Self::new()
    }
}

/// A mutex protecting a value, built on [`RawMutex`]
///
/// # Example
///
/// ```rust
/// use delock::Mutex;
/// use std::sync::Arc;
/// use std::thread;
///
/// let mutex = Arc::new(Mutex::new(0));
/// let mutex_clone = Arc::clone(&mutex);
///
/// thread::spawn(move || {
///     *mutex_clone.lock().unwrap() += 1;
/// })
/// .join()
/// .unwrap();
///
/// assert_eq!(*mutex.lock().unwrap(), 1);
/// ```
pub struct Mutex<T> {
    raw: RawMutex,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is serialized by `raw`.
unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

/// Guard for a [`Mutex`]; unlocks when dropped
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
    attempt_id: AttemptId,
    _marker: PhantomData<&'a mut T>,
}

impl<T> Mutex<T> {
    /// Create a new mutex configured from the environment
    pub fn new(value: T) -> Self {
        Self::with_config(value, LockConfig::default())
    }

    /// Create a new mutex with an explicit configuration
    pub fn with_config(value: T, config: LockConfig) -> Self {
        Mutex {
            raw: RawMutex::with_config(config),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquire the lock, giving up after the timeout
    ///
    /// # Errors
    /// Returns [`DeadlockError`] when the lock could not be acquired in time.
    pub fn lock(&self) -> Result<MutexGuard<'_, T>, DeadlockError> {
        let attempt_id = self.raw.lock()?;
        Ok(self.guard(attempt_id))
    }

    /// Acquire the lock only if it is free right now
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.raw.try_lock().map(|attempt_id| self.guard(attempt_id))
    }

    fn guard(&self, attempt_id: AttemptId) -> MutexGuard<'_, T> {
        MutexGuard {
            mutex: self,
            attempt_id,
            _marker: PhantomData,
        }
    }

    /// The underlying id-based lock
    pub fn raw(&self) -> &RawMutex {
        &self.raw
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.raw.set_timeout(timeout);
    }

    /// Consumes this mutex, returning the underlying data
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    /// Returns a mutable reference to the underlying data
    ///
    /// The mutable borrow statically guarantees no locks exist.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T> MutexGuard<'_, T> {
    /// Attempt id this guard releases on drop
    pub fn attempt_id(&self) -> AttemptId {
        self.attempt_id
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves the mutex is held.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves the mutex is held exclusively.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.raw.unlock(self.attempt_id);
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Mutex<T> {
        Mutex::new(Default::default())
    }
}

impl<T> From<T> for Mutex<T> {
    fn from(t: T) -> Self {
        Mutex::new(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn quick() -> LockConfig {
        LockConfig::from_env().with_timeout(Duration::from_millis(50))
    }

    #[test]
    fn test_uncontended_lock_returns_fresh_ids() {
        let mutex = RawMutex::with_config(quick());
        let mut seen = Vec::new();
        for _ in 0..5 {
            let id = mutex.lock().unwrap();
            assert!(!seen.contains(&id));
            assert!(mutex.is_locked());
            assert_eq!(mutex.live_attempts(), 1);
            seen.push(id);
            mutex.unlock(id);
        }
        assert!(!mutex.is_locked());
        assert_eq!(mutex.live_attempts(), 0);
    }

    #[test]
    fn test_try_lock_does_not_register_failures() {
        let mutex = RawMutex::with_config(quick());
        let id = mutex.try_lock().unwrap();
        assert!(mutex.try_lock().is_none());
        assert_eq!(mutex.live_attempts(), 1);
        mutex.unlock(id);
    }

    #[test]
    fn test_second_lock_times_out() {
        let mutex = RawMutex::with_config(quick());
        let held = mutex.lock().unwrap();

        let err = mutex.lock().unwrap_err();
        assert_eq!(err.kind, LockKind::Write);
        assert_eq!(err.lock_id, mutex.id());
        assert!(err.waited >= Duration::from_millis(50));
        // The holder is still reported, the failed attempt is gone.
        assert_eq!(err.report.total(), 1);
        assert_eq!(mutex.live_attempts(), 1);

        mutex.unlock(held);
    }

    #[test]
    #[should_panic(expected = "release of unheld lock")]
    fn test_unlock_of_unlocked_mutex_panics() {
        let mutex = RawMutex::with_config(quick());
        let id = mutex.lock().unwrap();
        mutex.unlock(id);
        mutex.unlock(id);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let mutex = Mutex::with_config(vec![1], quick());
        {
            let mut guard = mutex.lock().unwrap();
            guard.push(2);
            assert!(mutex.try_lock().is_none());
        }
        assert_eq!(*mutex.lock().unwrap(), vec![1, 2]);
        assert_eq!(mutex.into_inner(), vec![1, 2]);
    }

    #[test]
    fn test_timeout_is_per_instance() {
        let a = RawMutex::with_config(quick());
        let b = RawMutex::with_config(quick());
        a.set_timeout(Duration::from_millis(7));
        assert_eq!(a.timeout(), Duration::from_millis(7));
        assert_eq!(b.timeout(), Duration::from_millis(50));
    }

    #[test]
    fn test_mutual_exclusion_across_threads() {
        let mutex = Arc::new(Mutex::with_config(0u32, quick()));
        mutex.set_timeout(Duration::from_secs(5));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let mutex = Arc::clone(&mutex);
                thread::spawn(move || {
                    for _ in 0..25 {
                        *mutex.lock().unwrap() += 1;
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*mutex.lock().unwrap(), 100);
    }
}
