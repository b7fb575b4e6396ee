pub mod mutex;
pub mod rwlock;

use crate::core::config::LockConfig;
use crate::core::detector;
use crate::core::error::DeadlockError;
use crate::core::logger;
use crate::core::registry::AttemptRegistry;
use crate::core::report::DeadlockReport;
use crate::core::trace::TraceProvider;
use crate::core::types::{AttemptId, Events, LockId, LockKind, get_current_thread_id};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

static NEXT_LOCK_ID: AtomicUsize = AtomicUsize::new(1);

/// State behind the bookkeeping mutex
struct Bookkeeping {
    registry: AttemptRegistry,
    timeout: Duration,
}

/// Registry, timeout and trace capture shared by both primitives
///
/// The bookkeeping mutex is only held for short, non-blocking sections and
/// never while waiting on the user-facing lock.
pub(crate) struct LockCore {
    id: LockId,
    state: Mutex<Bookkeeping>,
    provider: Arc<dyn TraceProvider>,
}

impl LockCore {
    pub(crate) fn new(config: LockConfig) -> Self {
        LockCore {
            id: NEXT_LOCK_ID.fetch_add(1, Ordering::SeqCst),
            state: Mutex::new(Bookkeeping {
                registry: AttemptRegistry::new(),
                timeout: config.timeout,
            }),
            provider: config.provider,
        }
    }

    pub(crate) fn id(&self) -> LockId {
        self.id
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.state.lock().timeout
    }

    pub(crate) fn set_timeout(&self, timeout: Duration) {
        self.state.lock().timeout = timeout;
    }

    /// Number of attempts currently registered, pending or holding
    pub(crate) fn live_attempts(&self) -> usize {
        self.state.lock().registry.len()
    }

    /// Capture the caller's stack and register a new attempt
    ///
    /// Returns the attempt id and the timeout that applies to it.
    pub(crate) fn begin(&self, kind: LockKind) -> (AttemptId, Duration) {
        let trace = self.provider.capture();

        let (id, timeout) = {
            let mut state = self.state.lock();
            (state.registry.register(kind, trace), state.timeout)
        };

        logger::log_attempt_event(self.id, id, kind, Events::Attempt);
        (id, timeout)
    }

    /// Record that the lock was handed to the attempt
    pub(crate) fn acquired(&self, id: AttemptId, kind: LockKind) {
        self.state.lock().registry.mark_held(id);
        logger::log_attempt_event(self.id, id, kind, Events::Acquired);
    }

    /// Drop a registered attempt that never got the lock, without a report
    pub(crate) fn abort(&self, id: AttemptId) {
        self.state.lock().registry.remove(id);
    }

    /// Remove a timed out attempt and build the error from what is left
    pub(crate) fn timed_out(&self, id: AttemptId, kind: LockKind, waited: Duration) -> DeadlockError {
        let snapshot = {
            let mut state = self.state.lock();
            state.registry.remove(id);
            state.registry.snapshot()
        };
        // Symbols are resolved here, outside the bookkeeping lock.

        let error = DeadlockError {
            lock_id: self.id,
            thread_id: get_current_thread_id(),
            kind,
            waited,
            report: DeadlockReport::build(&snapshot),
            timestamp: Utc::now().to_rfc3339(),
        };

        detector::process_deadlock(id, &error);
        error
    }

    /// Forget a held attempt on unlock; bogus ids are ignored
    pub(crate) fn release(&self, id: AttemptId, kind: LockKind) {
        let removed = self.state.lock().registry.release(id, kind);
        if removed.is_some() {
            logger::log_attempt_event(self.id, id, kind, Events::Released);
        }
    }
}

/// Log a background acquisition that arrived after its caller left
pub(crate) fn log_abandoned(lock_id: LockId, id: AttemptId, kind: LockKind) {
    logger::log_attempt_event(lock_id, id, kind, Events::Abandoned);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_path_does_not_resolve_symbols() {
        let core = LockCore::new(LockConfig::from_env());
        let (id, _) = core.begin(LockKind::Write);
        core.acquired(id, LockKind::Write);

        let snapshot = core.state.lock().registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(!snapshot[0].1.is_resolved());

        core.release(id, LockKind::Write);
        assert_eq!(core.live_attempts(), 0);
    }

    #[test]
    fn test_timeout_report_is_resolved() {
        let core = LockCore::new(LockConfig::from_env());
        let (holder, _) = core.begin(LockKind::Write);
        core.acquired(holder, LockKind::Write);
        let (waiter, _) = core.begin(LockKind::Write);

        let err = core.timed_out(waiter, LockKind::Write, Duration::ZERO);
        assert_eq!(err.report.total(), 1);
        assert!(err.report.groups[0].signature.contains("test_timeout_report_is_resolved"));
    }
}
