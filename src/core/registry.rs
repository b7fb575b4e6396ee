//! Per-primitive bookkeeping of lock attempts
//!
//! An entry is created when a lock call begins. It is removed when the call
//! times out, or by the matching unlock once the lock was handed over, so
//! held locks stay visible to the reports of other blocked callers.

use crate::core::trace::CapturedTrace;
use crate::core::types::{AttemptId, LockKind};
use fxhash::FxHashMap;

/// One lock attempt, pending or holding
#[derive(Debug, Clone)]
pub struct Attempt {
    pub kind: LockKind,
    pub trace: CapturedTrace,
    /// Set once the lock was handed to the caller
    pub held: bool,
}

/// Mapping from attempt id to attempt
///
/// Not synchronized on its own; the owning primitive keeps it behind its
/// bookkeeping mutex.
#[derive(Debug, Default)]
pub struct AttemptRegistry {
    last_id: u64,
    attempts: FxHashMap<AttemptId, Attempt>,
}

impl AttemptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new attempt and return its freshly allocated id
    pub fn register(&mut self, kind: LockKind, trace: CapturedTrace) -> AttemptId {
        self.last_id += 1;
        let id = AttemptId(self.last_id);
        self.attempts.insert(
            id,
            Attempt {
                kind,
                trace,
                held: false,
            },
        );
        id
    }

    /// Mark an attempt as holding the lock
    pub fn mark_held(&mut self, id: AttemptId) {
        if let Some(attempt) = self.attempts.get_mut(&id) {
            attempt.held = true;
        }
    }

    /// Remove an attempt; unknown or already removed ids are ignored
    pub fn remove(&mut self, id: AttemptId) -> Option<Attempt> {
        self.attempts.remove(&id)
    }

    /// Remove a held attempt of the given kind on unlock
    ///
    /// Ids that are unknown, still pending, or of the other kind are left
    /// alone, so a bogus unlock cannot erase another caller's attempt.
    pub fn release(&mut self, id: AttemptId, kind: LockKind) -> Option<Attempt> {
        match self.attempts.get(&id) {
            Some(attempt) if attempt.held && attempt.kind == kind => self.attempts.remove(&id),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    /// Copy out every live attempt for report building, oldest first
    pub fn snapshot(&self) -> Vec<(LockKind, CapturedTrace)> {
        let mut entries: Vec<_> = self.attempts.iter().collect();
        entries.sort_by_key(|(id, _)| **id);
        entries
            .into_iter()
            .map(|(_, a)| (a.kind, a.trace.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::core::trace::StackTrace;

    fn empty_trace() -> CapturedTrace {
        StackTrace::for_current_thread(Vec::new()).into()
    }

    #[test]
    fn test_ids_strictly_increase_and_are_not_reused() {
        let mut registry = AttemptRegistry::new();
        let a = registry.register(LockKind::Write, empty_trace());
        let b = registry.register(LockKind::Read, empty_trace());
        assert!(b > a);

        registry.remove(b);
        let c = registry.register(LockKind::Write, empty_trace());
        assert!(c > b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut registry = AttemptRegistry::new();
        let a = registry.register(LockKind::Write, empty_trace());
        let b = registry.register(LockKind::Write, empty_trace());

        assert!(registry.remove(a).is_some());
        assert!(registry.remove(a).is_none());
        assert!(registry.remove(AttemptId(999)).is_none());

        assert_eq!(registry.len(), 1);
        assert!(registry.remove(b).is_some());
    }

    #[test]
    fn test_release_only_touches_held_attempts_of_that_kind() {
        let mut registry = AttemptRegistry::new();
        let pending = registry.register(LockKind::Write, empty_trace());
        let reader = registry.register(LockKind::Read, empty_trace());
        registry.mark_held(reader);

        assert!(registry.release(pending, LockKind::Write).is_none());
        assert!(registry.release(reader, LockKind::Write).is_none());
        assert_eq!(registry.len(), 2);

        assert!(registry.release(reader, LockKind::Read).is_some());
        assert!(registry.release(reader, LockKind::Read).is_none());
        assert!(registry.remove(pending).is_some());
    }

    #[test]
    fn test_snapshot_is_oldest_first() {
        let mut registry = AttemptRegistry::new();
        registry.register(LockKind::Write, empty_trace());
        registry.register(LockKind::Read, empty_trace());
        registry.register(LockKind::Write, empty_trace());

        let kinds: Vec<_> = registry
            .snapshot()
            .into_iter()
            .map(|(kind, _)| kind.label())
            .collect();
        assert_eq!(kinds, vec!["WRITE", "READ", "WRITE"]);
    }
}
