use delock::{RawMutex, RawRwLock};
use std::collections::HashSet;
mod common;
use common::{SHORT_TIMEOUT, config};

#[test]
fn test_uncontended_mutex_always_succeeds_with_fresh_ids() {
    let mutex = RawMutex::with_config(config(SHORT_TIMEOUT));
    let mut seen = HashSet::new();

    for _ in 0..20 {
        let id = mutex.lock().expect("uncontended lock must succeed");
        assert!(seen.insert(id), "attempt id {id} was handed out twice");
        mutex.unlock(id);
    }

    assert_eq!(mutex.live_attempts(), 0);
}

#[test]
fn test_uncontended_rwlock_ids_are_shared_between_modes() {
    let lock = RawRwLock::with_config(config(SHORT_TIMEOUT));
    let mut seen = HashSet::new();

    for i in 0..10 {
        let id = if i % 2 == 0 {
            let id = lock.read_lock().unwrap();
            lock.read_unlock(id);
            id
        } else {
            let id = lock.lock().unwrap();
            lock.unlock(id);
            id
        };
        assert!(seen.insert(id));
    }

    assert_eq!(lock.live_attempts(), 0);
}

#[test]
fn test_instances_are_independent() {
    let a = RawMutex::with_config(config(SHORT_TIMEOUT));
    let b = RawMutex::with_config(config(SHORT_TIMEOUT));

    let held_a = a.lock().unwrap();
    // Holding `a` has no effect on `b`.
    let held_b = b.lock().unwrap();
    assert_ne!(a.id(), b.id());
    assert_eq!(a.live_attempts(), 1);
    assert_eq!(b.live_attempts(), 1);

    b.unlock(held_b);
    a.unlock(held_a);
}
