use delock::{LockKind, Mutex};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
mod common;
use common::{SHORT_TIMEOUT, SLACK, config};

#[test]
fn test_timeout_fires_within_bound() {
    let mutex = Arc::new(Mutex::with_config((), config(SHORT_TIMEOUT)));

    // First capture loads debug info; keep it out of the measurement.
    drop(mutex.lock().unwrap());

    let barrier = Arc::new(Barrier::new(2));
    let holder = {
        let mutex = Arc::clone(&mutex);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            let _guard = mutex.lock().unwrap();
            barrier.wait();
            thread::sleep(Duration::from_millis(500));
        })
    };

    barrier.wait();
    let start = Instant::now();
    let err = match mutex.lock() {
        Err(err) => err,
        Ok(_) => panic!("lock should time out while the holder sleeps"),
    };
    let elapsed = start.elapsed();

    assert!(elapsed >= SHORT_TIMEOUT, "gave up after only {elapsed:?}");
    assert!(err.waited >= SHORT_TIMEOUT);
    assert!(
        err.waited <= SHORT_TIMEOUT + SLACK,
        "waited {:?}, expected about {SHORT_TIMEOUT:?}",
        err.waited
    );
    assert_eq!(err.kind, LockKind::Write);
    assert!(err.to_string().starts_with("Deadlock detected"));

    holder.join().unwrap();
}

#[test]
fn test_set_timeout_applies_to_later_attempts() {
    let mutex = Arc::new(Mutex::with_config((), config(Duration::from_secs(5))));
    let guard = mutex.lock().unwrap();

    mutex.set_timeout(Duration::from_millis(20));
    let start = Instant::now();
    assert!(mutex.lock().is_err());
    assert!(start.elapsed() < Duration::from_secs(2));

    drop(guard);
}
