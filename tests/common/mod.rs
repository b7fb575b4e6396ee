use delock::{DeadlockError, Delock, LockConfig};
use std::sync::{Arc, Mutex as StdMutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

#[allow(dead_code)]
pub const SHORT_TIMEOUT: Duration = Duration::from_millis(50);
#[allow(dead_code)]
pub const LONG_TIMEOUT: Duration = Duration::from_secs(10);
/// Scheduling allowance on top of a timeout
#[allow(dead_code)]
pub const SLACK: Duration = Duration::from_millis(250);

#[allow(dead_code)]
pub fn config(timeout: Duration) -> LockConfig {
    LockConfig::from_env().with_timeout(timeout)
}

/// Poll `condition` until it holds or `limit` passes
#[allow(dead_code)]
pub fn wait_until(limit: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[allow(dead_code)]
pub struct DetectorHarness {
    pub rx: mpsc::Receiver<DeadlockError>,
    pub detected: Arc<StdMutex<bool>>,
}

#[allow(dead_code)]
pub fn start_detector(builder: Delock) -> DetectorHarness {
    let (tx, rx) = mpsc::channel::<DeadlockError>();
    let detected = Arc::new(StdMutex::new(false));
    let flag = Arc::clone(&detected);

    builder
        .callback(move |error| {
            *flag.lock().unwrap() = true;
            let _ = tx.send(error);
        })
        .start()
        .expect("Failed to initialize detector");

    DetectorHarness { rx, detected }
}

#[allow(dead_code)]
pub fn expect_deadlock(h: &DetectorHarness, timeout: Duration) -> DeadlockError {
    match h.rx.recv_timeout(timeout) {
        Ok(error) => {
            assert!(*h.detected.lock().unwrap(), "Deadlock flag should be set");
            error
        }
        Err(_) => panic!("No deadlock reported within {timeout:?}"),
    }
}
