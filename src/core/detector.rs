//! Delivery of detected deadlocks to the user callback
//!
//! The callback runs on a dedicated dispatcher thread so a slow or blocking
//! callback cannot hold up the thread that timed out.

use crate::core::error::DeadlockError;
use crate::core::logger;
use crate::core::types::{AttemptId, Events};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::mpsc::{Sender, channel};

type Callback = Arc<dyn Fn(DeadlockError) + Send + Sync>;

lazy_static::lazy_static! {
    static ref DISPATCHER: Dispatcher = Dispatcher::new();
    static ref CALLBACK: RwLock<Option<Callback>> = RwLock::new(None);
}

/// Background dispatcher for asynchronous callback execution
struct Dispatcher {
    sender: Sender<DeadlockError>,
    _thread_handle: Option<std::thread::JoinHandle<()>>,
}

impl Dispatcher {
    fn new() -> Self {
        let (tx, rx) = channel::<DeadlockError>();

        let thread_handle = std::thread::Builder::new()
            .name("delock-dispatcher".to_string())
            .spawn(move || {
                while let Ok(error) = rx.recv() {
                    let callback = CALLBACK.read().clone();
                    if let Some(cb) = callback {
                        cb(error);
                    }
                }
            })
            .ok();

        Dispatcher {
            sender: tx,
            _thread_handle: thread_handle,
        }
    }

    fn send(&self, error: DeadlockError) {
        // Dropped if the dispatcher thread could not be started.
        let _ = self.sender.send(error);
    }
}

/// Install the callback invoked for every detected deadlock, replacing any
/// previous one
pub fn init_detector(callback: Box<dyn Fn(DeadlockError) + Send + Sync>) {
    *CALLBACK.write() = Some(Arc::from(callback));
}

/// Remove the installed callback
pub fn clear_detector() {
    *CALLBACK.write() = None;
}

/// Log a timed out attempt and hand the error to the callback
pub(crate) fn process_deadlock(attempt_id: AttemptId, error: &DeadlockError) {
    logger::log_attempt_event(error.lock_id, attempt_id, error.kind, Events::TimedOut);

    if CALLBACK.read().is_some() {
        DISPATCHER.send(error.clone());
    }
}
