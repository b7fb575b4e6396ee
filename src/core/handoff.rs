//! Timed acquisition through a one-shot rendezvous
//!
//! The blocking acquire runs on a background thread. Once it gets the lock it
//! offers it over a zero-capacity channel. A zero-capacity send only
//! completes while the caller is still inside `recv_timeout`, so exactly one
//! of two things happens: the caller takes the lock, or the caller has left
//! and the background thread releases what it acquired.

use crossbeam_channel::bounded;
use std::thread;
use std::time::Duration;

/// Run `acquire` on a background thread and wait at most `timeout` for it
///
/// Returns `true` when the lock was handed over. On `false` the caller does
/// not own the lock; if `acquire` completes later, `release` undoes it on the
/// background thread.
pub(crate) fn acquire_within<A, R>(timeout: Duration, acquire: A, release: R) -> bool
where
    A: FnOnce() + Send + 'static,
    R: FnOnce() + Send + 'static,
{
    let (tx, rx) = bounded::<()>(0);

    let spawned = thread::Builder::new()
        .name("delock-acquire".to_string())
        .spawn(move || {
            acquire();
            if tx.send(()).is_err() {
                release();
            }
        });

    if spawned.is_err() {
        return false;
    }

    rx.recv_timeout(timeout).is_ok()
}
