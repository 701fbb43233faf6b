//! Wait primitives shared by the blocking operations

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Lock `m`, carrying on past a panicked holder
///
/// Everything behind these locks is re-validated against shared memory
/// before use, so a poisoned guard carries no broken invariant.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cancellation epoch
///
/// A blocking call records the epoch when it starts and gives up once it
/// moves on.
#[derive(Debug, Default)]
pub(crate) struct Cancel(AtomicU64);

impl Cancel {
    pub fn token(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    pub fn is_cancelled(&self, token: u64) -> bool {
        self.0.load(Ordering::Acquire) != token
    }

    pub fn cancel(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wait {
    Signalled,
    TimedOut,
    Cancelled,
}

/// Counting notification
///
/// Waiters take `count()` before doing whatever may trigger the signal, then
/// wait for the count to move. A notification that lands in between is not
/// lost.
#[derive(Debug, Default)]
pub(crate) struct Signal {
    count: Mutex<u64>,
    cv: Condvar,
}

impl Signal {
    pub fn count(&self) -> u64 {
        *lock(&self.count)
    }

    pub fn notify(&self) {
        *lock(&self.count) += 1;
        self.cv.notify_all();
    }

    /// Wake every waiter without counting a notification
    pub fn kick(&self) {
        let _guard = lock(&self.count);
        self.cv.notify_all();
    }

    pub fn wait_since(&self, seen: u64, timeout: Duration, cancel: &Cancel, token: u64) -> Wait {
        let deadline = Instant::now() + timeout;
        let mut count = lock(&self.count);
        loop {
            if *count != seen {
                return Wait::Signalled;
            }
            if cancel.is_cancelled(token) {
                return Wait::Cancelled;
            }
            let now = Instant::now();
            if now >= deadline {
                return Wait::TimedOut;
            }
            count = self
                .cv
                .wait_timeout(count, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_notify_before_wait_not_lost() {
        let sig = Signal::default();
        let cancel = Cancel::default();
        let seen = sig.count();
        sig.notify();
        assert_eq!(
            sig.wait_since(seen, Duration::from_millis(1), &cancel, cancel.token()),
            Wait::Signalled
        );
    }

    #[test]
    fn test_timeout() {
        let sig = Signal::default();
        let cancel = Cancel::default();
        let start = Instant::now();
        let res = sig.wait_since(sig.count(), Duration::from_millis(20), &cancel, cancel.token());
        assert_eq!(res, Wait::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_cancel_wakes_waiter() {
        let sig = Arc::new(Signal::default());
        let cancel = Arc::new(Cancel::default());
        let token = cancel.token();

        let waiter = {
            let (sig, cancel) = (sig.clone(), cancel.clone());
            thread::spawn(move || sig.wait_since(sig.count(), Duration::from_secs(5), &cancel, token))
        };
        thread::sleep(Duration::from_millis(10));
        cancel.cancel();
        sig.kick();
        assert_eq!(waiter.join().unwrap(), Wait::Cancelled);
    }
}
