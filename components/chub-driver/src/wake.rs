//! Wake/Sleep Coordinator
//!
//! Keeps the CHUB awake while any AP thread needs it and hands out exclusive
//! transaction rights one at a time.
//!
//! - `requested`: callers that want the link awake. The physical line is
//!   asserted on the 0->1 edge and released on the 1->0 edge.
//! - `priority`: holders that force the line asserted no matter what
//!   `requested` says (crash dumps use this).
//! - `acquired`: token of the single caller currently mid-transaction, taken
//!   by compare-and-swap once the CHUB reports awake.
//!
//! Both acquisitions are RAII guards, so every acquire has exactly one
//! release on every exit path, cancellation included.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::sync::{lock, Cancel, Signal, Wait};
use crate::{ChubError, Result};

/// Re-check interval while waiting for the CHUB to report awake
const POLL: Duration = Duration::from_millis(5);

/// The physical wake signal and the peer's view of it
pub trait WakeLine: Send + Sync {
    /// Drive the line
    fn set(&self, asserted: bool);

    /// Whether the CHUB currently reports itself awake
    fn peer_awake(&self) -> bool;
}

pub struct WakeCoordinator {
    line: Arc<dyn WakeLine>,
    requested: AtomicU32,
    priority: AtomicU32,
    acquired: AtomicU64,
    next_token: AtomicU64,
    level: Mutex<bool>,
    changed: Signal,
    cancel: Cancel,
    mismatches: AtomicU64,
}

impl WakeCoordinator {
    pub fn new(line: Arc<dyn WakeLine>) -> Arc<Self> {
        Arc::new(Self {
            line,
            requested: AtomicU32::new(0),
            priority: AtomicU32::new(0),
            acquired: AtomicU64::new(0),
            next_token: AtomicU64::new(1),
            level: Mutex::new(false),
            changed: Signal::default(),
            cancel: Cancel::default(),
            mismatches: AtomicU64::new(0),
        })
    }

    /// Keep the CHUB awake and take the exclusive transaction token
    ///
    /// Blocks until the CHUB reports awake and no other caller holds the
    /// token.
    ///
    /// # Errors
    /// - `WakeTimeout` if that does not happen within `timeout`
    /// - `Interrupted` if `interrupt_all` runs while waiting
    ///
    /// Either way this caller's request is withdrawn before returning.
    pub fn request(self: &Arc<Self>, timeout: Duration) -> Result<WakeGuard> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let epoch = self.cancel.token();
        if self.requested.fetch_add(1, Ordering::AcqRel) == 0 {
            self.update_line();
        }

        let deadline = Instant::now() + timeout;
        loop {
            let seen = self.changed.count();
            if self.cancel.is_cancelled(epoch) {
                self.withdraw();
                return Err(ChubError::Interrupted);
            }
            if self.line.peer_awake()
                && self
                    .acquired
                    .compare_exchange(0, token, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                return Ok(WakeGuard {
                    coord: self.clone(),
                    token,
                });
            }

            let now = Instant::now();
            if now >= deadline {
                self.withdraw();
                return Err(ChubError::WakeTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            let slice = (deadline - now).min(POLL);
            if self.changed.wait_since(seen, slice, &self.cancel, epoch) == Wait::Cancelled {
                self.withdraw();
                return Err(ChubError::Interrupted);
            }
        }
    }

    /// Force the line asserted until the guard drops
    ///
    /// Does not wait for the CHUB and does not take the transaction token.
    pub fn lock_priority(self: &Arc<Self>) -> PriorityGuard {
        if self.priority.fetch_add(1, Ordering::AcqRel) == 0 {
            self.update_line();
        }
        PriorityGuard { coord: self.clone() }
    }

    /// Wake blocked requesters so they re-check the CHUB state
    pub fn notify(&self) {
        self.changed.notify();
    }

    /// Fail every request currently blocked with `Interrupted`
    pub fn interrupt_all(&self) {
        self.cancel.cancel();
        self.changed.kick();
    }

    pub fn requested(&self) -> u32 {
        self.requested.load(Ordering::Acquire)
    }

    pub fn priority_held(&self) -> u32 {
        self.priority.load(Ordering::Acquire)
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired.load(Ordering::Acquire) != 0
    }

    /// Level last driven onto the line
    pub fn line_asserted(&self) -> bool {
        *lock(&self.level)
    }

    /// Releases that presented a token other than the one holding the link
    pub fn token_mismatches(&self) -> u64 {
        self.mismatches.load(Ordering::Acquire)
    }

    fn release(&self, token: u64) {
        if let Err(holder) =
            self.acquired
                .compare_exchange(token, 0, Ordering::AcqRel, Ordering::Acquire)
        {
            self.mismatches.fetch_add(1, Ordering::AcqRel);
            log::error!(
                "chub wake: token {} released while {} holds the link",
                token,
                holder
            );
        }
        self.withdraw();
        self.changed.notify();
    }

    fn withdraw(&self) {
        if self.requested.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.update_line();
        }
    }

    fn drop_priority(&self) {
        if self.priority.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.update_line();
        }
    }

    // Recomputes from the counters under the level lock, so racing edges
    // settle on whatever the counters say last.
    fn update_line(&self) {
        let mut level = lock(&self.level);
        let want = self.requested.load(Ordering::Acquire) > 0
            || self.priority.load(Ordering::Acquire) > 0;
        if *level != want {
            self.line.set(want);
            *level = want;
            log::debug!("chub wake line {}", if want { "asserted" } else { "released" });
        }
    }
}

/// Exclusive transaction rights; releases on drop
pub struct WakeGuard {
    coord: Arc<WakeCoordinator>,
    token: u64,
}

impl WakeGuard {
    pub fn token(&self) -> u64 {
        self.token
    }
}

impl Drop for WakeGuard {
    fn drop(&mut self) {
        self.coord.release(self.token);
    }
}

/// Forced wake; releases on drop
pub struct PriorityGuard {
    coord: Arc<WakeCoordinator>,
}

impl Drop for PriorityGuard {
    fn drop(&mut self) {
        self.coord.drop_priority();
    }
}
