//! Deferred work and the recovery policy
//!
//! One thread per link takes items posted from interrupt and caller
//! context: log flushes, firmware-requested dumps and recoveries. It holds
//! only a weak reference, so it never keeps a dropped link alive.

use std::sync::atomic::Ordering;
use std::sync::Weak;
use std::thread::{self, JoinHandle};

use crossbeam::channel::Receiver;

use crate::dump::DumpReason;
use crate::link::ChubLink;
use crate::state::LinkState;
use crate::stats::Stat;
use crate::{ChubError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkItem {
    FlushLog,
    Dump(DumpReason),
    Recover(DumpReason),
    Stop,
}

pub(crate) fn spawn(link: Weak<ChubLink>, inbox: Receiver<WorkItem>) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("chub-worker".into())
        .spawn(move || run(link, inbox))?;
    Ok(handle)
}

fn run(link: Weak<ChubLink>, inbox: Receiver<WorkItem>) {
    while let Ok(item) = inbox.recv() {
        if item == WorkItem::Stop {
            break;
        }
        let Some(link) = link.upgrade() else { break };
        link.perform(item);
    }
    log::debug!("chub: worker exiting");
}

impl ChubLink {
    fn perform(&self, item: WorkItem) {
        match item {
            WorkItem::FlushLog => self.flush_firmware_log(),
            WorkItem::Dump(reason) => {
                if let Err(e) = self.dump(reason) {
                    log::warn!("chub: {} dump failed: {}", reason, e);
                }
            }
            WorkItem::Recover(reason) => self.recover(reason),
            WorkItem::Stop => {}
        }
    }

    /// Dump, then shut down and fully reset
    ///
    /// A failed attempt is queued again until `max_failed_recoveries`
    /// consecutive failures, at which point the restart hook fires.
    /// Requests raised while an attempt is pending are folded into it.
    fn recover(&self, reason: DumpReason) {
        if self.attempt_recovery(reason) {
            self.recovery_pending.store(false, Ordering::Release);
        }
    }

    /// Returns false when the attempt was queued again
    fn attempt_recovery(&self, reason: DumpReason) -> bool {
        let state = self.state();
        if matches!(state, LinkState::NoPower | LinkState::PowerOn) {
            log::warn!("chub: {} recovery skipped in state {}", reason, state);
            return true;
        }

        self.stats.bump(Stat::Recoveries);
        log::warn!("chub: recovering from {} in state {}", reason, state);
        if let Err(e) = self.dump(reason) {
            log::warn!("chub: pre-recovery dump failed: {}", e);
        }

        match self.cycle() {
            Ok(()) => {
                self.failed_recoveries.store(0, Ordering::Release);
                log::info!("chub: recovered from {}", reason);
                true
            }
            Err(e) => {
                let failed = self.failed_recoveries.fetch_add(1, Ordering::AcqRel) + 1;
                log::error!("chub: recovery attempt {} failed: {}", failed, e);
                if failed >= self.config.recovery.max_failed_recoveries {
                    self.failed_recoveries.store(0, Ordering::Release);
                    self.restart
                        .restart(&format!("chub recovery failed {} times: {}", failed, e));
                    true
                } else {
                    self.post(WorkItem::Recover(reason));
                    false
                }
            }
        }
    }

    fn cycle(&self) -> Result<()> {
        match self.state() {
            LinkState::Run | LinkState::NoResponse => self.shutdown()?,
            LinkState::Shutdown => {}
            state => return Err(ChubError::InvalidState { op: "recover", state }),
        }
        self.reset(false)
    }
}
