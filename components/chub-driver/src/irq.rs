//! Mailbox interrupt handler
//!
//! Runs in the board's interrupt context: acknowledges what is pending,
//! wakes the matching waiters and drains the CHUB->AP queue. Anything slow
//! goes to the worker.

use chub_ipc::event::EVT_IRQ_MASK;
use chub_ipc::evtq::Event;
use chub_ipc::{DirectIrq, Direction, EventId};

use crate::dump::DumpReason;
use crate::link::ChubLink;
use crate::stats::Stat;
use crate::sync::lock;
use crate::worker::WorkItem;

impl ChubLink {
    pub(crate) fn handle_irq(&self) {
        let pending = self.mailbox.read_masked_status();
        if pending == 0 {
            return;
        }
        self.mailbox.clear_pending_mask(pending);

        if pending & DirectIrq::Alive.bit() != 0 {
            self.alive.notify();
        }
        if pending & DirectIrq::Wakeup.bit() != 0 {
            self.wake.notify();
        }
        if pending & DirectIrq::Shutdown.bit() != 0 {
            self.shutdown_ack.notify();
        }
        if pending & EVT_IRQ_MASK != 0 {
            self.drain_events(pending & EVT_IRQ_MASK);
        }
    }

    /// Consume queued events in order
    ///
    /// Event interrupt bits are reused round-robin, so a bit acknowledged in
    /// `pending` may also have covered a later record tagged with it. The
    /// walk therefore only stops at a record whose interrupt is raised but
    /// not yet taken; that one is picked up when the handler runs for it.
    fn drain_events(&self, pending: u32) {
        let Some(map) = self.map() else {
            log::debug!("chub: event interrupt {:#x} with no map", pending);
            return;
        };
        let _consumer = lock(&self.evtq_lock);
        let queue = map.evtq(&*self.sram, Direction::ChubToAp);
        loop {
            let next = queue.peek().and_then(|head| match head {
                Some(event) if self.owed_later(event.irq_bit(), pending) => Ok(None),
                Some(_) => queue.dequeue(),
                None => Ok(None),
            });
            match next {
                Ok(Some(event)) => self.dispatch(event),
                Ok(None) => break,
                Err(e) => {
                    self.stats.bump(Stat::ProtocolErrors);
                    log::error!("chub: c2a event queue: {}", e);
                    self.request_recovery(DumpReason::ProtocolError);
                    break;
                }
            }
        }
    }

    /// `bit` was raised after `pending` was sampled and is still waiting
    fn owed_later(&self, bit: u32, pending: u32) -> bool {
        bit & pending == 0 && self.mailbox.read_status() & bit != 0
    }

    fn dispatch(&self, event: Event) {
        match event.id() {
            Some(id) if id.data_slot().is_some() => self.rx.notify(),
            Some(EventId::LogReady) => self.post(WorkItem::FlushLog),
            Some(EventId::DumpRequest) => self.post(WorkItem::Dump(DumpReason::FirmwareRequest)),
            Some(EventId::Fault) => {
                self.stats.bump(Stat::Faults);
                log::error!("chub: firmware reported a fault");
                self.request_recovery(DumpReason::Fault);
            }
            _ => {
                self.stats.bump(Stat::ProtocolErrors);
                log::warn!("chub: unexpected event {:#x} on irq {}", event.raw, event.irq);
            }
        }
    }
}
