//! Event Queue (EVTQ)
//!
//! Bounded FIFO of event records in shared SRAM, one per direction. The
//! producer writes records and the `eq` cursor; the consumer reads records
//! and writes the `dq` cursor. `eq == dq` is ambiguous on its own, so the
//! `full` flag disambiguates: set by the producer when a push closes the gap,
//! cleared by the consumer on every dequeue.
//!
//! Each record is tagged with a mailbox interrupt number taken round-robin
//! from the event IRQ space, so the consumer can match pending interrupt bits
//! to queued records.
//!
//! # Control area
//! | Offset | Word | Written by |
//! |---|---|---|
//! | 0x00 | eq cursor | producer |
//! | 0x04 | dq cursor | consumer |
//! | 0x08 | full flag | both |
//! | 0x0c | empty flag | both |
//! | 0x10 | next event IRQ | producer |
//! | 0x20 | records | |

use crate::event::{EventId, EVT_IRQ_COUNT};
use crate::io::IoMem;
use crate::mailbox::Mailbox;
use crate::ring::RingIndex;
use crate::{IpcError, Result};

/// Queue capacity in events
pub const EVT_QUEUE_LEN: usize = 15;

const EQ: usize = 0x00;
const DQ: usize = 0x04;
const FULL: usize = 0x08;
const EMPTY: usize = 0x0c;
const IRQ: usize = 0x10;
const RECORDS: usize = 0x20;

const RECORD_SIZE: usize = 12;
const REC_EVT: usize = 0;
const REC_IRQ: usize = 4;
const REC_STATUS: usize = 8;

/// Bytes one queue occupies in SRAM
pub const EVTQ_SIZE: usize = RECORDS + EVT_QUEUE_LEN * RECORD_SIZE;

/// Record was pushed and not yet consumed
pub const EVT_STATUS_QUEUED: u32 = 1;
/// Record was consumed
pub const EVT_STATUS_DEQUEUED: u32 = 2;

type Cursor = RingIndex<EVT_QUEUE_LEN>;
type IrqCursor = RingIndex<EVT_IRQ_COUNT>;

/// One queued event as read back from SRAM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// Raw event identifier
    pub raw: u32,
    /// Mailbox interrupt assigned when it was pushed
    pub irq: u32,
}

impl Event {
    /// Decoded event, `None` for ids this side does not know
    pub fn id(&self) -> Option<EventId> {
        EventId::from_raw(self.raw)
    }

    /// Interrupt mask bit for this event
    pub fn irq_bit(&self) -> u32 {
        1 << self.irq
    }
}

/// Accessor for one event queue
pub struct EventQueue<'a> {
    mem: &'a dyn IoMem,
    base: usize,
}

impl<'a> EventQueue<'a> {
    pub fn new(mem: &'a dyn IoMem, base: usize) -> Self {
        Self { mem, base }
    }

    /// Empty the queue and restart IRQ allocation at zero
    ///
    /// Only valid while neither side is using the queue.
    pub fn reset(&self) {
        self.mem.zero(self.base, EVTQ_SIZE);
        self.mem.write32(self.base + EMPTY, 1);
    }

    fn cursors(&self) -> Result<(Cursor, Cursor)> {
        let eq = self.mem.read32(self.base + EQ);
        let dq = self.mem.read32(self.base + DQ);
        match (Cursor::from_raw(eq), Cursor::from_raw(dq)) {
            (Some(eq), Some(dq)) => Ok((eq, dq)),
            _ => Err(IpcError::CorruptQueue { eq, dq }),
        }
    }

    fn record(&self, at: Cursor) -> usize {
        self.base + RECORDS + at.get() * RECORD_SIZE
    }

    pub fn is_full(&self) -> bool {
        self.mem.read32(self.base + FULL) != 0
    }

    pub fn is_empty(&self) -> bool {
        match self.cursors() {
            Ok((eq, dq)) => eq == dq && !self.is_full(),
            Err(_) => false,
        }
    }

    /// Number of queued events
    pub fn len(&self) -> Result<usize> {
        let (eq, dq) = self.cursors()?;
        if eq == dq && self.is_full() {
            Ok(EVT_QUEUE_LEN)
        } else {
            Ok(dq.distance_to(eq))
        }
    }

    /// Append `id` without signalling the peer
    ///
    /// # Errors
    /// `QueueFull` when all `EVT_QUEUE_LEN` records are in use; the queue is
    /// left untouched.
    pub fn push(&self, id: EventId) -> Result<Event> {
        if self.is_full() {
            return Err(IpcError::QueueFull {
                capacity: EVT_QUEUE_LEN,
            });
        }
        let (eq, dq) = self.cursors()?;

        let irq_raw = self.mem.read32(self.base + IRQ);
        let irq = IrqCursor::from_raw(irq_raw).unwrap_or(IrqCursor::ZERO);

        let rec = self.record(eq);
        self.mem.write32(rec + REC_EVT, id.raw());
        self.mem.write32(rec + REC_IRQ, irq.raw());
        self.mem.write32(rec + REC_STATUS, EVT_STATUS_QUEUED);
        self.mem.write32(self.base + IRQ, irq.next().raw());

        // Cursor before flag: a consumer sampling in between sees an empty
        // queue and picks the record up on the interrupt that follows.
        let next = eq.next();
        self.mem.write32(self.base + EQ, next.raw());
        self.mem.write32(self.base + EMPTY, 0);
        if next == dq {
            self.mem.write32(self.base + FULL, 1);
        }

        Ok(Event {
            raw: id.raw(),
            irq: irq.raw(),
        })
    }

    /// Append `id` and raise its interrupt on the peer
    pub fn enqueue(&self, id: EventId, mailbox: &Mailbox) -> Result<Event> {
        let event = self.push(id)?;
        mailbox.generate_interrupt(event.irq);
        Ok(event)
    }

    /// `enqueue`, retrying a full queue up to `retries` more times
    ///
    /// `backoff` runs between attempts; the firmware side passes a short
    /// delay so the AP can drain.
    pub fn enqueue_retrying(
        &self,
        id: EventId,
        mailbox: &Mailbox,
        retries: u32,
        mut backoff: impl FnMut(),
    ) -> Result<Event> {
        let mut attempt = 0;
        loop {
            match self.enqueue(id, mailbox) {
                Err(IpcError::QueueFull { .. }) if attempt < retries => {
                    attempt += 1;
                    backoff();
                }
                other => return other,
            }
        }
    }

    /// Oldest queued event without consuming it
    pub fn peek(&self) -> Result<Option<Event>> {
        let (eq, dq) = self.cursors()?;
        if eq == dq && !self.is_full() {
            return Ok(None);
        }
        let rec = self.record(dq);
        Ok(Some(Event {
            raw: self.mem.read32(rec + REC_EVT),
            irq: self.mem.read32(rec + REC_IRQ),
        }))
    }

    /// Remove and return the oldest event
    pub fn dequeue(&self) -> Result<Option<Event>> {
        let Some(event) = self.peek()? else {
            return Ok(None);
        };
        let (eq, dq) = self.cursors()?;

        self.mem.write32(self.record(dq) + REC_STATUS, EVT_STATUS_DEQUEUED);
        let next = dq.next();
        self.mem.write32(self.base + DQ, next.raw());
        self.mem.write32(self.base + FULL, 0);
        if next == eq {
            self.mem.write32(self.base + EMPTY, 1);
        }
        Ok(Some(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::SharedMem;
    use crate::mailbox::regs::{INTGR1, MAILBOX_REGS_SIZE};
    use crate::Side;
    use alloc::sync::Arc;

    fn queue_mem() -> SharedMem {
        let mem = SharedMem::new(EVTQ_SIZE);
        EventQueue::new(&mem, 0).reset();
        mem
    }

    #[test]
    fn test_fifo_order_and_len() {
        let mem = queue_mem();
        let q = EventQueue::new(&mem, 0);

        q.push(EventId::LogReady).unwrap();
        q.push(EventId::Data2).unwrap();
        assert_eq!(q.len().unwrap(), 2);

        assert_eq!(q.dequeue().unwrap().unwrap().id(), Some(EventId::LogReady));
        assert_eq!(q.dequeue().unwrap().unwrap().id(), Some(EventId::Data2));
        assert!(q.dequeue().unwrap().is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn test_full_queue_rejects_without_change() {
        let mem = queue_mem();
        let q = EventQueue::new(&mem, 0);

        for _ in 0..EVT_QUEUE_LEN {
            q.push(EventId::Data0).unwrap();
        }
        assert!(q.is_full());
        assert_eq!(q.len().unwrap(), EVT_QUEUE_LEN);

        let before = mem.to_vec(0, EVTQ_SIZE);
        assert_eq!(
            q.push(EventId::Data1),
            Err(IpcError::QueueFull {
                capacity: EVT_QUEUE_LEN
            })
        );
        assert_eq!(mem.to_vec(0, EVTQ_SIZE), before);

        // One dequeue makes room for exactly one more
        q.dequeue().unwrap();
        assert!(!q.is_full());
        q.push(EventId::Data1).unwrap();
        assert!(q.push(EventId::Data1).is_err());
    }

    #[test]
    fn test_irq_round_robin() {
        let mem = queue_mem();
        let q = EventQueue::new(&mem, 0);

        let mut irqs = std::vec::Vec::new();
        for _ in 0..EVT_IRQ_COUNT + 2 {
            let evt = q.push(EventId::LogReady).unwrap();
            irqs.push(evt.irq);
            q.dequeue().unwrap();
        }
        assert_eq!(irqs[0], 0);
        assert_eq!(irqs[EVT_IRQ_COUNT - 1], EVT_IRQ_COUNT as u32 - 1);
        assert_eq!(irqs[EVT_IRQ_COUNT], 0);
        assert!(irqs.iter().all(|&irq| (irq as usize) < EVT_IRQ_COUNT));
    }

    #[test]
    fn test_enqueue_raises_interrupt() {
        let mem = queue_mem();
        let block: Arc<dyn IoMem> = Arc::new(SharedMem::new(MAILBOX_REGS_SIZE));
        let ap = Mailbox::new(block.clone(), Side::Ap);
        let q = EventQueue::new(&mem, 0);

        q.push(EventId::Data0).unwrap();
        let evt = q.enqueue(EventId::Data1, &ap).unwrap();
        assert_eq!(evt.irq, 1);
        assert_eq!(block.read32(INTGR1), evt.irq_bit());
    }

    #[test]
    fn test_enqueue_retrying_gives_up() {
        let mem = queue_mem();
        let block: Arc<dyn IoMem> = Arc::new(SharedMem::new(MAILBOX_REGS_SIZE));
        let chub = Mailbox::new(block, Side::Chub);
        let q = EventQueue::new(&mem, 0);
        for _ in 0..EVT_QUEUE_LEN {
            q.push(EventId::LogReady).unwrap();
        }

        let mut waits = 0;
        let res = q.enqueue_retrying(EventId::Fault, &chub, 4, || waits += 1);
        assert!(matches!(res, Err(IpcError::QueueFull { .. })));
        assert_eq!(waits, 4);
    }

    #[test]
    fn test_enqueue_retrying_succeeds_after_drain() {
        let mem = queue_mem();
        let block: Arc<dyn IoMem> = Arc::new(SharedMem::new(MAILBOX_REGS_SIZE));
        let chub = Mailbox::new(block, Side::Chub);
        let q = EventQueue::new(&mem, 0);
        for _ in 0..EVT_QUEUE_LEN {
            q.push(EventId::LogReady).unwrap();
        }

        let drain = EventQueue::new(&mem, 0);
        let res = q.enqueue_retrying(EventId::Fault, &chub, 4, || {
            drain.dequeue().unwrap();
        });
        assert!(res.is_ok());
    }

    #[test]
    fn test_corrupt_cursor_detected() {
        let mem = queue_mem();
        mem.write32(DQ, 99);
        let q = EventQueue::new(&mem, 0);
        assert_eq!(
            q.dequeue(),
            Err(IpcError::CorruptQueue { eq: 0, dq: 99 })
        );
        assert!(!q.is_empty());
    }
}
