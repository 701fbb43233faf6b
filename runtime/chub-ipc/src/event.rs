//! Event identifiers and mailbox interrupt numbering
//!
//! The mailbox exposes 16 interrupt bits per direction. The low bits are
//! handed out round-robin to queued events; the top three are reserved for
//! direct signals that must get through even when the queue is full or the
//! peer is not draining it.

use crate::channel::SLOT_COUNT;

/// Interrupt bits per direction
pub const MAILBOX_IRQ_COUNT: u32 = 16;

/// Interrupt bits shared by queued events (`0..EVT_IRQ_COUNT`)
pub const EVT_IRQ_COUNT: usize = 13;

/// Mask covering every queued-event interrupt bit
pub const EVT_IRQ_MASK: u32 = (1 << EVT_IRQ_COUNT) - 1;

/// Interrupts that bypass the event queue
///
/// The same bit carries a request in one direction and its answer in the
/// other: AP raises `Alive` to ping, CHUB raises `Alive` to acknowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DirectIrq {
    /// A2C: wake request nudge. C2A: CHUB reports it is awake.
    Wakeup = 13,
    /// A2C: are-you-alive ping. C2A: alive acknowledgment.
    Alive = 14,
    /// A2C: shut down. C2A: shutdown acknowledged, CPU about to halt.
    Shutdown = 15,
}

impl DirectIrq {
    pub const ALL: [DirectIrq; 3] = [DirectIrq::Wakeup, DirectIrq::Alive, DirectIrq::Shutdown];

    /// Interrupt bit number
    pub const fn irq(self) -> u32 {
        self as u32
    }

    /// Interrupt bit mask
    pub const fn bit(self) -> u32 {
        1 << (self as u32)
    }

    /// Decode an interrupt number
    pub fn from_irq(irq: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.irq() == irq)
    }
}

/// Logical events carried through the event queues
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum EventId {
    /// Data channel slot 0 holds a payload for the receiver
    Data0 = 0x00,
    /// Data channel slot 1 holds a payload for the receiver
    Data1 = 0x01,
    /// Data channel slot 2 holds a payload for the receiver
    Data2 = 0x02,
    /// A2C: flush the firmware log ring now
    LogRequest = 0x10,
    /// A2C: run the diagnostic whose id sits in `SharedReg::DebugAction`
    DebugAction = 0x11,
    /// C2A: the firmware log ring has unread text
    LogReady = 0x20,
    /// C2A: firmware asks the AP to capture a dump
    DumpRequest = 0x21,
    /// C2A: firmware hit an assertion or fault
    Fault = 0x22,
}

impl EventId {
    /// "Data ready" event for a channel slot
    pub const fn data(slot: usize) -> Option<Self> {
        match slot {
            0 => Some(EventId::Data0),
            1 => Some(EventId::Data1),
            2 => Some(EventId::Data2),
            _ => None,
        }
    }

    /// Slot number if this is a data-ready event
    pub const fn data_slot(self) -> Option<usize> {
        match self {
            EventId::Data0 => Some(0),
            EventId::Data1 => Some(1),
            EventId::Data2 => Some(2),
            _ => None,
        }
    }

    /// Raw value stored in the queue
    pub const fn raw(self) -> u32 {
        self as u32
    }

    /// Decode a raw queue value
    pub const fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0x00 => EventId::Data0,
            0x01 => EventId::Data1,
            0x02 => EventId::Data2,
            0x10 => EventId::LogRequest,
            0x11 => EventId::DebugAction,
            0x20 => EventId::LogReady,
            0x21 => EventId::DumpRequest,
            0x22 => EventId::Fault,
            _ => return None,
        })
    }
}

static_assertions::const_assert!(SLOT_COUNT <= 3);
static_assertions::const_assert!((EVT_IRQ_COUNT as u32) <= DirectIrq::Wakeup as u32);
static_assertions::const_assert!((DirectIrq::Shutdown as u32) < MAILBOX_IRQ_COUNT);
