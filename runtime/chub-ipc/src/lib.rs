//! ContextHub IPC - Shared wire format between the AP and the sensor hub
//!
//! # Purpose
//! Defines everything both processors must agree on to talk over the
//! hardware mailbox: the boot-args structure the firmware places in SRAM,
//! the layout of the IPC control area, the event queues, the data channel
//! slots and their ownership protocol, and the mailbox register accessors.
//!
//! # Integration Points
//! - Depends on: nothing but `core`/`alloc`
//! - Provides to: `chub-driver` (AP side), `chub-sim` (firmware side)
//! - Hardware: mailbox MMIO block, CHUB SRAM
//!
//! # Architecture
//! Nothing in this crate knows which processor it runs on until it is told.
//! Operations that only one side may perform take a [`Side`] argument and
//! reject callers whose turn it is not. Every shared word is accessed through
//! [`IoMem`], one aligned 32-bit load or store at a time, which is the only
//! atomicity the hardware gives us between two independently clocked CPUs.
//!
//! # Testing Strategy
//! - Unit tests: ring wraparound, queue full/empty tracking, slot ownership
//!   cycle, boot-args validation, mailbox register addressing
//! - Benchmarks: `benches/evtq.rs`

#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

extern crate alloc;

pub mod channel;
pub mod event;
pub mod evtq;
pub mod gpr;
pub mod io;
pub mod logbuf;
pub mod mailbox;
pub mod map;
pub mod ring;
pub mod utc;

pub use channel::{DataChannel, Direction, Packet, SlotState, SlotStatus, PACKET_SIZE_MAX, SLOT_COUNT};
pub use event::{DirectIrq, EventId};
pub use evtq::{Event, EventQueue, EVT_QUEUE_LEN};
pub use io::{IoMem, MmioRegion, SharedMem};
pub use logbuf::LogRing;
pub use mailbox::{Mailbox, SharedReg};
pub use map::{BootArgs, BootMode, IpcLayout, Map, PeerFlags, Region};
pub use ring::RingIndex;

use thiserror::Error;

/// Protocol version this crate speaks. Firmware advertising anything else is rejected.
pub const IPC_VERSION: u32 = 2;

/// The two processors sharing the mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Application processor (runs the driver)
    Ap,
    /// Context hub co-processor (runs the firmware)
    Chub,
}

impl Side {
    /// The other processor
    pub const fn peer(self) -> Side {
        match self {
            Side::Ap => Side::Chub,
            Side::Chub => Side::Ap,
        }
    }

    /// Owner tag as stored in slot status words
    pub(crate) const fn owner_bits(self) -> u32 {
        match self {
            Side::Ap => 0x1,
            Side::Chub => 0x2,
        }
    }
}

/// Why firmware was judged incompatible
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Incompatibility {
    #[error("boot-args magic not found")]
    BadMagic,

    #[error("IPC version {found:#x}, driver speaks {expected:#x}")]
    Version { expected: u32, found: u32 },
}

/// IPC error types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IpcError {
    #[error("incompatible firmware: {0}")]
    IncompatibleFirmware(Incompatibility),

    #[error("boot-args region {region} is out of bounds or inverted")]
    BadLayout { region: &'static str },

    #[error("event queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("no free data channel slot")]
    NoFreeSlot,

    #[error("payload of {len} bytes exceeds the {max} byte packet limit")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("slot {slot} has unexpected status {raw:#x}")]
    ProtocolViolation { slot: usize, raw: u32 },

    #[error("event queue cursors are corrupt (eq={eq}, dq={dq})")]
    CorruptQueue { eq: u32, dq: u32 },

    #[error("{side:?} may not perform this operation on this direction")]
    WrongSide { side: Side },
}

pub type Result<T> = core::result::Result<T, IpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_peer() {
        assert_eq!(Side::Ap.peer(), Side::Chub);
        assert_eq!(Side::Chub.peer(), Side::Ap);
        assert_ne!(Side::Ap.owner_bits(), Side::Chub.owner_bits());
    }

    #[test]
    fn test_error_display() {
        let err = IpcError::IncompatibleFirmware(Incompatibility::Version {
            expected: IPC_VERSION,
            found: 7,
        });
        let text = format!("{}", err);
        assert!(text.contains("0x7"));
    }
}
