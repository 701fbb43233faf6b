//! Mailbox Register Driver
//!
//! The mailbox block has two interrupt register groups. Group 0 carries
//! interrupts delivered to the AP, group 1 interrupts delivered to the CHUB.
//! Each group has generate (INTGR), clear (INTCR), mask (INTMR), raw status
//! (INTSR) and masked status (INTMSR) registers, one bit per interrupt.
//! Four shared scratch registers (ISSR) pass small out-of-band values.
//!
//! Which group is "mine" depends on the side owning the accessor: I clear,
//! mask and read status in my group, and generate into my peer's group.

use alloc::sync::Arc;

use crate::event::MAILBOX_IRQ_COUNT;
use crate::io::IoMem;
use crate::Side;

/// Register offsets within the mailbox block
pub mod regs {
    /// Mailbox control
    pub const MCUCTRL: usize = 0x00;
    /// Group 0 (delivered to AP)
    pub const INTGR0: usize = 0x08;
    pub const INTCR0: usize = 0x0c;
    pub const INTMR0: usize = 0x10;
    pub const INTSR0: usize = 0x14;
    pub const INTMSR0: usize = 0x18;
    /// Group 1 (delivered to CHUB)
    pub const INTGR1: usize = 0x1c;
    pub const INTCR1: usize = 0x20;
    pub const INTMR1: usize = 0x24;
    pub const INTSR1: usize = 0x28;
    pub const INTMSR1: usize = 0x2c;
    /// Shared scratch registers
    pub const ISSR_BASE: usize = 0x80;
    /// Size of the register block
    pub const MAILBOX_REGS_SIZE: usize = 0x90;
}

/// Number of shared scratch registers
pub const SHARED_REG_COUNT: usize = 4;

/// Mask covering every interrupt bit of one group
pub const ALL_IRQS: u32 = (1 << MAILBOX_IRQ_COUNT) - 1;

/// Roles of the shared scratch registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum SharedReg {
    /// Boot mode flag the AP sets before releasing reset
    BootMode = 0,
    /// Diagnostic id for `EventId::DebugAction`
    DebugAction = 1,
    /// Low half of a 64-bit debug value
    DebugValLow = 2,
    /// High half of a 64-bit debug value
    DebugValHigh = 3,
}

/// One interrupt register group
#[derive(Debug, Clone, Copy)]
struct Group {
    gr: usize,
    cr: usize,
    mr: usize,
    sr: usize,
    msr: usize,
}

const GROUP_TO_AP: Group = Group {
    gr: regs::INTGR0,
    cr: regs::INTCR0,
    mr: regs::INTMR0,
    sr: regs::INTSR0,
    msr: regs::INTMSR0,
};

const GROUP_TO_CHUB: Group = Group {
    gr: regs::INTGR1,
    cr: regs::INTCR1,
    mr: regs::INTMR1,
    sr: regs::INTSR1,
    msr: regs::INTMSR1,
};

const fn group_for(side: Side) -> Group {
    match side {
        Side::Ap => GROUP_TO_AP,
        Side::Chub => GROUP_TO_CHUB,
    }
}

/// Direction-aware mailbox accessor
///
/// Each method is a single register access except `mask`/`unmask`, which
/// read-modify-write the mask register. Callers on several CPUs that mask
/// concurrently must serialize externally.
pub struct Mailbox {
    regs: Arc<dyn IoMem>,
    mine: Group,
    theirs: Group,
}

impl Mailbox {
    /// Create an accessor for `owner`
    pub fn new(regs: Arc<dyn IoMem>, owner: Side) -> Self {
        Self {
            regs,
            mine: group_for(owner),
            theirs: group_for(owner.peer()),
        }
    }

    /// Re-establish which side this accessor speaks for
    pub fn set_owner(&mut self, owner: Side) {
        self.mine = group_for(owner);
        self.theirs = group_for(owner.peer());
    }

    /// Raise interrupt `irq` on the peer
    pub fn generate_interrupt(&self, irq: u32) {
        debug_assert!(irq < MAILBOX_IRQ_COUNT);
        self.regs.write32(self.theirs.gr, 1 << irq);
    }

    /// Acknowledge interrupt `irq` in my group
    pub fn clear_pending(&self, irq: u32) {
        debug_assert!(irq < MAILBOX_IRQ_COUNT);
        self.regs.write32(self.mine.cr, 1 << irq);
    }

    /// Acknowledge every bit set in `bits`
    pub fn clear_pending_mask(&self, bits: u32) {
        self.regs.write32(self.mine.cr, bits & ALL_IRQS);
    }

    /// Stop interrupt `irq` from reaching me
    pub fn mask(&self, irq: u32) {
        debug_assert!(irq < MAILBOX_IRQ_COUNT);
        let cur = self.regs.read32(self.mine.mr);
        self.regs.write32(self.mine.mr, cur | (1 << irq));
    }

    /// Let interrupt `irq` reach me again
    pub fn unmask(&self, irq: u32) {
        debug_assert!(irq < MAILBOX_IRQ_COUNT);
        let cur = self.regs.read32(self.mine.mr);
        self.regs.write32(self.mine.mr, cur & !(1 << irq));
    }

    /// Mask every interrupt in my group
    pub fn mask_all(&self) {
        self.regs.write32(self.mine.mr, ALL_IRQS);
    }

    /// Unmask every interrupt in my group
    pub fn unmask_all(&self) {
        self.regs.write32(self.mine.mr, 0);
    }

    /// Raw pending bits in my group
    pub fn read_status(&self) -> u32 {
        self.regs.read32(self.mine.sr)
    }

    /// Pending and unmasked bits in my group
    pub fn read_masked_status(&self) -> u32 {
        self.regs.read32(self.mine.msr)
    }

    /// Current mask register of my group
    pub fn read_mask(&self) -> u32 {
        self.regs.read32(self.mine.mr)
    }

    /// Raw pending bits the peer has not yet acknowledged
    pub fn read_peer_status(&self) -> u32 {
        self.regs.read32(self.theirs.sr)
    }

    pub fn write_shared_register(&self, reg: SharedReg, value: u32) {
        self.regs.write32(regs::ISSR_BASE + reg as usize * 4, value);
    }

    pub fn read_shared_register(&self, reg: SharedReg) -> u32 {
        self.regs.read32(regs::ISSR_BASE + reg as usize * 4)
    }

    /// Write a 64-bit debug value across the two debug scratch registers
    pub fn write_debug_value(&self, value: u64) {
        self.write_shared_register(SharedReg::DebugValLow, value as u32);
        self.write_shared_register(SharedReg::DebugValHigh, (value >> 32) as u32);
    }

    pub fn read_debug_value(&self) -> u64 {
        let lo = self.read_shared_register(SharedReg::DebugValLow) as u64;
        let hi = self.read_shared_register(SharedReg::DebugValHigh) as u64;
        (hi << 32) | lo
    }
}
