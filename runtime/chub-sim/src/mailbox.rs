//! Mailbox block model
//!
//! Implements the register semantics both drivers rely on: generate sets
//! pending bits, clear drops them, the mask register filters what reaches the
//! interrupt line, and masked status is `pending & !mask`. Each group drives
//! one doorbell channel that stands in for its interrupt line.

use std::sync::atomic::{AtomicU32, Ordering};

use chub_ipc::event::MAILBOX_IRQ_COUNT;
use chub_ipc::mailbox::{regs, ALL_IRQS, SHARED_REG_COUNT};
use chub_ipc::{IoMem, Side};
use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};

const IRQS: usize = MAILBOX_IRQ_COUNT as usize;

#[derive(Default)]
struct Group {
    pending: AtomicU32,
    mask: AtomicU32,
    raised: [AtomicU32; IRQS],
}

/// Simulated mailbox register block
pub struct SimMailbox {
    // Index 0 delivers to the AP, index 1 to the CHUB
    groups: [Group; 2],
    issr: [AtomicU32; SHARED_REG_COUNT],
    mcuctrl: AtomicU32,
    doorbells: [Sender<()>; 2],
}

/// Interrupt lines of the two processors
pub struct IrqLines {
    pub to_ap: Receiver<()>,
    pub to_chub: Receiver<()>,
}

const fn group_index(to: Side) -> usize {
    match to {
        Side::Ap => 0,
        Side::Chub => 1,
    }
}

impl SimMailbox {
    pub fn new() -> (Self, IrqLines) {
        // Capacity one: a line is either raised or not, repeats coalesce
        let (ap_tx, ap_rx) = bounded(1);
        let (chub_tx, chub_rx) = bounded(1);
        let mbox = Self {
            groups: Default::default(),
            issr: Default::default(),
            mcuctrl: AtomicU32::new(0),
            doorbells: [ap_tx, chub_tx],
        };
        let lines = IrqLines {
            to_ap: ap_rx,
            to_chub: chub_rx,
        };
        (mbox, lines)
    }

    /// Times interrupt `irq` was generated towards `to`
    pub fn raised(&self, to: Side, irq: u32) -> u32 {
        self.groups[group_index(to)].raised[irq as usize].load(Ordering::Acquire)
    }

    /// Pending bits waiting for `to`, ignoring the mask
    pub fn pending(&self, to: Side) -> u32 {
        self.groups[group_index(to)].pending.load(Ordering::Acquire)
    }

    /// Return every register to its power-on value
    pub fn reset(&self) {
        for group in &self.groups {
            group.pending.store(0, Ordering::Release);
            group.mask.store(0, Ordering::Release);
        }
        for reg in &self.issr {
            reg.store(0, Ordering::Release);
        }
        self.mcuctrl.store(0, Ordering::Release);
    }

    fn ring(&self, index: usize) {
        match self.doorbells[index].try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => {
                log::trace!("mailbox line {} has no receiver", index);
            }
        }
    }

    fn generate(&self, index: usize, bits: u32) {
        let group = &self.groups[index];
        let bits = bits & ALL_IRQS;
        for irq in 0..IRQS {
            if bits & (1 << irq) != 0 {
                group.raised[irq].fetch_add(1, Ordering::AcqRel);
            }
        }
        group.pending.fetch_or(bits, Ordering::AcqRel);
        if bits & !group.mask.load(Ordering::Acquire) != 0 {
            self.ring(index);
        }
    }

    fn set_mask(&self, index: usize, mask: u32) {
        let group = &self.groups[index];
        group.mask.store(mask & ALL_IRQS, Ordering::Release);
        if group.pending.load(Ordering::Acquire) & !mask != 0 {
            self.ring(index);
        }
    }

    fn masked(&self, index: usize) -> u32 {
        let group = &self.groups[index];
        group.pending.load(Ordering::Acquire) & !group.mask.load(Ordering::Acquire)
    }
}

impl IoMem for SimMailbox {
    fn size(&self) -> usize {
        regs::MAILBOX_REGS_SIZE
    }

    fn read32(&self, offset: usize) -> u32 {
        match offset {
            regs::MCUCTRL => self.mcuctrl.load(Ordering::Acquire),
            regs::INTMR0 => self.groups[0].mask.load(Ordering::Acquire),
            regs::INTSR0 => self.groups[0].pending.load(Ordering::Acquire),
            regs::INTMSR0 => self.masked(0),
            regs::INTMR1 => self.groups[1].mask.load(Ordering::Acquire),
            regs::INTSR1 => self.groups[1].pending.load(Ordering::Acquire),
            regs::INTMSR1 => self.masked(1),
            o if (regs::ISSR_BASE..regs::ISSR_BASE + SHARED_REG_COUNT * 4).contains(&o) => {
                self.issr[(o - regs::ISSR_BASE) / 4].load(Ordering::Acquire)
            }
            // Generate and clear registers read as zero
            _ => 0,
        }
    }

    fn write32(&self, offset: usize, value: u32) {
        match offset {
            regs::MCUCTRL => self.mcuctrl.store(value, Ordering::Release),
            regs::INTGR0 => self.generate(0, value),
            regs::INTCR0 => {
                self.groups[0].pending.fetch_and(!value, Ordering::AcqRel);
            }
            regs::INTMR0 => self.set_mask(0, value),
            regs::INTGR1 => self.generate(1, value),
            regs::INTCR1 => {
                self.groups[1].pending.fetch_and(!value, Ordering::AcqRel);
            }
            regs::INTMR1 => self.set_mask(1, value),
            o if (regs::ISSR_BASE..regs::ISSR_BASE + SHARED_REG_COUNT * 4).contains(&o) => {
                self.issr[(o - regs::ISSR_BASE) / 4].store(value, Ordering::Release)
            }
            o => log::warn!("write to read-only mailbox register {:#x}", o),
        }
    }
}
