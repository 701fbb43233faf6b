//! Shared Memory Map Resolver
//!
//! The bootloader image carries a boot-args structure at a fixed offset into
//! SRAM. It names where every other region lives. Nothing past the magic and
//! version check is trusted until both match, so a stale or foreign image can
//! never steer the driver to garbage offsets.
//!
//! # Boot-args layout (little endian)
//! | Offset | Field |
//! |---|---|
//! | 0x00 | magic (16 bytes) |
//! | 0x10 | IPC version |
//! | 0x14 | bootloader start/end |
//! | 0x1c | OS image start/end |
//! | 0x24 | IPC control start/end |
//! | 0x2c | RAM start/end |
//! | 0x34 | shared scratch start/end |
//! | 0x3c | dump start/end |
//! | 0x44 | CHUB clock rate (AP writes) |
//! | 0x48 | boot mode (AP writes) |

use bitflags::bitflags;

use crate::channel::{DataChannel, Direction, CHANNEL_SIZE};
use crate::evtq::{EventQueue, EVTQ_SIZE};
use crate::io::IoMem;
use crate::logbuf::{LogRing, LOGBUF_SIZE};
use crate::{Incompatibility, IpcError, Result, Side, IPC_VERSION};

/// Offset of the boot-args structure from the start of SRAM
pub const BOOTARGS_OFFSET: usize = 0x200;

/// Size of the boot-args structure
pub const BOOTARGS_SIZE: usize = 0x50;

/// Marker the firmware build places at the start of the boot-args
pub const BOOTARGS_MAGIC: [u8; 16] = *b"CHUB_BOOTARGS\0\0\0";

const OFF_VERSION: usize = 0x10;
const OFF_REGIONS: usize = 0x14;
const OFF_CHUB_CLK: usize = 0x44;
const OFF_BOOT_MODE: usize = 0x48;

/// How the AP wants the firmware to come up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BootMode {
    /// Freshly downloaded image, initialise everything
    Cold = 0,
    /// Core restarted with the image still resident
    Warm = 1,
}

/// Half-open byte range `[start, end)` within SRAM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Region {
    pub start: usize,
    pub end: usize,
}

impl Region {
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub const fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub const fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub const fn contains(&self, offset: usize) -> bool {
        offset >= self.start && offset < self.end
    }

    fn validate(&self, name: &'static str, sram_size: usize) -> Result<()> {
        if self.start > self.end || self.end > sram_size || self.start % 4 != 0 {
            return Err(IpcError::BadLayout { region: name });
        }
        Ok(())
    }
}

/// Decoded boot-args structure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootArgs {
    pub ipc_version: u32,
    pub bootloader: Region,
    pub os: Region,
    pub ipc: Region,
    pub ram: Region,
    pub shared: Region,
    pub dump: Region,
    pub chub_clk: u32,
    pub boot_mode: u32,
}

impl BootArgs {
    /// Carve `sram_size` bytes up the way the reference firmware build does
    ///
    /// # Panics
    /// Panics if `sram_size` is below 64KB or not 4KB aligned
    pub fn standard(sram_size: usize) -> Self {
        assert!(sram_size >= 0x1_0000 && sram_size % 0x1000 == 0);
        let ipc_len = (IpcLayout::SIZE + 0xFFF) & !0xFFF;
        let ipc_start = sram_size / 2;
        let dump_start = sram_size - 0x2000;
        let shared_start = dump_start - 0x1000;

        Self {
            ipc_version: IPC_VERSION,
            bootloader: Region::new(0, 0x1000),
            os: Region::new(0x1000, ipc_start),
            ipc: Region::new(ipc_start, ipc_start + ipc_len),
            ram: Region::new(ipc_start + ipc_len, shared_start),
            shared: Region::new(shared_start, dump_start),
            dump: Region::new(dump_start, sram_size),
            chub_clk: 0,
            boot_mode: BootMode::Cold as u32,
        }
    }

    fn regions(&self) -> [(&'static str, Region); 6] {
        [
            ("bootloader", self.bootloader),
            ("os", self.os),
            ("ipc", self.ipc),
            ("ram", self.ram),
            ("shared", self.shared),
            ("dump", self.dump),
        ]
    }

    /// Serialize into the on-SRAM representation
    pub fn encode(&self) -> [u8; BOOTARGS_SIZE] {
        let mut raw = [0u8; BOOTARGS_SIZE];
        raw[..16].copy_from_slice(&BOOTARGS_MAGIC);
        put_word(&mut raw, OFF_VERSION, self.ipc_version);
        for (i, (_, region)) in self.regions().iter().enumerate() {
            put_word(&mut raw, OFF_REGIONS + i * 8, region.start as u32);
            put_word(&mut raw, OFF_REGIONS + i * 8 + 4, region.end as u32);
        }
        put_word(&mut raw, OFF_CHUB_CLK, self.chub_clk);
        put_word(&mut raw, OFF_BOOT_MODE, self.boot_mode);
        raw
    }

    /// Parse the on-SRAM representation
    ///
    /// # Errors
    /// `IncompatibleFirmware` on a magic or version mismatch. Region fields
    /// are not looked at in that case.
    pub fn decode(raw: &[u8; BOOTARGS_SIZE]) -> Result<Self> {
        if raw[..16] != BOOTARGS_MAGIC {
            return Err(IpcError::IncompatibleFirmware(Incompatibility::BadMagic));
        }

        let ipc_version = get_word(raw, OFF_VERSION);
        if ipc_version != IPC_VERSION {
            return Err(IpcError::IncompatibleFirmware(Incompatibility::Version {
                expected: IPC_VERSION,
                found: ipc_version,
            }));
        }

        let region = |i: usize| {
            Region::new(
                get_word(raw, OFF_REGIONS + i * 8) as usize,
                get_word(raw, OFF_REGIONS + i * 8 + 4) as usize,
            )
        };

        Ok(Self {
            ipc_version,
            bootloader: region(0),
            os: region(1),
            ipc: region(2),
            ram: region(3),
            shared: region(4),
            dump: region(5),
            chub_clk: get_word(raw, OFF_CHUB_CLK),
            boot_mode: get_word(raw, OFF_BOOT_MODE),
        })
    }
}

fn put_word(raw: &mut [u8], offset: usize, value: u32) {
    raw[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn get_word(raw: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&raw[offset..offset + 4]);
    u32::from_le_bytes(word)
}

bitflags! {
    /// Per-side state word in the IPC header, written only by its owner
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PeerFlags: u32 {
        /// Owner is awake and servicing the link
        const AWAKE   = 1 << 0;
        /// Owner finished its IPC initialisation
        const READY   = 1 << 1;
    }
}

/// Absolute offsets of the IPC control structures
///
/// | Structure | Size |
/// |---|---|
/// | header (AP flags, CHUB flags) | 16 |
/// | data channel A2C, C2A | `CHANNEL_SIZE` each |
/// | event queue A2C, C2A | `EVTQ_SIZE` each |
/// | firmware log ring | `LOGBUF_SIZE` |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpcLayout {
    pub header: usize,
    pub channel_a2c: usize,
    pub channel_c2a: usize,
    pub evtq_a2c: usize,
    pub evtq_c2a: usize,
    pub logbuf: usize,
}

const HEADER_SIZE: usize = 16;

impl IpcLayout {
    /// Bytes the IPC control area must provide
    pub const SIZE: usize = HEADER_SIZE + 2 * CHANNEL_SIZE + 2 * EVTQ_SIZE + LOGBUF_SIZE;

    /// Lay the structures out back to back from `base`
    pub const fn at(base: usize) -> Self {
        let channel_a2c = base + HEADER_SIZE;
        let channel_c2a = channel_a2c + CHANNEL_SIZE;
        let evtq_a2c = channel_c2a + CHANNEL_SIZE;
        let evtq_c2a = evtq_a2c + EVTQ_SIZE;
        let logbuf = evtq_c2a + EVTQ_SIZE;
        Self {
            header: base,
            channel_a2c,
            channel_c2a,
            evtq_a2c,
            evtq_c2a,
            logbuf,
        }
    }

    pub const fn channel(&self, dir: Direction) -> usize {
        match dir {
            Direction::ApToChub => self.channel_a2c,
            Direction::ChubToAp => self.channel_c2a,
        }
    }

    pub const fn evtq(&self, dir: Direction) -> usize {
        match dir {
            Direction::ApToChub => self.evtq_a2c,
            Direction::ChubToAp => self.evtq_c2a,
        }
    }

    const fn flags_offset(&self, side: Side) -> usize {
        match side {
            Side::Ap => self.header,
            Side::Chub => self.header + 4,
        }
    }
}

static_assertions::const_assert!(IpcLayout::SIZE % 4 == 0);
static_assertions::const_assert!(BOOTARGS_OFFSET + BOOTARGS_SIZE <= 0x1000);

/// Resolved SRAM map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Map {
    pub sram_size: usize,
    pub bootloader: Region,
    pub os: Region,
    pub ipc: Region,
    pub ram: Region,
    pub shared: Region,
    pub dump: Region,
    pub layout: IpcLayout,
}

/// Locate and validate the boot-args in `sram`, then derive every region
///
/// Pure read; callers do their own writes afterwards.
///
/// # Errors
/// - `IncompatibleFirmware` on magic or version mismatch
/// - `BadLayout` if a region is inverted, misaligned, past the end of SRAM,
///   or the IPC area is too small for the control structures
pub fn resolve(sram: &dyn IoMem) -> Result<Map> {
    let sram_size = sram.size();
    if sram_size < BOOTARGS_OFFSET + BOOTARGS_SIZE {
        return Err(IpcError::BadLayout { region: "bootargs" });
    }

    let mut raw = [0u8; BOOTARGS_SIZE];
    sram.read_bytes(BOOTARGS_OFFSET, &mut raw);
    let args = BootArgs::decode(&raw)?;

    for (name, region) in args.regions() {
        region.validate(name, sram_size)?;
    }
    if args.ipc.len() < IpcLayout::SIZE {
        return Err(IpcError::BadLayout { region: "ipc" });
    }
    if !args.bootloader.contains(BOOTARGS_OFFSET) {
        return Err(IpcError::BadLayout { region: "bootloader" });
    }

    log::debug!(
        "chub map: os {:#x}-{:#x} ipc {:#x}-{:#x} dump {:#x}-{:#x}",
        args.os.start,
        args.os.end,
        args.ipc.start,
        args.ipc.end,
        args.dump.start,
        args.dump.end
    );

    Ok(Map {
        sram_size,
        bootloader: args.bootloader,
        os: args.os,
        ipc: args.ipc,
        ram: args.ram,
        shared: args.shared,
        dump: args.dump,
        layout: IpcLayout::at(args.ipc.start),
    })
}

impl Map {
    /// Event queue for `dir`
    pub fn evtq<'a>(&self, sram: &'a dyn IoMem, dir: Direction) -> EventQueue<'a> {
        EventQueue::new(sram, self.layout.evtq(dir))
    }

    /// Data channel for `dir`
    pub fn channel<'a>(&self, sram: &'a dyn IoMem, dir: Direction) -> DataChannel<'a> {
        DataChannel::new(sram, self.layout.channel(dir), dir)
    }

    /// Firmware log ring
    pub fn log_ring<'a>(&self, sram: &'a dyn IoMem) -> LogRing<'a> {
        LogRing::new(sram, self.layout.logbuf)
    }

    pub fn read_flags(&self, sram: &dyn IoMem, side: Side) -> PeerFlags {
        PeerFlags::from_bits_truncate(sram.read32(self.layout.flags_offset(side)))
    }

    /// Publish `side`'s state word. Only `side` itself may call this.
    pub fn write_flags(&self, sram: &dyn IoMem, side: Side, flags: PeerFlags) {
        sram.write32(self.layout.flags_offset(side), flags.bits());
    }

    /// Fill in the AP-owned boot-args words before the core leaves reset
    pub fn write_boot_params(&self, sram: &dyn IoMem, mode: BootMode, chub_clk: u32) {
        sram.write32(BOOTARGS_OFFSET + OFF_CHUB_CLK, chub_clk);
        sram.write32(BOOTARGS_OFFSET + OFF_BOOT_MODE, mode as u32);
    }

    /// Boot mode currently recorded in the boot-args
    pub fn boot_mode(&self, sram: &dyn IoMem) -> u32 {
        sram.read32(BOOTARGS_OFFSET + OFF_BOOT_MODE)
    }

    /// Return every IPC structure to its idle state
    ///
    /// Slots go back to consumer-owned idle, queue cursors to zero, both
    /// header flag words to zero. Must only run while the CHUB core is held
    /// in reset.
    pub fn reset_ipc(&self, sram: &dyn IoMem) {
        sram.zero(self.layout.header, HEADER_SIZE);
        for dir in Direction::ALL {
            self.channel(sram, dir).reset();
            self.evtq(sram, dir).reset();
        }
        self.log_ring(sram).reset();
    }
}
