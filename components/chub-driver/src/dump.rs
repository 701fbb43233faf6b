//! Debug/Crash-Dump Collector
//!
//! A dump is a single record in the board's reserved memory, overwritten by
//! every capture:
//!
//! ```text
//! 0x00  header      magic, version, reason, timestamp, area count, length, sequence
//! 0x40  areas[3]    name[16], offset, size
//! 0xa0  gpr         GPR_COUNT words from the dump-GPR block
//!       sram        full SRAM image
//!       driver      driver control-block snapshot
//! ```
//!
//! The header is zeroed first and written last, so a capture cut short
//! never looks valid.

use core::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use chub_ipc::gpr::{GPR_BLOCK_SIZE, GPR_COUNT};
use chub_ipc::{Direction, IoMem};

use crate::link::ChubLink;
use crate::state::LinkState;
use crate::stats::{Stat, StatsSnapshot};
use crate::sync::lock;
use crate::{ChubError, Result};

pub const DUMP_MAGIC: [u8; 8] = *b"CHUBDUMP";
pub const DUMP_VERSION: u32 = 1;

const HEADER_SIZE: usize = 0x40;
const AREA_SIZE: usize = 32;
const AREA_NAME_LEN: usize = 16;
const AREA_COUNT: usize = 3;
const DATA_START: usize = HEADER_SIZE + AREA_COUNT * AREA_SIZE;

const OFF_MAGIC: usize = 0x00;
const OFF_VERSION: usize = 0x08;
const OFF_REASON: usize = 0x0c;
const OFF_TIMESTAMP: usize = 0x10;
const OFF_AREA_COUNT: usize = 0x18;
const OFF_TOTAL_LEN: usize = 0x1c;
const OFF_SEQUENCE: usize = 0x20;

pub const AREA_GPR: &str = "gpr";
pub const AREA_SRAM: &str = "sram";
pub const AREA_DRIVER: &str = "driver";

/// Why a dump was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DumpReason {
    Manual = 1,
    FirmwareRequest = 2,
    Fault = 3,
    AliveFailure = 4,
    ShutdownTimeout = 5,
    ProtocolError = 6,
    TransientExhausted = 7,
}

impl DumpReason {
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => DumpReason::Manual,
            2 => DumpReason::FirmwareRequest,
            3 => DumpReason::Fault,
            4 => DumpReason::AliveFailure,
            5 => DumpReason::ShutdownTimeout,
            6 => DumpReason::ProtocolError,
            7 => DumpReason::TransientExhausted,
            _ => return None,
        })
    }

    pub const fn name(self) -> &'static str {
        match self {
            DumpReason::Manual => "manual",
            DumpReason::FirmwareRequest => "firmware request",
            DumpReason::Fault => "fault",
            DumpReason::AliveFailure => "alive failure",
            DumpReason::ShutdownTimeout => "shutdown timeout",
            DumpReason::ProtocolError => "protocol error",
            DumpReason::TransientExhausted => "transient errors exhausted",
        }
    }
}

impl fmt::Display for DumpReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Driver control block as captured in a dump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverSnapshot {
    pub state: u32,
    pub wake_requested: u32,
    pub wake_priority: u32,
    pub wake_acquired: u32,
    pub a2c_busy: u32,
    pub c2a_busy: u32,
    pub a2c_queued: u32,
    pub c2a_queued: u32,
    pub stats: StatsSnapshot,
}

impl DriverSnapshot {
    pub const SIZE: usize = 8 * 4 + 8 * 8;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        let words = [
            self.state,
            self.wake_requested,
            self.wake_priority,
            self.wake_acquired,
            self.a2c_busy,
            self.c2a_busy,
            self.a2c_queued,
            self.c2a_queued,
        ];
        for (i, w) in words.iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&w.to_le_bytes());
        }
        for (i, c) in self.stats.0.iter().enumerate() {
            let at = 32 + i * 8;
            out[at..at + 8].copy_from_slice(&c.to_le_bytes());
        }
        out
    }

    pub fn decode(raw: &[u8]) -> Option<Self> {
        if raw.len() < Self::SIZE {
            return None;
        }
        let word = |i: usize| u32_at(raw, i * 4);
        let mut stats = StatsSnapshot::default();
        for (i, c) in stats.0.iter_mut().enumerate() {
            *c = u64_at(raw, 32 + i * 8);
        }
        Some(Self {
            state: word(0),
            wake_requested: word(1),
            wake_priority: word(2),
            wake_acquired: word(3),
            a2c_busy: word(4),
            c2a_busy: word(5),
            a2c_queued: word(6),
            c2a_queued: word(7),
            stats,
        })
    }
}

fn u32_at(raw: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&raw[at..at + 4]);
    u32::from_le_bytes(b)
}

fn u64_at(raw: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&raw[at..at + 8]);
    u64::from_le_bytes(b)
}

/// Bytes a dump of `sram_size` bytes of SRAM needs
pub const fn dump_size(sram_size: usize) -> usize {
    DATA_START + GPR_BLOCK_SIZE + sram_size + DriverSnapshot::SIZE
}

/// A parsed dump record
#[derive(Debug, Clone)]
pub struct DumpView {
    raw: Vec<u8>,
}

impl DumpView {
    /// Parse a record; `None` if `raw` does not hold a complete one
    pub fn parse(raw: &[u8]) -> Option<Self> {
        if raw.len() < DATA_START || raw[OFF_MAGIC..OFF_MAGIC + 8] != DUMP_MAGIC {
            return None;
        }
        if u32_at(raw, OFF_VERSION) != DUMP_VERSION
            || u32_at(raw, OFF_AREA_COUNT) as usize != AREA_COUNT
        {
            return None;
        }
        let total = u32_at(raw, OFF_TOTAL_LEN) as usize;
        if total < DATA_START || total > raw.len() {
            return None;
        }
        let view = Self {
            raw: raw[..total].to_vec(),
        };
        // Every area must lie inside the record
        for i in 0..AREA_COUNT {
            let (_, offset, size) = view.descriptor(i);
            if offset.checked_add(size).map_or(true, |end| end > total) {
                return None;
            }
        }
        Some(view)
    }

    fn descriptor(&self, index: usize) -> (&str, usize, usize) {
        let at = HEADER_SIZE + index * AREA_SIZE;
        let name = &self.raw[at..at + AREA_NAME_LEN];
        let len = name.iter().position(|&b| b == 0).unwrap_or(AREA_NAME_LEN);
        let name = core::str::from_utf8(&name[..len]).unwrap_or("");
        let offset = u32_at(&self.raw, at + AREA_NAME_LEN) as usize;
        let size = u32_at(&self.raw, at + AREA_NAME_LEN + 4) as usize;
        (name, offset, size)
    }

    pub fn reason_code(&self) -> u32 {
        u32_at(&self.raw, OFF_REASON)
    }

    pub fn reason(&self) -> Option<DumpReason> {
        DumpReason::from_code(self.reason_code())
    }

    /// Capture time, nanoseconds since the Unix epoch
    pub fn timestamp_ns(&self) -> u64 {
        u64_at(&self.raw, OFF_TIMESTAMP)
    }

    pub fn sequence(&self) -> u32 {
        u32_at(&self.raw, OFF_SEQUENCE)
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn area(&self, name: &str) -> Option<&[u8]> {
        (0..AREA_COUNT)
            .map(|i| self.descriptor(i))
            .find(|(n, _, _)| *n == name)
            .map(|(_, offset, size)| &self.raw[offset..offset + size])
    }

    pub fn gprs(&self) -> Option<[u32; GPR_COUNT]> {
        let area = self.area(AREA_GPR)?;
        if area.len() < GPR_BLOCK_SIZE {
            return None;
        }
        let mut out = [0u32; GPR_COUNT];
        for (i, r) in out.iter_mut().enumerate() {
            *r = u32_at(area, i * 4);
        }
        Some(out)
    }

    pub fn sram(&self) -> Option<&[u8]> {
        self.area(AREA_SRAM)
    }

    pub fn driver(&self) -> Option<DriverSnapshot> {
        DriverSnapshot::decode(self.area(AREA_DRIVER)?)
    }
}

fn write_area(mem: &dyn IoMem, index: usize, name: &str, offset: usize, size: usize) {
    let at = HEADER_SIZE + index * AREA_SIZE;
    let mut desc = [0u8; AREA_SIZE];
    let n = name.len().min(AREA_NAME_LEN - 1);
    desc[..n].copy_from_slice(&name.as_bytes()[..n]);
    desc[16..20].copy_from_slice(&(offset as u32).to_le_bytes());
    desc[20..24].copy_from_slice(&(size as u32).to_le_bytes());
    mem.write_bytes(at, &desc);
}

impl ChubLink {
    /// Capture GPRs, SRAM and the driver state into the reserved dump memory
    ///
    /// Keeps the CHUB awake for the duration without waiting on it, and
    /// never writes to the CHUB. Returns the record length.
    ///
    /// # Errors
    /// - `NotConfigured` if the board has no dump memory; nothing is touched
    /// - `BufferTooSmall` if the dump memory cannot hold a full record
    pub fn dump(&self, reason: DumpReason) -> Result<usize> {
        let Some(mem) = self.board.dump_memory() else {
            log::warn!("chub: no reserved dump memory, {} dump skipped", reason);
            return Err(ChubError::NotConfigured {
                what: "dump memory",
            });
        };
        let sram_len = self.sram.size();
        let total = dump_size(sram_len);
        if mem.size() < total {
            log::warn!(
                "chub: dump memory holds {} bytes, a dump needs {}",
                mem.size(),
                total
            );
            return Err(ChubError::BufferTooSmall {
                len: mem.size(),
                need: total,
            });
        }

        let _awake = self.wake.lock_priority();
        let _dump = lock(&self.dump_lock);
        let sequence = self
            .dump_seq
            .fetch_add(1, std::sync::atomic::Ordering::AcqRel)
            .wrapping_add(1);

        mem.zero(0, HEADER_SIZE);

        let gpr_at = DATA_START;
        let sram_at = gpr_at + GPR_BLOCK_SIZE;
        let driver_at = sram_at + sram_len;
        write_area(&*mem, 0, AREA_GPR, gpr_at, GPR_BLOCK_SIZE);
        write_area(&*mem, 1, AREA_SRAM, sram_at, sram_len);
        write_area(&*mem, 2, AREA_DRIVER, driver_at, DriverSnapshot::SIZE);

        let gpr = self.board.gpr_regs();
        for i in 0..GPR_COUNT {
            mem.write32(gpr_at + i * 4, gpr.read32(i * 4));
        }
        mem.write_bytes(sram_at, &self.sram.to_vec(0, sram_len));
        self.stats.bump(Stat::Dumps);
        mem.write_bytes(driver_at, &self.snapshot().encode());

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        mem.write32(OFF_VERSION, DUMP_VERSION);
        mem.write32(OFF_REASON, reason as u32);
        mem.write32(OFF_TIMESTAMP, timestamp as u32);
        mem.write32(OFF_TIMESTAMP + 4, (timestamp >> 32) as u32);
        mem.write32(OFF_AREA_COUNT, AREA_COUNT as u32);
        mem.write32(OFF_TOTAL_LEN, total as u32);
        mem.write32(OFF_SEQUENCE, sequence);
        mem.write_bytes(OFF_MAGIC, &DUMP_MAGIC);

        log::info!(
            "chub: {} dump #{} captured ({} bytes, state {})",
            reason,
            sequence,
            total,
            self.state()
        );
        Ok(total)
    }

    /// The record currently in the dump memory, if a valid one is there
    pub fn last_dump(&self) -> Result<Option<DumpView>> {
        let mem = self.board.dump_memory().ok_or(ChubError::NotConfigured {
            what: "dump memory",
        })?;
        let _dump = lock(&self.dump_lock);
        if mem.size() < DATA_START {
            return Ok(None);
        }
        let total = (mem.read32(OFF_TOTAL_LEN) as usize).clamp(DATA_START, mem.size());
        Ok(DumpView::parse(&mem.to_vec(0, total)))
    }

    pub(crate) fn snapshot(&self) -> DriverSnapshot {
        let (mut busy, mut queued) = ([0u32; 2], [0u32; 2]);
        if let Some(map) = self.map() {
            for (i, dir) in Direction::ALL.iter().enumerate() {
                busy[i] = map.channel(&*self.sram, *dir).busy_slots() as u32;
                queued[i] = map.evtq(&*self.sram, *dir).len().unwrap_or(0) as u32;
            }
        }
        DriverSnapshot {
            state: self.state() as u32,
            wake_requested: self.wake.requested(),
            wake_priority: self.wake.priority_held(),
            wake_acquired: self.wake.is_acquired() as u32,
            a2c_busy: busy[0],
            c2a_busy: busy[1],
            a2c_queued: queued[0],
            c2a_queued: queued[1],
            stats: self.stats.snapshot(),
        }
    }
}

/// Decode the `state` word of a [`DriverSnapshot`]
pub fn snapshot_state(raw: u32) -> Option<LinkState> {
    [
        LinkState::NoPower,
        LinkState::PowerOn,
        LinkState::Run,
        LinkState::Shutdown,
        LinkState::NoResponse,
    ]
    .into_iter()
    .find(|s| *s as u32 == raw)
}
