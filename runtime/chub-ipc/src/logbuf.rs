//! Firmware log ring
//!
//! Byte ring the firmware appends text to and the AP drains. The firmware
//! never blocks on a full ring: whatever does not fit is dropped and counted
//! in `lost`, which only ever grows.

use alloc::vec::Vec;

use crate::io::IoMem;
use crate::ring::RingIndex;
use crate::{IpcError, Result};

/// Text capacity in bytes
pub const LOG_BUF_LEN: usize = 2048;

const EQ: usize = 0x00;
const DQ: usize = 0x04;
const FULL: usize = 0x08;
const LOST: usize = 0x0c;
const DATA: usize = 0x10;

/// Bytes the ring occupies in SRAM
pub const LOGBUF_SIZE: usize = DATA + LOG_BUF_LEN;

type Cursor = RingIndex<LOG_BUF_LEN>;

/// Accessor for the log ring
pub struct LogRing<'a> {
    mem: &'a dyn IoMem,
    base: usize,
}

impl<'a> LogRing<'a> {
    pub fn new(mem: &'a dyn IoMem, base: usize) -> Self {
        Self { mem, base }
    }

    pub fn reset(&self) {
        self.mem.zero(self.base, DATA);
    }

    fn cursors(&self) -> Result<(Cursor, Cursor)> {
        let eq = self.mem.read32(self.base + EQ);
        let dq = self.mem.read32(self.base + DQ);
        match (Cursor::from_raw(eq), Cursor::from_raw(dq)) {
            (Some(eq), Some(dq)) => Ok((eq, dq)),
            _ => Err(IpcError::CorruptQueue { eq, dq }),
        }
    }

    /// Unread bytes
    pub fn used(&self) -> Result<usize> {
        let (eq, dq) = self.cursors()?;
        if eq == dq && self.mem.read32(self.base + FULL) != 0 {
            Ok(LOG_BUF_LEN)
        } else {
            Ok(dq.distance_to(eq))
        }
    }

    /// Bytes dropped since the last reset
    pub fn lost(&self) -> u32 {
        self.mem.read32(self.base + LOST)
    }

    /// Append as much of `text` as fits; returns the number of bytes stored
    pub fn push(&self, text: &[u8]) -> Result<usize> {
        let free = LOG_BUF_LEN - self.used()?;
        let (eq, dq) = self.cursors()?;
        let n = text.len().min(free);

        let first = n.min(LOG_BUF_LEN - eq.get());
        self.mem.write_bytes(self.base + DATA + eq.get(), &text[..first]);
        self.mem.write_bytes(self.base + DATA, &text[first..n]);

        let next = eq.advance(n);
        self.mem.write32(self.base + EQ, next.raw());
        if n > 0 && next == dq {
            self.mem.write32(self.base + FULL, 1);
        }

        let dropped = (text.len() - n) as u32;
        if dropped > 0 {
            let lost = self.lost().saturating_add(dropped);
            self.mem.write32(self.base + LOST, lost);
        }
        Ok(n)
    }

    /// Move every unread byte into `out`; returns how many were moved
    pub fn drain(&self, out: &mut Vec<u8>) -> Result<usize> {
        let n = self.used()?;
        let (_, dq) = self.cursors()?;

        let start = out.len();
        out.resize(start + n, 0);
        let first = n.min(LOG_BUF_LEN - dq.get());
        self.mem
            .read_bytes(self.base + DATA + dq.get(), &mut out[start..start + first]);
        self.mem
            .read_bytes(self.base + DATA, &mut out[start + first..start + n]);

        self.mem.write32(self.base + DQ, dq.advance(n).raw());
        self.mem.write32(self.base + FULL, 0);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::SharedMem;

    fn ring_mem() -> SharedMem {
        SharedMem::new(LOGBUF_SIZE)
    }

    #[test]
    fn test_push_drain() {
        let mem = ring_mem();
        let ring = LogRing::new(&mem, 0);

        assert_eq!(ring.push(b"boot ok\n").unwrap(), 8);
        let mut out = Vec::new();
        assert_eq!(ring.drain(&mut out).unwrap(), 8);
        assert_eq!(out, b"boot ok\n");
        assert_eq!(ring.used().unwrap(), 0);
    }

    #[test]
    fn test_wraparound() {
        let mem = ring_mem();
        let ring = LogRing::new(&mem, 0);
        let mut out = Vec::new();

        ring.push(&[b'x'; LOG_BUF_LEN - 3]).unwrap();
        ring.drain(&mut out).unwrap();
        out.clear();

        ring.push(b"wrapped").unwrap();
        ring.drain(&mut out).unwrap();
        assert_eq!(out, b"wrapped");
    }

    #[test]
    fn test_overflow_counts_lost() {
        let mem = ring_mem();
        let ring = LogRing::new(&mem, 0);

        ring.push(&[b'a'; LOG_BUF_LEN - 10]).unwrap();
        assert_eq!(ring.push(&[b'b'; 25]).unwrap(), 10);
        assert_eq!(ring.used().unwrap(), LOG_BUF_LEN);
        assert_eq!(ring.lost(), 15);

        assert_eq!(ring.push(b"more").unwrap(), 0);
        assert_eq!(ring.lost(), 19);

        let mut out = Vec::new();
        assert_eq!(ring.drain(&mut out).unwrap(), LOG_BUF_LEN);
        assert_eq!(&out[LOG_BUF_LEN - 10..], &[b'b'; 10]);
    }
}
