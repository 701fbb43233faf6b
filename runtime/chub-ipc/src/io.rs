//! Memory access for MMIO registers and shared SRAM
//!
//! Both processors see SRAM and the mailbox block as plain memory. The only
//! ordering guarantee the hardware offers is that an aligned 32-bit access is
//! performed as one unit, so that is the primitive every accessor is built on.
//! Byte copies are composed from word accesses.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

/// Word-addressed view of a device memory window
///
/// Offsets are bytes from the start of the window. `read32`/`write32`
/// require 4-byte alignment.
pub trait IoMem: Send + Sync {
    /// Window size in bytes
    fn size(&self) -> usize;

    /// Load one aligned 32-bit word
    fn read32(&self, offset: usize) -> u32;

    /// Store one aligned 32-bit word
    fn write32(&self, offset: usize, value: u32);

    /// Copy `buf.len()` bytes starting at `offset` out of the window
    fn read_bytes(&self, offset: usize, buf: &mut [u8]) {
        let mut pos = 0;
        while pos < buf.len() {
            let addr = offset + pos;
            let base = addr & !3;
            let shift = addr - base;
            let n = (4 - shift).min(buf.len() - pos);
            let word = self.read32(base).to_le_bytes();
            buf[pos..pos + n].copy_from_slice(&word[shift..shift + n]);
            pos += n;
        }
    }

    /// Copy `data` into the window at `offset`
    ///
    /// Partial words at either end are read-modify-written.
    fn write_bytes(&self, offset: usize, data: &[u8]) {
        let mut pos = 0;
        while pos < data.len() {
            let addr = offset + pos;
            let base = addr & !3;
            let shift = addr - base;
            let n = (4 - shift).min(data.len() - pos);
            let mut word = if n == 4 {
                [0u8; 4]
            } else {
                self.read32(base).to_le_bytes()
            };
            word[shift..shift + n].copy_from_slice(&data[pos..pos + n]);
            self.write32(base, u32::from_le_bytes(word));
            pos += n;
        }
    }

    /// Zero `len` bytes starting at the aligned `offset`
    fn zero(&self, offset: usize, len: usize) {
        debug_assert!(offset % 4 == 0);
        let mut pos = 0;
        while pos + 4 <= len {
            self.write32(offset + pos, 0);
            pos += 4;
        }
        if pos < len {
            self.write_bytes(offset + pos, &[0u8; 3][..len - pos]);
        }
    }

    /// Snapshot `len` bytes at `offset` into a fresh buffer
    fn to_vec(&self, offset: usize, len: usize) -> Vec<u8> {
        let mut out = alloc::vec![0u8; len];
        self.read_bytes(offset, &mut out);
        out
    }
}

/// MMIO register accessor
///
/// Provides volatile word access to a memory-mapped region.
pub struct MmioRegion {
    base: usize,
    size: usize,
}

impl MmioRegion {
    /// Create a new MMIO region
    ///
    /// # Safety
    /// Caller must ensure `base..base + size` is mapped device memory that
    /// stays valid for the lifetime of this accessor.
    pub unsafe fn new(base: usize, size: usize) -> Self {
        Self { base, size }
    }

    /// Get base address
    pub fn base(&self) -> usize {
        self.base
    }
}

impl IoMem for MmioRegion {
    fn size(&self) -> usize {
        self.size
    }

    fn read32(&self, offset: usize) -> u32 {
        assert!(offset % 4 == 0 && offset + 4 <= self.size);
        // SAFETY: bounds and alignment checked above; `new` guarantees the mapping.
        unsafe { core::ptr::read_volatile((self.base + offset) as *const u32) }
    }

    fn write32(&self, offset: usize, value: u32) {
        assert!(offset % 4 == 0 && offset + 4 <= self.size);
        // SAFETY: bounds and alignment checked above; `new` guarantees the mapping.
        unsafe { core::ptr::write_volatile((self.base + offset) as *mut u32, value) }
    }
}

/// Heap-backed shared memory made of atomic words
///
/// Stands in for SRAM or a reserved-memory carveout when both "processors"
/// are threads in one address space.
pub struct SharedMem {
    words: Box<[AtomicU32]>,
}

impl SharedMem {
    /// Allocate `size` bytes (rounded up to a whole word), zero filled
    pub fn new(size: usize) -> Self {
        let words = (0..(size + 3) / 4).map(|_| AtomicU32::new(0)).collect();
        Self { words }
    }
}

impl IoMem for SharedMem {
    fn size(&self) -> usize {
        self.words.len() * 4
    }

    fn read32(&self, offset: usize) -> u32 {
        debug_assert!(offset % 4 == 0);
        self.words[offset / 4].load(Ordering::Acquire)
    }

    fn write32(&self, offset: usize, value: u32) {
        debug_assert!(offset % 4 == 0);
        self.words[offset / 4].store(value, Ordering::Release);
    }
}
