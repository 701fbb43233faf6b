//! Fixed-capacity ring index
//!
//! Every cursor in the IPC area (event queue enqueue/dequeue, event IRQ
//! allocation, log ring) wraps at its own capacity. `RingIndex` keeps that
//! arithmetic in one place.

/// Index into a ring of `N` entries, always in `0..N`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RingIndex<const N: usize>(u32);

impl<const N: usize> RingIndex<N> {
    /// Ring capacity
    pub const CAPACITY: usize = N;

    /// First entry
    pub const ZERO: Self = Self(0);

    /// Build from a value already known to be in range
    ///
    /// # Panics
    /// Panics if `index >= N`
    pub const fn new(index: usize) -> Self {
        assert!(N > 0, "ring capacity must be non-zero");
        assert!(index < N, "ring index out of range");
        Self(index as u32)
    }

    /// Validate a cursor read back from shared memory
    ///
    /// Returns `None` for values the peer (or a corrupted SRAM) left outside
    /// the ring.
    pub const fn from_raw(raw: u32) -> Option<Self> {
        if (raw as usize) < N {
            Some(Self(raw))
        } else {
            None
        }
    }

    /// Raw value for storing back into shared memory
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Position as a slice index
    pub const fn get(self) -> usize {
        self.0 as usize
    }

    /// The following position, wrapping to zero after `N - 1`
    pub const fn next(self) -> Self {
        if self.0 as usize + 1 == N {
            Self(0)
        } else {
            Self(self.0 + 1)
        }
    }

    /// Advance by `n` positions
    pub const fn advance(self, n: usize) -> Self {
        Self(((self.0 as usize + n % N) % N) as u32)
    }

    /// Number of steps from `self` forward to `later`
    pub const fn distance_to(self, later: Self) -> usize {
        (later.0 as usize + N - self.0 as usize) % N
    }
}
