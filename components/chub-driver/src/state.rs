//! Link state machine
//!
//! ```text
//! NO_POWER --power_on--> POWER_ON --alive ok--> RUN --shutdown--> SHUTDOWN
//!                             |                  |                   |
//!                       alive failed        alive failed          reset
//!                             v                  v                   v
//!                        NO_RESPONSE <-----------+              POWER_ON
//! ```

use core::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkState {
    NoPower = 0,
    PowerOn = 1,
    Run = 2,
    Shutdown = 3,
    NoResponse = 4,
}

impl LinkState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => LinkState::PowerOn,
            2 => LinkState::Run,
            3 => LinkState::Shutdown,
            4 => LinkState::NoResponse,
            _ => LinkState::NoPower,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            LinkState::NoPower => "NO_POWER",
            LinkState::PowerOn => "POWER_ON",
            LinkState::Run => "RUN",
            LinkState::Shutdown => "SHUTDOWN",
            LinkState::NoResponse => "NO_RESPONSE",
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lock-free cell readers poll from any context
///
/// Writers are serialized by the sequencer lock, so plain stores suffice.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: LinkState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> LinkState {
        LinkState::from_raw(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: LinkState) {
        let prev = LinkState::from_raw(self.0.swap(state as u8, Ordering::AcqRel));
        if prev != state {
            log::info!("chub: {} -> {}", prev, state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_round_trip() {
        let cell = StateCell::new(LinkState::NoPower);
        for state in [
            LinkState::PowerOn,
            LinkState::Run,
            LinkState::Shutdown,
            LinkState::NoResponse,
            LinkState::NoPower,
        ] {
            cell.set(state);
            assert_eq!(cell.get(), state);
        }
    }
}
