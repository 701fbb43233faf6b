//! ContextHub Driver - AP side of the sensor hub mailbox link
//!
//! # Purpose
//! Boots the ContextHub co-processor, keeps it running, and carries
//! payloads and events between it and the client driver above. When the
//! firmware faults or stops answering, captures a crash dump and brings the
//! link back.
//!
//! # Integration Points
//! - Depends on: `chub-ipc` (wire format), a [`Board`] for the SoC-specific
//!   parts (`chub-sim` behind the default `sim` feature)
//! - Provides to: the sensor hub client (`write`, `read`, `write_event`),
//!   debug tooling ([`DebugFs`]), platform glue ([`platform`])
//! - Hardware: mailbox block, CHUB SRAM, dump-GPR block, wake GPIO, reset
//!   control, reserved dump memory
//!
//! # Architecture
//! One [`ChubLink`] per co-processor, no globals below [`platform`]. Three
//! execution contexts meet in it:
//! - the board's interrupt context runs the mailbox handler, which only
//!   acknowledges, wakes waiters and posts work
//! - a worker thread flushes the firmware log, takes requested dumps and
//!   runs recoveries
//! - callers block in `read`, wake requests and the alive handshake, all
//!   bounded by a timeout and cancellable through
//!   [`ChubLink::interrupt_waiters`]
//!
//! ```text
//!  NO_POWER --power_on--> POWER_ON --alive--> RUN --shutdown--> SHUTDOWN
//!                              \               |                  |
//!                               `--> NO_RESPONSE <--alive failed  reset --> POWER_ON
//! ```
//!
//! # Testing Strategy
//! - Unit tests: wake refcounting, wait primitives, error mapping, config
//!   parsing, dump record parsing, firmware log reassembly
//! - Integration tests (`tests/`): the driver against the simulated board,
//!   covering boot, shutdown, reset, transport, recovery, debug attributes

pub mod board;
mod boot;
pub mod config;
pub mod debugfs;
pub mod dump;
pub mod error;
mod fwlog;
mod irq;
pub mod link;
pub mod platform;
pub mod state;
pub mod stats;
mod sync;
pub mod transport;
pub mod wake;
mod worker;

pub use board::{Board, IrqHandler, LogRestart, NoRestart, Restart};
pub use config::ChubConfig;
pub use debugfs::DebugFs;
pub use dump::{DumpReason, DumpView};
pub use error::{errno, ChubError, Result};
pub use link::ChubLink;
pub use state::LinkState;
pub use stats::{Stat, StatsSnapshot};
pub use transport::LinkCommand;
pub use wake::{PriorityGuard, WakeCoordinator, WakeGuard, WakeLine};

#[cfg(feature = "sim")]
pub use board::{SimBoard, SimBoardConfig};
