//! Error and recovery counters

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stat {
    AliveFailures,
    WakeTimeouts,
    QueueFull,
    NoFreeSlot,
    ProtocolErrors,
    Faults,
    Dumps,
    Recoveries,
}

impl Stat {
    pub const ALL: [Stat; 8] = [
        Stat::AliveFailures,
        Stat::WakeTimeouts,
        Stat::QueueFull,
        Stat::NoFreeSlot,
        Stat::ProtocolErrors,
        Stat::Faults,
        Stat::Dumps,
        Stat::Recoveries,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Stat::AliveFailures => "alive_failures",
            Stat::WakeTimeouts => "wake_timeouts",
            Stat::QueueFull => "queue_full",
            Stat::NoFreeSlot => "no_free_slot",
            Stat::ProtocolErrors => "protocol_errors",
            Stat::Faults => "faults",
            Stat::Dumps => "dumps",
            Stat::Recoveries => "recoveries",
        }
    }
}

#[derive(Debug, Default)]
pub struct ErrorStats {
    counters: [AtomicU64; 8],
}

impl ErrorStats {
    pub fn bump(&self, stat: Stat) {
        self.counters[stat as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, stat: Stat) -> u64 {
        self.counters[stat as usize].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot(Stat::ALL.map(|s| self.get(s)))
    }
}

/// Point-in-time copy of every counter, in `Stat::ALL` order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot(pub [u64; 8]);

impl StatsSnapshot {
    pub fn get(&self, stat: Stat) -> u64 {
        self.0[stat as usize]
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for stat in Stat::ALL {
            writeln!(f, "{}: {}", stat.name(), self.get(stat))?;
        }
        Ok(())
    }
}
