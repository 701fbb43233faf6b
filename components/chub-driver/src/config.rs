//! Driver configuration
//!
//! Every field has a default, so an empty file (or no file) is valid:
//!
//! ```toml
//! [firmware]
//! bootloader = "bl.unchecked.bin"
//! os = "os.checked.bin"
//! dir = "/lib/firmware/chub"   # omit to use the board's built-in images
//!
//! [boot]
//! alive_retries = 5
//! alive_timeout_ms = 200
//! shutdown_grace_ms = 100
//! chub_clk_hz = 360000000
//!
//! [transport]
//! wake_timeout_ms = 500
//! read_timeout_ms = 1000
//!
//! [recovery]
//! escalate_after = 8
//! max_failed_recoveries = 3
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::Result;

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChubConfig {
    pub firmware: FirmwareConfig,
    pub boot: BootConfig,
    pub transport: TransportConfig,
    pub recovery: RecoveryConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FirmwareConfig {
    /// Logical name of the bootloader image
    pub bootloader: String,
    /// Logical name of the OS image
    pub os: String,
    /// Directory images are loaded from; `None` selects built-in images
    pub dir: Option<PathBuf>,
}

impl Default for FirmwareConfig {
    fn default() -> Self {
        Self {
            bootloader: "bl.unchecked.bin".into(),
            os: "os.checked.bin".into(),
            dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BootConfig {
    pub alive_retries: u32,
    pub alive_timeout_ms: u64,
    pub shutdown_grace_ms: u64,
    pub chub_clk_hz: u32,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            alive_retries: 5,
            alive_timeout_ms: 200,
            shutdown_grace_ms: 100,
            chub_clk_hz: 360_000_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TransportConfig {
    pub wake_timeout_ms: u64,
    pub read_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            wake_timeout_ms: 500,
            read_timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Consecutive transient failures before dump + reset
    pub escalate_after: u32,
    /// Consecutive failed recoveries before the system restart hook fires
    pub max_failed_recoveries: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            escalate_after: 8,
            max_failed_recoveries: 3,
        }
    }
}

impl ChubConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn alive_timeout(&self) -> Duration {
        Duration::from_millis(self.boot.alive_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.boot.shutdown_grace_ms)
    }

    pub fn wake_timeout(&self) -> Duration {
        Duration::from_millis(self.transport.wake_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.transport.read_timeout_ms)
    }
}
