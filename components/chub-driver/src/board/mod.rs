//! Board Abstraction
//!
//! Everything SoC-specific the driver needs: where SRAM and the mailbox are
//! mapped, how the core is held in and released from reset, the wake GPIO,
//! the CPU-halted status bit, the reserved dump memory and the interrupt
//! line. A hardware port implements [`Board`] over its MMIO windows; the
//! `sim` feature provides one over the software model.

use std::path::Path;
use std::sync::Arc;

use chub_ipc::IoMem;

use crate::config::FirmwareConfig;
use crate::{ChubError, Result};

#[cfg(feature = "sim")]
pub mod sim;

#[cfg(feature = "sim")]
pub use sim::{SimBoard, SimBoardConfig};

/// Handler the board calls from its interrupt context
pub type IrqHandler = Arc<dyn Fn() + Send + Sync>;

pub trait Board: Send + Sync {
    /// Short identifier for logs
    fn name(&self) -> &str;

    /// CHUB SRAM window
    fn sram(&self) -> Arc<dyn IoMem>;

    /// Mailbox register block
    fn mailbox_regs(&self) -> Arc<dyn IoMem>;

    /// Dump-GPR latch block (`GPR_BLOCK_SIZE` bytes)
    fn gpr_regs(&self) -> Arc<dyn IoMem>;

    /// Reserved memory crash dumps are written to, if the platform has any
    fn dump_memory(&self) -> Option<Arc<dyn IoMem>>;

    /// Image compiled into the board support for `name`
    fn builtin_firmware(&self, _name: &str) -> Option<Vec<u8>> {
        None
    }

    /// Power the core and let it run
    fn release_reset(&self) -> Result<()>;

    /// Hold the core in reset
    fn assert_reset(&self) -> Result<()>;

    /// Restart the core only; SRAM keeps its contents
    fn reset_core(&self) -> Result<()>;

    /// Reset the whole subsystem; SRAM contents are lost
    fn reset_system(&self) -> Result<()>;

    /// CPU-halted status bit
    fn cpu_halted(&self) -> bool;

    /// Drive the AP->CHUB wake GPIO
    fn set_wake_line(&self, asserted: bool);

    /// Route the AP mailbox interrupt to `handler`
    fn attach_irq(&self, handler: IrqHandler);

    fn detach_irq(&self);
}

/// System-level restart hook, fired when recovery keeps failing
pub trait Restart: Send + Sync {
    fn restart(&self, reason: &str);
}

/// Ignores restart requests
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRestart;

impl Restart for NoRestart {
    fn restart(&self, reason: &str) {
        log::debug!("chub: restart requested ({}), no hook installed", reason);
    }
}

/// Records restart requests in the log only
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRestart;

impl Restart for LogRestart {
    fn restart(&self, reason: &str) {
        log::error!("chub: system restart requested: {}", reason);
    }
}

/// Fetch image `name`: from `cfg.dir` when set, otherwise the board's built-in copy
pub(crate) fn fetch_firmware(board: &dyn Board, cfg: &FirmwareConfig, name: &str) -> Result<Vec<u8>> {
    let image = match &cfg.dir {
        Some(dir) => read_image(dir, name)?,
        None => board.builtin_firmware(name).ok_or_else(|| ChubError::Firmware {
            name: name.to_string(),
            reason: format!("no built-in image on board {}", board.name()),
        })?,
    };
    if image.is_empty() {
        return Err(ChubError::Firmware {
            name: name.to_string(),
            reason: "image is empty".into(),
        });
    }
    log::debug!("chub: fetched {} ({} bytes)", name, image.len());
    Ok(image)
}

fn read_image(dir: &Path, name: &str) -> Result<Vec<u8>> {
    let path = dir.join(name);
    std::fs::read(&path).map_err(|e| ChubError::Firmware {
        name: name.to_string(),
        reason: format!("{}: {}", path.display(), e),
    })
}
