//! Board backed by the ContextHub simulator

use std::sync::Arc;

use chub_ipc::{IoMem, SharedMem};
use chub_sim::{image, SimConfig, SimError, SimHardware};

use super::{Board, IrqHandler};
use crate::{ChubError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimBoardConfig {
    pub sram_size: usize,
    /// Size of the reserved dump memory; zero leaves it out
    pub dump_size: usize,
}

impl Default for SimBoardConfig {
    fn default() -> Self {
        Self {
            sram_size: SimConfig::default().sram_size,
            dump_size: 0x4_0000,
        }
    }
}

pub struct SimBoard {
    hw: Arc<SimHardware>,
    dump: Option<Arc<SharedMem>>,
}

impl SimBoard {
    pub fn new(cfg: SimBoardConfig) -> Result<Self> {
        let hw = SimHardware::new(SimConfig {
            sram_size: cfg.sram_size,
        })?;
        let dump = (cfg.dump_size > 0).then(|| Arc::new(SharedMem::new(cfg.dump_size)));
        Ok(Self { hw, dump })
    }

    /// The simulated part, for poking the firmware from tests and tools
    pub fn hardware(&self) -> &Arc<SimHardware> {
        &self.hw
    }
}

impl From<SimError> for ChubError {
    fn from(e: SimError) -> Self {
        ChubError::Board(e.to_string())
    }
}

impl Board for SimBoard {
    fn name(&self) -> &str {
        "sim"
    }

    fn sram(&self) -> Arc<dyn IoMem> {
        self.hw.sram()
    }

    fn mailbox_regs(&self) -> Arc<dyn IoMem> {
        self.hw.mailbox()
    }

    fn gpr_regs(&self) -> Arc<dyn IoMem> {
        self.hw.gpr_block()
    }

    fn dump_memory(&self) -> Option<Arc<dyn IoMem>> {
        self.dump.clone().map(|mem| mem as Arc<dyn IoMem>)
    }

    fn builtin_firmware(&self, name: &str) -> Option<Vec<u8>> {
        image::builtin(name, self.hw.config().sram_size)
    }

    fn release_reset(&self) -> Result<()> {
        Ok(self.hw.release_reset()?)
    }

    fn assert_reset(&self) -> Result<()> {
        Ok(self.hw.assert_reset()?)
    }

    fn reset_core(&self) -> Result<()> {
        Ok(self.hw.reset_core()?)
    }

    fn reset_system(&self) -> Result<()> {
        Ok(self.hw.reset_system()?)
    }

    fn cpu_halted(&self) -> bool {
        self.hw.cpu_halted()
    }

    fn set_wake_line(&self, asserted: bool) {
        self.hw.set_wake_line(asserted);
    }

    fn attach_irq(&self, handler: IrqHandler) {
        self.hw.set_irq_handler(Some(handler));
    }

    fn detach_irq(&self) {
        self.hw.set_irq_handler(None);
    }
}
