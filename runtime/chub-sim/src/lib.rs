//! ContextHub Simulator - Software stand-in for the sensor hub co-processor
//!
//! # Purpose
//! Lets the AP driver run end to end without silicon. Models the parts of
//! the SoC the driver touches (SRAM, mailbox block, dump-GPR latches, power
//! gate and reset hold, wake GPIO) and runs a small firmware that speaks the
//! CHUB half of the IPC protocol.
//!
//! # Integration Points
//! - Depends on: `chub-ipc` (wire format, firmware side)
//! - Provides to: `chub-driver` board `sim`, `chub-ctl`, integration tests
//!
//! # Architecture
//! Two threads per instance. The firmware thread waits on the CHUB
//! interrupt line and a control channel; the delivery thread waits on the AP
//! line and calls whatever handler the driver installed. Reset hold and
//! release are synchronous so a caller knows the core state when they return.
//! [`Behavior`] switches let tests make the firmware stop answering pings,
//! ignore shutdown, stop draining its queue, and so on.

pub mod firmware;
pub mod hardware;
pub mod image;
pub mod mailbox;

pub use firmware::{Behavior, Journal};
pub use hardware::{IrqHandler, SimConfig, SimHardware};
pub use mailbox::SimMailbox;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid simulator configuration: {reason}")]
    BadConfig { reason: &'static str },

    #[error("firmware thread did not acknowledge in time")]
    ControlTimeout,

    #[error("firmware thread has exited")]
    FirmwareGone,

    #[error("failed to start simulator thread: {0}")]
    Spawn(#[from] std::io::Error),
}

pub type Result<T> = core::result::Result<T, SimError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chub_ipc::map::resolve;
    use chub_ipc::{DirectIrq, IoMem, Mailbox, Side};
    use std::time::{Duration, Instant};

    fn booted() -> std::sync::Arc<SimHardware> {
        let hw = SimHardware::new(SimConfig::default()).unwrap();
        let sram = hw.sram();
        let size = hw.config().sram_size;
        sram.write_bytes(0, &image::builtin(image::BOOTLOADER_NAME, size).unwrap());
        let map = resolve(&*sram).unwrap();
        sram.write_bytes(map.os.start, &image::os());
        map.reset_ipc(&*sram);
        hw.release_reset().unwrap();
        hw
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_rejects_tiny_sram() {
        assert!(matches!(
            SimHardware::new(SimConfig { sram_size: 0x1000 }),
            Err(SimError::BadConfig { .. })
        ));
    }

    #[test]
    fn test_core_starts_in_reset() {
        let hw = SimHardware::new(SimConfig::default()).unwrap();
        assert!(hw.reset_held());
        assert!(hw.cpu_halted());
    }

    #[test]
    fn test_boot_without_image_stays_silent() {
        let hw = SimHardware::new(SimConfig::default()).unwrap();
        hw.release_reset().unwrap();
        assert!(hw.journal().boots().is_empty());
        assert!(hw.cpu_halted());
    }

    #[test]
    fn test_alive_ping_answered() {
        let hw = booted();
        let ap = Mailbox::new(hw.mailbox(), Side::Ap);

        ap.generate_interrupt(DirectIrq::Alive.irq());
        assert!(wait_for(|| ap.read_status() & DirectIrq::Alive.bit() != 0));
        assert_eq!(hw.journal().pings(), 1);
    }

    #[test]
    fn test_shutdown_halts_core() {
        let hw = booted();
        let ap = Mailbox::new(hw.mailbox(), Side::Ap);

        ap.generate_interrupt(DirectIrq::Shutdown.irq());
        assert!(wait_for(|| hw.cpu_halted()));
        assert!(wait_for(|| ap.read_status() & DirectIrq::Shutdown.bit() != 0));
    }

    #[test]
    fn test_ignored_shutdown_keeps_running() {
        let hw = booted();
        hw.behavior().set_quiesce_on_shutdown(false);
        let ap = Mailbox::new(hw.mailbox(), Side::Ap);

        ap.generate_interrupt(DirectIrq::Shutdown.irq());
        std::thread::sleep(Duration::from_millis(20));
        assert!(!hw.cpu_halted());
    }

    #[test]
    fn test_system_reset_clears_sram() {
        let hw = booted();
        hw.reset_system().unwrap();
        assert!(hw.reset_held());
        assert_eq!(hw.sram().read32(0), 0);
    }
}
