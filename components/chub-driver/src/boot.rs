//! Boot/Reset Sequencer
//!
//! Firmware download, the alive handshake, graceful and forced shutdown, and
//! core-only or full reset. Every transition runs under `seq_lock`.

use std::time::{Duration, Instant};

use chub_ipc::mailbox::ALL_IRQS;
use chub_ipc::map::resolve;
use chub_ipc::{BootMode, DirectIrq, Direction, Map, PeerFlags, SharedReg, Side};

use crate::board::fetch_firmware;
use crate::dump::DumpReason;
use crate::link::ChubLink;
use crate::state::LinkState;
use crate::stats::Stat;
use crate::sync::{lock, Wait};
use crate::{ChubError, Result};

/// How often shutdown re-checks the CPU-halted bit
const HALT_POLL: Duration = Duration::from_millis(2);

impl ChubLink {
    /// Download firmware, release the core and wait for it to answer
    ///
    /// # Errors
    /// - `InvalidState` unless the link is `NO_POWER`
    /// - `Firmware` / `IncompatibleFirmware` / `BadLayout` if the images are
    ///   missing or unusable; the link stays `NO_POWER`
    /// - `NoResponse` if the handshake fails; the link is `NO_RESPONSE`
    pub fn power_on(&self) -> Result<()> {
        let _seq = lock(&self.seq_lock);
        self.require("power_on", &[LinkState::NoPower])?;
        let map = self.download()?;
        self.start_core(map, BootMode::Cold)
    }

    /// Ping the CHUB up to `retries` times, waiting `timeout` for each answer
    ///
    /// Success moves the link to `RUN`; running out of attempts moves it to
    /// `NO_RESPONSE`. With `retries == 0` nothing is sent and the check
    /// fails at once.
    pub fn alive_handshake(&self, retries: u32, timeout: Duration) -> Result<()> {
        let _seq = lock(&self.seq_lock);
        self.require(
            "alive_handshake",
            &[LinkState::PowerOn, LinkState::Run, LinkState::NoResponse],
        )?;
        self.handshake(retries, timeout)
    }

    /// Ask the CHUB to stop, then hold it in reset
    ///
    /// A core that does not halt within the grace period is dumped and then
    /// held in reset anyway.
    pub fn shutdown(&self) -> Result<()> {
        let _seq = lock(&self.seq_lock);
        self.require("shutdown", &[LinkState::Run, LinkState::NoResponse])?;
        self.quiesce()
    }

    /// Restart a shut-down core and re-run the handshake
    ///
    /// `core_only` restarts just the core and keeps the resident image (warm
    /// boot); otherwise the whole subsystem is reset and the firmware
    /// downloaded again (cold boot).
    pub fn reset(&self, core_only: bool) -> Result<()> {
        let _seq = lock(&self.seq_lock);
        self.require("reset", &[LinkState::Shutdown])?;

        // The old map stays valid until the board has actually reset
        let (map, mode) = if core_only {
            self.board.reset_core()?;
            self.set_map(None);
            (resolve(&*self.sram)?, BootMode::Warm)
        } else {
            self.board.reset_system()?;
            self.set_map(None);
            (self.download()?, BootMode::Cold)
        };
        log::info!(
            "chub: {} reset, restarting",
            if core_only { "core" } else { "system" }
        );
        self.start_core(map, mode)
    }

    /// Write both images into SRAM and resolve the map they describe
    ///
    /// Everything in the two image regions past the end of each image is
    /// zeroed, so SRAM ends up the same whichever source the bytes came from.
    fn download(&self) -> Result<Map> {
        let fw = &self.config.firmware;
        let bootloader = fetch_firmware(&*self.board, fw, &fw.bootloader)?;
        let os = fetch_firmware(&*self.board, fw, &fw.os)?;

        if bootloader.len() > self.sram.size() {
            return Err(too_big(&fw.bootloader, bootloader.len(), self.sram.size()));
        }
        self.sram.write_bytes(0, &bootloader);
        let map = resolve(&*self.sram)?;

        if bootloader.len() > map.bootloader.end {
            return Err(too_big(&fw.bootloader, bootloader.len(), map.bootloader.end));
        }
        if os.len() > map.os.len() {
            return Err(too_big(&fw.os, os.len(), map.os.len()));
        }
        self.sram
            .zero(bootloader.len(), map.bootloader.end - bootloader.len());
        self.sram.write_bytes(map.os.start, &os);
        self.sram
            .zero(map.os.start + os.len(), map.os.len() - os.len());

        log::info!(
            "chub: downloaded {} ({} bytes) and {} ({} bytes)",
            fw.bootloader,
            bootloader.len(),
            fw.os,
            os.len()
        );
        Ok(map)
    }

    /// Reinitialise IPC, publish boot parameters, release reset, handshake
    fn start_core(&self, map: Map, mode: BootMode) -> Result<()> {
        map.reset_ipc(&*self.sram);
        lock(&self.fw_log).clear_partial();
        map.write_boot_params(&*self.sram, mode, self.config.boot.chub_clk_hz);
        self.mailbox
            .write_shared_register(SharedReg::BootMode, mode as u32);
        map.write_flags(&*self.sram, Side::Ap, PeerFlags::READY);
        self.set_map(Some(map));

        self.mailbox.clear_pending_mask(ALL_IRQS);
        self.mailbox.unmask_all();

        self.board.release_reset()?;
        self.state.set(LinkState::PowerOn);
        self.handshake(self.config.boot.alive_retries, self.config.alive_timeout())
    }

    pub(crate) fn handshake(&self, retries: u32, timeout: Duration) -> Result<()> {
        let epoch = self.cancel.token();
        for attempt in 1..=retries {
            let seen = self.alive.count();
            self.mailbox.generate_interrupt(DirectIrq::Alive.irq());
            match self.alive.wait_since(seen, timeout, &self.cancel, epoch) {
                Wait::Signalled => {
                    self.state.set(LinkState::Run);
                    log::info!("chub: alive after {} attempt(s)", attempt);
                    return Ok(());
                }
                Wait::TimedOut => {
                    log::warn!("chub: alive attempt {}/{} timed out", attempt, retries)
                }
                Wait::Cancelled => {
                    self.state.set(LinkState::NoResponse);
                    return Err(ChubError::Interrupted);
                }
            }
        }

        self.stats.bump(Stat::AliveFailures);
        self.state.set(LinkState::NoResponse);
        log::error!("chub: no answer to {} alive ping(s)", retries);
        Err(ChubError::NoResponse { attempts: retries })
    }

    fn quiesce(&self) -> Result<()> {
        let grace = self.config.shutdown_grace();
        let epoch = self.cancel.token();
        let deadline = Instant::now() + grace;

        self.mailbox.generate_interrupt(DirectIrq::Shutdown.irq());
        let halted = loop {
            let seen = self.shutdown_ack.count();
            if self.board.cpu_halted() {
                break true;
            }
            let now = Instant::now();
            if now >= deadline {
                break false;
            }
            let slice = (deadline - now).min(HALT_POLL);
            if self.shutdown_ack.wait_since(seen, slice, &self.cancel, epoch) == Wait::Cancelled {
                break self.board.cpu_halted();
            }
        };

        if !halted {
            log::warn!(
                "chub: core still running {} ms after shutdown request, forcing reset",
                grace.as_millis()
            );
            if let Err(e) = self.dump(DumpReason::ShutdownTimeout) {
                log::warn!("chub: shutdown dump failed: {}", e);
            }
        }

        self.board.assert_reset()?;
        self.mailbox.mask_all();
        self.state.set(LinkState::Shutdown);

        // Core is held, nothing races the channel words now
        if let Some(map) = self.map() {
            let stale = self.pending_slots();
            if stale > 0 {
                log::warn!("chub: discarding {} undelivered packet(s)", stale);
                for dir in Direction::ALL {
                    map.channel(&*self.sram, dir).reset();
                }
            }
        }
        log::info!(
            "chub: shut down ({})",
            if halted { "graceful" } else { "forced" }
        );
        Ok(())
    }
}

fn too_big(name: &str, len: usize, room: usize) -> ChubError {
    ChubError::Firmware {
        name: name.to_string(),
        reason: format!("{} bytes do not fit in {} bytes", len, room),
    }
}
