//! Upstream interface: `write`, `read` and `write_event`
//!
//! Every AP->CHUB transaction runs under a wake guard and the tx lock, so
//! the CHUB is awake and there is exactly one AP producer while it runs.

use std::time::{Duration, Instant};

use chub_ipc::utc::{self, UtcCommand};
use chub_ipc::{Direction, EventId, IpcError, Map, SharedReg, Side, EVT_QUEUE_LEN, PACKET_SIZE_MAX};

use crate::dump::DumpReason;
use crate::link::ChubLink;
use crate::state::LinkState;
use crate::sync::{lock, Wait};
use crate::worker::WorkItem;
use crate::{ChubError, Result};

/// Longest a blocked reader sleeps before re-checking the channel
const RX_POLL: Duration = Duration::from_millis(10);

/// Out-of-band requests from the client driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkCommand {
    /// Unmask the AP mailbox interrupts
    EnableIrq,
    /// Mask the AP mailbox interrupts
    DisableIrq,
    /// Run the alive handshake; a failure escalates to dump and reset
    ChubAlive,
    /// Log the link status report
    DumpStatus,
    /// Ask the firmware to flush its log, then drain it
    FlushLog,
    Shutdown,
    /// Zero the shared scratch region
    EraseShared,
}

impl ChubLink {
    /// Send one payload to the CHUB; returns the bytes sent
    ///
    /// # Errors
    /// - `PayloadTooLarge` past `PACKET_SIZE_MAX`
    /// - `InvalidState` unless `RUN`
    /// - `WakeTimeout` / `Interrupted` from the wake request
    /// - `NoFreeSlot` / `QueueFull` while the CHUB is behind
    pub fn write(&self, payload: &[u8]) -> Result<usize> {
        if payload.len() > PACKET_SIZE_MAX {
            return Err(IpcError::PayloadTooLarge {
                len: payload.len(),
                max: PACKET_SIZE_MAX,
            }
            .into());
        }
        self.transact("write", |map| {
            let queue = map.evtq(&*self.sram, Direction::ApToChub);
            if queue.is_full() {
                return Err(IpcError::QueueFull {
                    capacity: EVT_QUEUE_LEN,
                }
                .into());
            }
            let channel = map.channel(&*self.sram, Direction::ApToChub);
            let (slot, seq) = channel.write(Side::Ap, payload)?;
            let event = EventId::data(slot).ok_or(IpcError::ProtocolViolation {
                slot,
                raw: channel.raw_status(slot),
            })?;
            queue.enqueue(event, &self.mailbox)?;
            log::trace!("chub: tx {} bytes slot {} seq {}", payload.len(), slot, seq);
            Ok(payload.len())
        })
    }

    /// Wait up to `timeout` for a payload from the CHUB
    ///
    /// Copies the oldest pending payload into `buf` and returns its length.
    ///
    /// # Errors
    /// - `BufferTooSmall` if `buf` cannot hold `PACKET_SIZE_MAX` bytes
    /// - `ReadTimeout` if nothing arrives in time
    /// - `Interrupted` if `interrupt_waiters` runs while waiting
    pub fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if buf.len() < PACKET_SIZE_MAX {
            return Err(ChubError::BufferTooSmall {
                len: buf.len(),
                need: PACKET_SIZE_MAX,
            });
        }
        let res = self.receive(buf, timeout);
        self.track(&res);
        res
    }

    fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let _rx = lock(&self.rx_lock);
        let epoch = self.cancel.token();
        let deadline = Instant::now() + timeout;
        loop {
            self.require("read", &[LinkState::Run])?;
            let seen = self.rx.count();
            let map = self.current_map()?;
            let taken = map
                .channel(&*self.sram, Direction::ChubToAp)
                .read(Side::Ap)?;
            if let Some(packet) = taken {
                let len = packet.payload.len();
                buf[..len].copy_from_slice(&packet.payload);
                log::trace!("chub: rx {} bytes slot {} seq {}", len, packet.slot, packet.seq);
                return Ok(len);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ChubError::ReadTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            let slice = (deadline - now).min(RX_POLL);
            if self.rx.wait_since(seen, slice, &self.cancel, epoch) == Wait::Cancelled {
                return Err(ChubError::Interrupted);
            }
        }
    }

    pub fn write_event(&self, cmd: LinkCommand) -> Result<()> {
        log::debug!("chub: command {:?}", cmd);
        match cmd {
            LinkCommand::EnableIrq => {
                self.mailbox.unmask_all();
                Ok(())
            }
            LinkCommand::DisableIrq => {
                self.mailbox.mask_all();
                Ok(())
            }
            LinkCommand::ChubAlive => {
                let res =
                    self.alive_handshake(self.config.boot.alive_retries, self.config.alive_timeout());
                if let Err(ChubError::NoResponse { .. }) = &res {
                    self.post(WorkItem::Recover(DumpReason::AliveFailure));
                }
                res
            }
            LinkCommand::DumpStatus => {
                for line in self.status_report().lines() {
                    log::info!("chub status: {}", line);
                }
                Ok(())
            }
            LinkCommand::FlushLog => {
                self.transact("flush_log", |map| {
                    map.evtq(&*self.sram, Direction::ApToChub)
                        .enqueue(EventId::LogRequest, &self.mailbox)?;
                    Ok(())
                })?;
                self.flush_firmware_log();
                Ok(())
            }
            LinkCommand::Shutdown => self.shutdown(),
            LinkCommand::EraseShared => {
                self.require("erase_shared", &[LinkState::Run, LinkState::Shutdown])?;
                let map = self.current_map()?;
                self.sram.zero(map.shared.start, map.shared.len());
                log::info!("chub: shared region erased ({} bytes)", map.shared.len());
                Ok(())
            }
        }
    }

    /// Ask the firmware to run diagnostic `id`
    pub fn debug_action(&self, id: u32) -> Result<&'static UtcCommand> {
        let cmd = utc::lookup(id)
            .ok_or_else(|| ChubError::InvalidArgument(format!("unknown diagnostic {}", id)))?;
        self.transact("debug_action", |map| {
            self.mailbox
                .write_shared_register(SharedReg::DebugAction, cmd.id);
            map.evtq(&*self.sram, Direction::ApToChub)
                .enqueue(EventId::DebugAction, &self.mailbox)?;
            Ok(())
        })?;
        log::info!("chub: diagnostic {} ({}) requested", cmd.name, cmd.id);
        Ok(cmd)
    }

    /// 64-bit value the firmware last left in the debug registers
    pub fn debug_value(&self) -> u64 {
        self.mailbox.read_debug_value()
    }

    /// Run `op` against the map while the CHUB is held awake and tx is ours
    fn transact<T>(&self, name: &'static str, op: impl FnOnce(&Map) -> Result<T>) -> Result<T> {
        let res = (|| {
            self.require(name, &[LinkState::Run])?;
            let _awake = self.wake.request(self.config.wake_timeout())?;
            let _tx = lock(&self.tx_lock);
            let map = self.current_map()?;
            op(&map)
        })();
        self.track(&res);
        res
    }

    /// Forward everything in the firmware log ring
    pub(crate) fn flush_firmware_log(&self) {
        let Some(map) = self.map() else { return };
        let ring = map.log_ring(&*self.sram);
        let mut log = lock(&self.fw_log);
        let mut text = Vec::new();
        match ring.drain(&mut text) {
            Ok(_) => log.absorb(&text, ring.lost()),
            Err(e) => log::error!("chub: firmware log ring unusable: {}", e),
        }
    }
}
