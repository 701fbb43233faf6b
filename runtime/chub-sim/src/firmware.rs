//! Minimal CHUB firmware
//!
//! Runs on its own thread and speaks the firmware half of the protocol:
//! answers alive pings, tracks the wake line, drains the AP->CHUB queue,
//! echoes payloads, runs diagnostics, writes log text and halts on shutdown.
//! Everything it sends goes through the firmware-side retrying enqueue.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use chub_ipc::event::EVT_IRQ_MASK;
use chub_ipc::evtq::Event;
use chub_ipc::gpr::{GPR_COUNT, GPR_PC};
use chub_ipc::map::resolve;
use chub_ipc::utc::{self, UTC_ASSERT, UTC_CHECK_STATUS, UTC_FAULT, UTC_HANG};
use chub_ipc::{
    BootMode, DirectIrq, Direction, EventId, IoMem, IpcError, Mailbox, Map, PeerFlags, SharedMem,
    SharedReg, Side,
};
use crossbeam::channel::{select, Receiver, Sender};

use crate::image;

const ENQUEUE_RETRIES: u32 = 20;
const SLOT_RETRIES: u32 = 50;
const BACKOFF: Duration = Duration::from_millis(1);

/// Requests from the hardware model to the firmware thread
pub(crate) enum FwCommand {
    Release(Sender<()>),
    Hold(Sender<()>),
    WakeLine(bool),
    Send(Vec<u8>),
    Log(String),
    Fault,
    DumpRequest,
    Kick,
    Stop,
}

/// Knobs that make the firmware misbehave
#[derive(Debug)]
pub struct Behavior {
    answer_alive: AtomicBool,
    ignore_pings: AtomicU32,
    quiesce_on_shutdown: AtomicBool,
    answer_wake: AtomicBool,
    drain_events: AtomicBool,
    echo: AtomicBool,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            answer_alive: AtomicBool::new(true),
            ignore_pings: AtomicU32::new(0),
            quiesce_on_shutdown: AtomicBool::new(true),
            answer_wake: AtomicBool::new(true),
            drain_events: AtomicBool::new(true),
            echo: AtomicBool::new(true),
        }
    }
}

impl Behavior {
    /// Acknowledge alive pings at all
    pub fn set_answer_alive(&self, on: bool) {
        self.answer_alive.store(on, Ordering::Release);
    }

    /// Stay silent for the first `n` pings after each boot
    pub fn set_ignore_pings(&self, n: u32) {
        self.ignore_pings.store(n, Ordering::Release);
    }

    /// Halt the CPU when asked to shut down
    pub fn set_quiesce_on_shutdown(&self, on: bool) {
        self.quiesce_on_shutdown.store(on, Ordering::Release);
    }

    /// Report awake when the wake line is asserted
    pub fn set_answer_wake(&self, on: bool) {
        self.answer_wake.store(on, Ordering::Release);
    }

    /// Consume the AP->CHUB event queue
    pub fn set_drain_events(&self, on: bool) {
        self.drain_events.store(on, Ordering::Release);
    }

    /// Send every received payload straight back
    pub fn set_echo(&self, on: bool) {
        self.echo.store(on, Ordering::Release);
    }

    fn get(flag: &AtomicBool) -> bool {
        flag.load(Ordering::Acquire)
    }
}

/// What the firmware saw, for assertions
#[derive(Debug, Default)]
pub struct Journal {
    received: Mutex<Vec<Vec<u8>>>,
    utc_runs: Mutex<Vec<u32>>,
    boots: Mutex<Vec<u32>>,
    pings: AtomicU32,
}

impl Journal {
    /// Payloads received from the AP, oldest first
    pub fn received(&self) -> Vec<Vec<u8>> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Diagnostic ids run, oldest first
    pub fn utc_runs(&self) -> Vec<u32> {
        self.utc_runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Boot mode word seen at every successful boot
    pub fn boots(&self) -> Vec<u32> {
        self.boots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Alive pings observed while running
    pub fn pings(&self) -> u32 {
        self.pings.load(Ordering::Acquire)
    }

    fn push<T>(list: &Mutex<Vec<T>>, item: T) {
        list.lock().unwrap_or_else(PoisonError::into_inner).push(item);
    }
}

/// Core status bits visible to the AP
#[derive(Debug)]
pub(crate) struct CoreStatus {
    pub halted: AtomicBool,
    pub wake_line: AtomicBool,
}

pub(crate) struct Firmware {
    pub sram: Arc<SharedMem>,
    pub gpr: Arc<SharedMem>,
    pub mbox: Mailbox,
    pub status: Arc<CoreStatus>,
    pub behavior: Arc<Behavior>,
    pub journal: Arc<Journal>,
    map: Option<Map>,
    running: bool,
    hung: bool,
    pings_since_boot: u32,
}

impl Firmware {
    pub fn new(
        sram: Arc<SharedMem>,
        gpr: Arc<SharedMem>,
        mbox: Mailbox,
        status: Arc<CoreStatus>,
        behavior: Arc<Behavior>,
        journal: Arc<Journal>,
    ) -> Self {
        Self {
            sram,
            gpr,
            mbox,
            status,
            behavior,
            journal,
            map: None,
            running: false,
            hung: false,
            pings_since_boot: 0,
        }
    }

    fn on_command(&mut self, cmd: FwCommand) {
        match cmd {
            FwCommand::Release(ack) => {
                self.boot();
                let _ = ack.send(());
            }
            FwCommand::Hold(ack) => {
                self.halt();
                let _ = ack.send(());
            }
            FwCommand::WakeLine(level) => self.on_wake_line(level),
            FwCommand::Kick => self.on_interrupt(),
            cmd if !self.running => {
                if !matches!(cmd, FwCommand::Stop) {
                    log::debug!("chub fw: core not running, request dropped");
                }
            }
            FwCommand::Send(payload) => self.send_to_ap(&payload),
            FwCommand::Log(text) => self.log(&text),
            FwCommand::Fault => self.fault("injected"),
            FwCommand::DumpRequest => self.raise(EventId::DumpRequest),
            FwCommand::Stop => {}
        }
    }

    fn boot(&mut self) {
        self.running = false;
        self.hung = false;
        self.map = None;
        self.pings_since_boot = 0;

        let map = match resolve(&*self.sram) {
            Ok(map) => map,
            Err(e) => {
                log::warn!("chub fw: cannot boot, {}", e);
                return;
            }
        };
        if !image::os_present(&*self.sram, &map) {
            log::warn!("chub fw: cannot boot, OS image missing");
            return;
        }

        let mode = map.boot_mode(&*self.sram);
        Journal::push(&self.journal.boots, mode);

        self.mbox.unmask_all();
        self.write_gprs(map.os.start as u32 + 0x200, 0x0100_0000);
        self.status.halted.store(false, Ordering::Release);

        let mut flags = PeerFlags::READY;
        if Behavior::get(&self.status.wake_line) && Behavior::get(&self.behavior.answer_wake) {
            flags |= PeerFlags::AWAKE;
        }
        map.write_flags(&*self.sram, Side::Chub, flags);
        self.map = Some(map);
        self.running = true;

        let kind = if mode == BootMode::Warm as u32 {
            "warm"
        } else {
            "cold"
        };
        self.log(&format!("chub os up ({} boot)", kind));

        // Pings the AP sent before we got here are still latched
        self.on_interrupt();
    }

    fn halt(&mut self) {
        self.running = false;
        self.map = None;
        self.status.halted.store(true, Ordering::Release);
    }

    fn on_wake_line(&mut self, level: bool) {
        if !self.running || self.hung {
            return;
        }
        let Some(map) = self.map else { return };
        let mut flags = map.read_flags(&*self.sram, Side::Chub);
        if level && Behavior::get(&self.behavior.answer_wake) {
            flags.insert(PeerFlags::AWAKE);
            map.write_flags(&*self.sram, Side::Chub, flags);
            self.mbox.generate_interrupt(DirectIrq::Wakeup.irq());
        } else if !level {
            flags.remove(PeerFlags::AWAKE);
            map.write_flags(&*self.sram, Side::Chub, flags);
        }
    }

    fn on_interrupt(&mut self) {
        if !self.running || self.hung {
            return;
        }
        let Some(map) = self.map else { return };

        let pending = self.mbox.read_masked_status();
        let handled = if Behavior::get(&self.behavior.drain_events) {
            pending
        } else {
            pending & !EVT_IRQ_MASK
        };
        self.mbox.clear_pending_mask(handled);

        if handled & DirectIrq::Alive.bit() != 0 {
            self.pings_since_boot += 1;
            self.journal.pings.fetch_add(1, Ordering::AcqRel);
            let ignore = self.behavior.ignore_pings.load(Ordering::Acquire);
            if Behavior::get(&self.behavior.answer_alive) && self.pings_since_boot > ignore {
                self.mbox.generate_interrupt(DirectIrq::Alive.irq());
            }
        }

        if handled & DirectIrq::Wakeup.bit() != 0
            && map.read_flags(&*self.sram, Side::Chub).contains(PeerFlags::AWAKE)
        {
            self.mbox.generate_interrupt(DirectIrq::Wakeup.irq());
        }

        if handled & EVT_IRQ_MASK != 0 {
            self.drain_events(&map);
        }

        if handled & DirectIrq::Shutdown.bit() != 0 {
            self.on_shutdown(&map);
        }
    }

    fn drain_events(&mut self, map: &Map) {
        while self.running && !self.hung {
            let next = map.evtq(&*self.sram, Direction::ApToChub).dequeue();
            match next {
                Ok(Some(event)) => self.on_event(map, event),
                Ok(None) => break,
                Err(e) => {
                    log::error!("chub fw: a2c queue unusable: {}", e);
                    break;
                }
            }
        }
    }

    fn on_event(&mut self, map: &Map, event: Event) {
        match event.id() {
            Some(id) if id.data_slot().is_some() => {
                let slot = id.data_slot().unwrap_or_default();
                let taken = map
                    .channel(&*self.sram, Direction::ApToChub)
                    .read_at(Side::Chub, slot);
                match taken {
                    Ok(Some(packet)) => {
                        Journal::push(&self.journal.received, packet.payload.clone());
                        if Behavior::get(&self.behavior.echo) {
                            self.send_to_ap(&packet.payload);
                        }
                    }
                    Ok(None) => log::debug!("chub fw: data event for idle slot {}", slot),
                    Err(e) => log::error!("chub fw: a2c slot {}: {}", slot, e),
                }
            }
            Some(EventId::LogRequest) => self.log("log flush requested"),
            Some(EventId::DebugAction) => {
                let id = self.mbox.read_shared_register(SharedReg::DebugAction);
                self.run_utc(id);
            }
            _ => log::warn!("chub fw: unexpected event {:#x}", event.raw),
        }
    }

    fn on_shutdown(&mut self, map: &Map) {
        if !Behavior::get(&self.behavior.quiesce_on_shutdown) {
            log::warn!("chub fw: ignoring shutdown request");
            return;
        }
        map.write_flags(&*self.sram, Side::Chub, PeerFlags::empty());
        self.halt();
        self.mbox.generate_interrupt(DirectIrq::Shutdown.irq());
    }

    fn run_utc(&mut self, id: u32) {
        Journal::push(&self.journal.utc_runs, id);
        let Some(cmd) = utc::lookup(id) else {
            log::warn!("chub fw: unknown diagnostic {}", id);
            return;
        };
        match id {
            UTC_ASSERT | UTC_FAULT => self.fault(cmd.name),
            UTC_HANG => {
                self.log("utc hang: core stops servicing the mailbox");
                self.hung = true;
            }
            UTC_CHECK_STATUS => {
                let boots = self.journal.boots().len() as u64;
                self.mbox
                    .write_debug_value((u64::from(self.journal.pings()) << 32) | boots);
                self.log("utc check_status: ok");
            }
            _ => self.log(&format!("utc {}: done", cmd.name)),
        }
    }

    fn fault(&mut self, what: &str) {
        let pc = self
            .map
            .map(|m| m.os.start as u32 + 0x4242)
            .unwrap_or_default();
        self.write_gprs(pc, 0x0100_0003);
        self.log(&format!("fault: {}", what));
        self.raise(EventId::Fault);
    }

    fn write_gprs(&self, pc: u32, psr: u32) {
        let sp = self.map.map(|m| m.ram.end as u32).unwrap_or(0x2000_0000);
        for i in 0..GPR_COUNT {
            let value = match i {
                13 => sp.wrapping_sub(0x100),
                14 => pc.wrapping_sub(0x10),
                GPR_PC => pc,
                16 => psr,
                r => 0xc0de_0000 + r as u32,
            };
            self.gpr.write32(i * 4, value);
        }
    }

    fn log(&mut self, text: &str) {
        let Some(map) = self.map else { return };
        let ring = map.log_ring(&*self.sram);
        let line = format!("{}\n", text);
        if let Err(e) = ring.push(line.as_bytes()) {
            log::error!("chub fw: log ring unusable: {}", e);
            return;
        }
        self.raise(EventId::LogReady);
    }

    fn send_to_ap(&mut self, payload: &[u8]) {
        let Some(map) = self.map else { return };
        let mut tries = 0;
        let slot = loop {
            let written = map
                .channel(&*self.sram, Direction::ChubToAp)
                .write(Side::Chub, payload);
            match written {
                Ok((slot, _)) => break slot,
                Err(IpcError::NoFreeSlot) if tries < SLOT_RETRIES => {
                    tries += 1;
                    thread::sleep(BACKOFF);
                }
                Err(e) => {
                    log::warn!("chub fw: dropping {} byte packet: {}", payload.len(), e);
                    return;
                }
            }
        };
        if let Some(event) = EventId::data(slot) {
            self.raise(event);
        }
    }

    fn raise(&mut self, id: EventId) {
        let Some(map) = self.map else { return };
        let queue = map.evtq(&*self.sram, Direction::ChubToAp);
        if let Err(e) = queue.enqueue_retrying(id, &self.mbox, ENQUEUE_RETRIES, || {
            thread::sleep(BACKOFF)
        }) {
            log::warn!("chub fw: {:?} not delivered: {}", id, e);
        }
    }
}

/// Firmware thread body
pub(crate) fn run(mut fw: Firmware, line: Receiver<()>, ctl: Receiver<FwCommand>) {
    loop {
        select! {
            recv(line) -> msg => {
                if msg.is_err() {
                    break;
                }
                fw.on_interrupt();
            }
            recv(ctl) -> cmd => match cmd {
                Ok(FwCommand::Stop) | Err(_) => break,
                Ok(cmd) => fw.on_command(cmd),
            },
        }
    }
    log::debug!("chub fw: thread exiting");
}
