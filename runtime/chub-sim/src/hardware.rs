//! Co-processor hardware model
//!
//! Owns SRAM, the mailbox block, the dump-GPR block and the power/reset
//! control bits, plus two threads: the firmware core and the AP interrupt
//! line. The core starts held in reset.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chub_ipc::gpr::GPR_BLOCK_SIZE;
use chub_ipc::{IoMem, Mailbox, SharedMem, Side};
use crossbeam::channel::{bounded, select, unbounded, Receiver, Sender};

use crate::firmware::{self, Behavior, CoreStatus, Firmware, FwCommand, Journal};
use crate::mailbox::SimMailbox;
use crate::{Result, SimError};

const CONTROL_TIMEOUT: Duration = Duration::from_secs(2);

/// Handler invoked on the AP interrupt line
pub type IrqHandler = Arc<dyn Fn() + Send + Sync>;

/// Shape of the simulated part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimConfig {
    /// SRAM size in bytes, a multiple of 4KB and at least 64KB
    pub sram_size: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            sram_size: 0x2_0000,
        }
    }
}

/// Simulated ContextHub
pub struct SimHardware {
    config: SimConfig,
    sram: Arc<SharedMem>,
    mailbox: Arc<SimMailbox>,
    gpr: Arc<SharedMem>,
    status: Arc<CoreStatus>,
    behavior: Arc<Behavior>,
    journal: Arc<Journal>,
    handler: Arc<Mutex<Option<IrqHandler>>>,
    reset_held: AtomicBool,
    wake_edges: AtomicU32,
    ctl: Sender<FwCommand>,
    stop_irq: Sender<()>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl SimHardware {
    /// Build the part and start its threads
    pub fn new(config: SimConfig) -> Result<Arc<Self>> {
        if config.sram_size < 0x1_0000 || config.sram_size % 0x1000 != 0 {
            return Err(SimError::BadConfig {
                reason: "sram_size must be a 4KB multiple of at least 64KB",
            });
        }

        let sram = Arc::new(SharedMem::new(config.sram_size));
        let gpr = Arc::new(SharedMem::new(GPR_BLOCK_SIZE));
        let (mailbox, lines) = SimMailbox::new();
        let mailbox = Arc::new(mailbox);
        let status = Arc::new(CoreStatus {
            halted: AtomicBool::new(true),
            wake_line: AtomicBool::new(false),
        });
        let behavior = Arc::new(Behavior::default());
        let journal = Arc::new(Journal::default());
        let handler: Arc<Mutex<Option<IrqHandler>>> = Arc::new(Mutex::new(None));

        let (ctl_tx, ctl_rx) = unbounded();
        let (stop_tx, stop_rx) = bounded(1);

        let fw = Firmware::new(
            sram.clone(),
            gpr.clone(),
            Mailbox::new(mailbox.clone(), Side::Chub),
            status.clone(),
            behavior.clone(),
            journal.clone(),
        );
        let to_chub = lines.to_chub;
        let fw_thread = thread::Builder::new()
            .name("chub-sim-fw".into())
            .spawn(move || firmware::run(fw, to_chub, ctl_rx))?;

        let to_ap = lines.to_ap;
        let irq_handler = handler.clone();
        let irq_thread = thread::Builder::new()
            .name("chub-sim-irq".into())
            .spawn(move || deliver_irqs(to_ap, stop_rx, irq_handler))?;

        log::debug!("chub sim: {}KB SRAM, core held in reset", config.sram_size / 1024);

        Ok(Arc::new(Self {
            config,
            sram,
            mailbox,
            gpr,
            status,
            behavior,
            journal,
            handler,
            reset_held: AtomicBool::new(true),
            wake_edges: AtomicU32::new(0),
            ctl: ctl_tx,
            stop_irq: stop_tx,
            threads: Mutex::new(vec![fw_thread, irq_thread]),
        }))
    }

    pub fn config(&self) -> SimConfig {
        self.config
    }

    pub fn sram(&self) -> Arc<SharedMem> {
        self.sram.clone()
    }

    pub fn mailbox(&self) -> Arc<SimMailbox> {
        self.mailbox.clone()
    }

    pub fn gpr_block(&self) -> Arc<SharedMem> {
        self.gpr.clone()
    }

    pub fn behavior(&self) -> &Behavior {
        &self.behavior
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Install (or remove) the AP interrupt handler
    pub fn set_irq_handler(&self, handler: Option<IrqHandler>) {
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = handler;
    }

    fn control(&self, make: impl FnOnce(Sender<()>) -> FwCommand) -> Result<()> {
        let (ack_tx, ack_rx) = bounded(1);
        self.ctl
            .send(make(ack_tx))
            .map_err(|_| SimError::FirmwareGone)?;
        ack_rx
            .recv_timeout(CONTROL_TIMEOUT)
            .map_err(|_| SimError::ControlTimeout)
    }

    /// Let the core run; returns once the firmware finished booting (or gave up)
    pub fn release_reset(&self) -> Result<()> {
        self.reset_held.store(false, Ordering::Release);
        self.control(FwCommand::Release)
    }

    /// Hold the core in reset; returns once it has stopped
    pub fn assert_reset(&self) -> Result<()> {
        self.reset_held.store(true, Ordering::Release);
        self.control(FwCommand::Hold)
    }

    /// Core-only reset: the core stops, SRAM keeps the resident image
    pub fn reset_core(&self) -> Result<()> {
        self.assert_reset()?;
        self.gpr.zero(0, GPR_BLOCK_SIZE);
        Ok(())
    }

    /// Full system reset: SRAM, mailbox and GPR latches all return to zero
    pub fn reset_system(&self) -> Result<()> {
        self.assert_reset()?;
        self.sram.zero(0, self.sram.size());
        self.mailbox.reset();
        self.gpr.zero(0, GPR_BLOCK_SIZE);
        Ok(())
    }

    pub fn reset_held(&self) -> bool {
        self.reset_held.load(Ordering::Acquire)
    }

    /// CPU-halted status bit
    pub fn cpu_halted(&self) -> bool {
        self.status.halted.load(Ordering::Acquire)
    }

    /// Drive the wake GPIO
    pub fn set_wake_line(&self, asserted: bool) {
        let prev = self.status.wake_line.swap(asserted, Ordering::AcqRel);
        if prev != asserted {
            self.wake_edges.fetch_add(1, Ordering::AcqRel);
        }
        let _ = self.ctl.send(FwCommand::WakeLine(asserted));
    }

    pub fn wake_line(&self) -> bool {
        self.status.wake_line.load(Ordering::Acquire)
    }

    /// Level changes on the wake GPIO since power-up
    pub fn wake_edges(&self) -> u32 {
        self.wake_edges.load(Ordering::Acquire)
    }

    fn post(&self, cmd: FwCommand) {
        if self.ctl.send(cmd).is_err() {
            log::warn!("chub sim: firmware thread is gone");
        }
    }

    /// Have the firmware send `payload` to the AP
    pub fn send_to_ap(&self, payload: &[u8]) {
        self.post(FwCommand::Send(payload.to_vec()));
    }

    /// Have the firmware write a line to its log ring
    pub fn firmware_log(&self, text: &str) {
        self.post(FwCommand::Log(text.to_string()));
    }

    /// Have the firmware report a fault
    pub fn inject_fault(&self) {
        self.post(FwCommand::Fault);
    }

    /// Have the firmware ask the AP for a dump
    pub fn request_dump(&self) {
        self.post(FwCommand::DumpRequest);
    }

    /// Make the firmware re-examine its pending interrupts
    pub fn kick(&self) {
        self.post(FwCommand::Kick);
    }
}

impl Drop for SimHardware {
    fn drop(&mut self) {
        let _ = self.ctl.send(FwCommand::Stop);
        let _ = self.stop_irq.send(());
        let me = thread::current().id();
        let threads = std::mem::take(
            &mut *self.threads.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in threads {
            // The last reference can be released from inside an interrupt handler
            if handle.thread().id() != me {
                let _ = handle.join();
            }
        }
    }
}

fn deliver_irqs(line: Receiver<()>, stop: Receiver<()>, handler: Arc<Mutex<Option<IrqHandler>>>) {
    loop {
        select! {
            recv(line) -> msg => {
                if msg.is_err() {
                    break;
                }
                let current = handler
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                if let Some(handler) = current {
                    handler();
                }
            }
            recv(stop) -> _ => break,
        }
    }
}
