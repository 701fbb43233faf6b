//! The link context
//!
//! [`ChubLink`] owns everything one ContextHub instance needs: the board,
//! the mailbox accessor, the resolved map, the state machine, the wake
//! coordinator, the wait signals and the deferred worker. Operations are
//! split across `boot`, `transport`, `irq`, `worker` and `dump`, each adding
//! an `impl ChubLink` block.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, JoinHandle};

use chub_ipc::{Direction, IoMem, Mailbox, Map, PeerFlags, Side};
use crossbeam::channel::{unbounded, Sender};

use crate::board::{Board, Restart};
use crate::config::ChubConfig;
use crate::dump::DumpReason;
use crate::fwlog::FirmwareLog;
use crate::state::{LinkState, StateCell};
use crate::stats::{ErrorStats, Stat, StatsSnapshot};
use crate::sync::{lock, Cancel, Signal};
use crate::wake::{WakeCoordinator, WakeLine};
use crate::worker::{self, WorkItem};
use crate::{ChubError, Result};

type SharedMap = Arc<RwLock<Option<Map>>>;

fn read_map(map: &RwLock<Option<Map>>) -> RwLockReadGuard<'_, Option<Map>> {
    map.read().unwrap_or_else(PoisonError::into_inner)
}

/// Wake GPIO plus the CHUB's AWAKE flag in the IPC header
struct LinkWakeLine {
    board: Arc<dyn Board>,
    sram: Arc<dyn IoMem>,
    map: SharedMap,
}

impl WakeLine for LinkWakeLine {
    fn set(&self, asserted: bool) {
        self.board.set_wake_line(asserted);
    }

    fn peer_awake(&self) -> bool {
        match *read_map(&self.map) {
            Some(map) => map
                .read_flags(&*self.sram, Side::Chub)
                .contains(PeerFlags::AWAKE),
            None => false,
        }
    }
}

pub struct ChubLink {
    pub(crate) board: Arc<dyn Board>,
    pub(crate) restart: Arc<dyn Restart>,
    pub(crate) config: ChubConfig,
    pub(crate) sram: Arc<dyn IoMem>,
    pub(crate) mailbox: Mailbox,
    map: SharedMap,
    pub(crate) state: StateCell,

    /// Serializes power_on, handshake, shutdown and reset
    pub(crate) seq_lock: Mutex<()>,
    /// Single AP producer on the AP->CHUB queue and channel
    pub(crate) tx_lock: Mutex<()>,
    pub(crate) rx_lock: Mutex<()>,
    /// Single AP consumer on the CHUB->AP queue
    pub(crate) evtq_lock: Mutex<()>,
    pub(crate) dump_lock: Mutex<()>,

    pub(crate) alive: Signal,
    pub(crate) shutdown_ack: Signal,
    pub(crate) rx: Signal,
    pub(crate) cancel: Cancel,
    pub(crate) wake: Arc<WakeCoordinator>,

    pub(crate) stats: ErrorStats,
    pub(crate) transient: AtomicU32,
    pub(crate) failed_recoveries: AtomicU32,
    pub(crate) recovery_pending: AtomicBool,
    pub(crate) dump_seq: AtomicU32,
    pub(crate) fw_log: Mutex<FirmwareLog>,

    work: Sender<WorkItem>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ChubLink {
    /// Build the link, start its worker and hook the mailbox interrupt
    ///
    /// The core is left alone; call [`ChubLink::power_on`] to boot it.
    pub fn new(
        board: Arc<dyn Board>,
        config: ChubConfig,
        restart: Arc<dyn Restart>,
    ) -> Result<Arc<Self>> {
        let sram = board.sram();
        let mailbox = Mailbox::new(board.mailbox_regs(), Side::Ap);
        let map: SharedMap = Arc::new(RwLock::new(None));
        let wake = WakeCoordinator::new(Arc::new(LinkWakeLine {
            board: board.clone(),
            sram: sram.clone(),
            map: map.clone(),
        }));
        let (work, inbox) = unbounded();

        let link = Arc::new(Self {
            board,
            restart,
            config,
            sram,
            mailbox,
            map,
            state: StateCell::new(LinkState::NoPower),
            seq_lock: Mutex::new(()),
            tx_lock: Mutex::new(()),
            rx_lock: Mutex::new(()),
            evtq_lock: Mutex::new(()),
            dump_lock: Mutex::new(()),
            alive: Signal::default(),
            shutdown_ack: Signal::default(),
            rx: Signal::default(),
            cancel: Cancel::default(),
            wake,
            stats: ErrorStats::default(),
            transient: AtomicU32::new(0),
            failed_recoveries: AtomicU32::new(0),
            recovery_pending: AtomicBool::new(false),
            dump_seq: AtomicU32::new(0),
            fw_log: Mutex::new(FirmwareLog::default()),
            work,
            worker: Mutex::new(None),
        });

        let handle = worker::spawn(Arc::downgrade(&link), inbox)?;
        *lock(&link.worker) = Some(handle);

        let weak = Arc::downgrade(&link);
        link.board.attach_irq(Arc::new(move || {
            if let Some(link) = weak.upgrade() {
                link.handle_irq();
            }
        }));

        log::info!(
            "chub: link created on board {} ({}KB SRAM)",
            link.board.name(),
            link.sram.size() / 1024
        );
        Ok(link)
    }

    pub fn state(&self) -> LinkState {
        self.state.get()
    }

    /// Resolved map, `None` before the first download or during a reset
    pub fn map(&self) -> Option<Map> {
        *read_map(&self.map)
    }

    pub fn config(&self) -> &ChubConfig {
        &self.config
    }

    pub fn board(&self) -> &Arc<dyn Board> {
        &self.board
    }

    pub fn wake(&self) -> &Arc<WakeCoordinator> {
        &self.wake
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Data-channel slots not idle, both directions together
    pub fn pending_slots(&self) -> usize {
        let Some(map) = self.map() else { return 0 };
        Direction::ALL
            .iter()
            .map(|&dir| map.channel(&*self.sram, dir).busy_slots())
            .sum()
    }

    /// Last lines forwarded from the firmware log, oldest first
    pub fn recent_firmware_log(&self) -> Vec<String> {
        lock(&self.fw_log).recent()
    }

    /// Fail every blocked `read`, wake request and handshake with `Interrupted`
    pub fn interrupt_waiters(&self) {
        self.cancel.cancel();
        self.alive.kick();
        self.shutdown_ack.kick();
        self.rx.kick();
        self.wake.interrupt_all();
    }

    /// Human-readable summary used by `dump_status`
    pub fn status_report(&self) -> String {
        let mut out = format!("state: {}\n", self.state());
        match self.map() {
            Some(map) => {
                out += &format!(
                    "map: os {:#x}-{:#x} ipc {:#x}-{:#x} shared {:#x}-{:#x} dump {:#x}-{:#x}\n",
                    map.os.start,
                    map.os.end,
                    map.ipc.start,
                    map.ipc.end,
                    map.shared.start,
                    map.shared.end,
                    map.dump.start,
                    map.dump.end
                );
                for dir in Direction::ALL {
                    let queued = map.evtq(&*self.sram, dir).len().unwrap_or(0);
                    let busy = map.channel(&*self.sram, dir).busy_slots();
                    out += &format!("{}: {} slots busy, {} events queued\n", dir.label(), busy, queued);
                }
            }
            None => out += "map: unresolved\n",
        }
        out += &format!(
            "wake: requested {} priority {} acquired {} line {}\n",
            self.wake.requested(),
            self.wake.priority_held(),
            self.wake.is_acquired(),
            if self.wake.line_asserted() { "asserted" } else { "released" }
        );
        out += &self.stats().to_string();
        out
    }

    pub(crate) fn current_map(&self) -> Result<Map> {
        self.map().ok_or(ChubError::NotConfigured {
            what: "shared memory map",
        })
    }

    pub(crate) fn set_map(&self, map: Option<Map>) {
        let mut slot: RwLockWriteGuard<'_, Option<Map>> =
            self.map.write().unwrap_or_else(PoisonError::into_inner);
        *slot = map;
    }

    /// Current state if it is one of `allowed`
    pub(crate) fn require(&self, op: &'static str, allowed: &[LinkState]) -> Result<LinkState> {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(state)
        } else {
            Err(ChubError::InvalidState { op, state })
        }
    }

    pub(crate) fn post(&self, item: WorkItem) {
        if self.work.send(item).is_err() {
            log::warn!("chub: worker is gone, deferred work dropped");
        }
    }

    /// Queue a recovery unless one is already queued or running
    pub(crate) fn request_recovery(&self, reason: DumpReason) {
        if self
            .recovery_pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::debug!("chub: {} recovery already pending", reason);
            return;
        }
        self.post(WorkItem::Recover(reason));
    }

    /// Account for the outcome of a transport operation
    ///
    /// Consecutive transient failures and any protocol violation are
    /// escalated to the worker as a recovery.
    pub(crate) fn track<T>(&self, res: &Result<T>) {
        let err = match res {
            Ok(_) => {
                self.transient.store(0, Ordering::Release);
                return;
            }
            Err(e) => e,
        };

        if err.is_protocol_violation() {
            self.stats.bump(Stat::ProtocolErrors);
            log::error!("chub: protocol violation: {}", err);
            self.request_recovery(DumpReason::ProtocolError);
            return;
        }
        if !err.is_transient() {
            return;
        }

        self.stats.bump(match err {
            ChubError::WakeTimeout { .. } => Stat::WakeTimeouts,
            ChubError::Ipc(chub_ipc::IpcError::NoFreeSlot) => Stat::NoFreeSlot,
            _ => Stat::QueueFull,
        });
        let run = self.transient.fetch_add(1, Ordering::AcqRel) + 1;
        log::warn!("chub: {} ({} in a row)", err, run);

        let limit = self.config.recovery.escalate_after;
        if limit > 0 && run >= limit {
            self.transient.store(0, Ordering::Release);
            log::error!("chub: {} consecutive transient failures, escalating", run);
            self.request_recovery(DumpReason::TransientExhausted);
        }
    }
}

impl Drop for ChubLink {
    fn drop(&mut self) {
        self.board.detach_irq();
        let _ = self.work.send(WorkItem::Stop);
        let handle = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            // The worker itself may hold the last reference
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        log::debug!("chub: link dropped in state {}", self.state.get());
    }
}
