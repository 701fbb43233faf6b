//! Shared fixtures for the driver integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chub_driver::{ChubConfig, ChubLink, Restart, SimBoard, SimBoardConfig};
use chub_sim::SimHardware;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Defaults scaled down so failure paths finish quickly
pub fn fast_config() -> ChubConfig {
    let mut cfg = ChubConfig::default();
    cfg.boot.alive_retries = 3;
    cfg.boot.alive_timeout_ms = 100;
    cfg.boot.shutdown_grace_ms = 100;
    cfg.transport.wake_timeout_ms = 500;
    cfg.transport.read_timeout_ms = 1000;
    cfg
}

/// Restart hook that only records what it was asked
#[derive(Debug, Default)]
pub struct RecordingRestart {
    reasons: Mutex<Vec<String>>,
}

impl RecordingRestart {
    pub fn reasons(&self) -> Vec<String> {
        self.reasons.lock().unwrap().clone()
    }
}

impl Restart for RecordingRestart {
    fn restart(&self, reason: &str) {
        self.reasons.lock().unwrap().push(reason.to_string());
    }
}

pub struct Rig {
    pub link: Arc<ChubLink>,
    pub hw: Arc<SimHardware>,
    pub restart: Arc<RecordingRestart>,
}

pub fn board(board_cfg: SimBoardConfig) -> Arc<SimBoard> {
    Arc::new(SimBoard::new(board_cfg).unwrap())
}

/// Link on a fresh simulated board, not powered
pub fn rig_with(cfg: ChubConfig, board_cfg: SimBoardConfig) -> Rig {
    init_logging();
    let board = board(board_cfg);
    let hw = board.hardware().clone();
    let restart = Arc::new(RecordingRestart::default());
    let link = ChubLink::new(board, cfg, restart.clone()).unwrap();
    Rig { link, hw, restart }
}

pub fn rig(cfg: ChubConfig) -> Rig {
    rig_with(cfg, SimBoardConfig::default())
}

/// Link already in `RUN`
pub fn booted(cfg: ChubConfig) -> Rig {
    let rig = rig(cfg);
    rig.link.power_on().unwrap();
    rig
}

/// Poll `cond` for up to `timeout`
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Scratch directory unique to one test
pub fn scratch_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("chub-driver-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
