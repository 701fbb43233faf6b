//! Debug attributes against the simulated board

#![cfg(feature = "sim")]

mod common;

use std::time::Duration;

use chub_driver::{errno, DebugFs, DumpReason, DumpView, SimBoardConfig, Stat};
use chub_ipc::utc::UTC_RTC;

use common::*;

fn attrs() -> (Rig, DebugFs) {
    let rig = booted(fast_config());
    let fs = DebugFs::new(rig.link.clone());
    (rig, fs)
}

#[test]
fn test_attribute_sets() {
    let (_rig, fs) = attrs();
    assert_eq!(
        fs.text_attributes(),
        &["get_gpr", "dump_status", "dump_hw", "utc", "ipc_test", "wakeup"]
    );
    assert_eq!(fs.bin_attributes(), &["sram", "dump"]);
}

#[test]
fn test_no_dump_memory() {
    let rig = rig_with(
        fast_config(),
        SimBoardConfig {
            dump_size: 0,
            ..Default::default()
        },
    );
    rig.link.power_on().unwrap();
    let fs = DebugFs::new(rig.link.clone());

    assert_eq!(fs.bin_attributes(), &["sram"]);
    assert_eq!(fs.write("dump_hw", b"1"), -errno::ENODEV as isize);
    let mut buf = [0u8; 64];
    assert!(fs.read_bin("dump", 0, &mut buf).is_err());
    assert_eq!(rig.link.stats().get(Stat::Dumps), 0);
}

#[test]
fn test_get_gpr_lists_every_register() {
    let (_rig, fs) = attrs();
    let text = fs.show("get_gpr").unwrap();
    let lines: Vec<_> = text.lines().collect();

    assert_eq!(lines.len(), 17);
    assert!(lines[0].starts_with("R0: 0x"));
    assert!(lines[15].starts_with("PC: 0x"));
    assert!(lines[16].starts_with("PSR: 0x"));
    assert_eq!(fs.write("get_gpr", b"0"), -errno::EINVAL as isize);
}

#[test]
fn test_utc_list_and_run() {
    let (rig, fs) = attrs();
    let list = fs.show("utc").unwrap();
    assert!(list.starts_with(" 0 stop\n"));
    assert!(list.contains(" 3 rtc\n"));
    assert!(list.contains("16 dfs\n"));

    assert_eq!(fs.write("utc", b"3\n"), 2);
    assert!(wait_for(Duration::from_secs(2), || rig.hw.journal().utc_runs() == vec![UTC_RTC]));

    assert_eq!(fs.write("utc", b"99"), -errno::EINVAL as isize);
    assert_eq!(fs.write("utc", b"abc"), -errno::EINVAL as isize);
    assert_eq!(rig.hw.journal().utc_runs().len(), 1);
}

#[test]
fn test_ipc_test_round_trip() {
    let (_rig, fs) = attrs();
    assert_eq!(fs.show("ipc_test").unwrap(), "no test run\n");

    assert_eq!(fs.write("ipc_test", b"loopback\n"), 9);
    assert_eq!(fs.show("ipc_test").unwrap(), "ok: 8 bytes\n");
}

#[test]
fn test_ipc_test_without_echo_times_out() {
    let mut cfg = fast_config();
    cfg.transport.read_timeout_ms = 50;
    let rig = booted(cfg);
    rig.hw.behavior().set_echo(false);
    let fs = DebugFs::new(rig.link.clone());

    assert_eq!(fs.write("ipc_test", b"lost"), -errno::ETIMEDOUT as isize);
}

#[test]
fn test_manual_wakeup_drives_line() {
    let (rig, fs) = attrs();
    assert_eq!(fs.show("wakeup").unwrap(), "0\n");

    assert_eq!(fs.write("wakeup", b"1\n"), 2);
    assert!(rig.hw.wake_line());
    assert_eq!(fs.show("wakeup").unwrap(), "1\n");

    // Traffic still flows while the hold is in place
    assert_eq!(fs.write("ipc_test", b"held"), 4);

    assert_eq!(fs.write("wakeup", b"0"), 1);
    assert!(!rig.hw.wake_line());
    assert_eq!(fs.show("wakeup").unwrap(), "0\n");
    assert_eq!(fs.write("wakeup", b"2"), -errno::EINVAL as isize);
}

#[test]
fn test_dump_hw_then_read_back() {
    let (rig, fs) = attrs();
    assert_eq!(fs.write("dump_hw", b"1"), 1);

    let mut raw = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = fs.read_bin("dump", raw.len(), &mut chunk).unwrap();
        if n == 0 {
            break;
        }
        raw.extend_from_slice(&chunk[..n]);
    }

    let view = DumpView::parse(&raw).expect("valid dump");
    assert_eq!(view.reason(), Some(DumpReason::Manual));
    let sram = view.sram().unwrap();
    assert_eq!(sram.len(), rig.hw.config().sram_size);
    assert_eq!(rig.link.stats().get(Stat::Dumps), 1);
}

#[test]
fn test_sram_window() {
    let (rig, fs) = attrs();
    let size = rig.hw.config().sram_size;
    let mut buf = [0u8; 64];

    assert_eq!(fs.read_bin("sram", 0, &mut buf).unwrap(), 64);
    assert_eq!(fs.read_bin("sram", size - 16, &mut buf).unwrap(), 16);
    assert_eq!(fs.read_bin("sram", size, &mut buf).unwrap(), 0);
    assert!(fs.read_bin("flash", 0, &mut buf).is_err());
}

#[test]
fn test_dump_status() {
    let (_rig, fs) = attrs();
    let report = fs.show("dump_status").unwrap();
    assert!(report.starts_with("state: RUN\n"));
    assert!(report.contains("wake: requested 0"));
    assert_eq!(fs.write("dump_status", b"1"), 1);
    assert!(fs.show("dump_hw").is_err());
    assert!(fs.show("nope").is_err());
}
