//! Data path, event path and recovery against the simulated board

#![cfg(feature = "sim")]

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chub_driver::{ChubError, DumpReason, LinkCommand, LinkState, Stat};
use chub_ipc::gpr::GPR_PC;
use chub_ipc::utc::{UTC_CHECK_STATUS, UTC_TIMER};
use chub_ipc::{Direction, EventId, IpcError, EVT_QUEUE_LEN, PACKET_SIZE_MAX, SLOT_COUNT};

use common::*;

const SETTLE: Duration = Duration::from_secs(3);

#[test]
fn test_write_then_read_echo() {
    let rig = booted(fast_config());

    assert_eq!(rig.link.write(b"hello chub").unwrap(), 10);
    let mut buf = [0u8; PACKET_SIZE_MAX];
    let n = rig.link.read(&mut buf, Duration::from_secs(1)).unwrap();

    assert_eq!(&buf[..n], b"hello chub");
    assert_eq!(rig.hw.journal().received(), vec![b"hello chub".to_vec()]);
    assert!(wait_for(SETTLE, || !rig.hw.wake_line()));
}

#[test]
fn test_payload_size_limit() {
    let rig = booted(fast_config());
    let full = vec![0x5a; PACKET_SIZE_MAX];

    rig.link.write(&full).unwrap();
    let mut buf = [0u8; PACKET_SIZE_MAX];
    let n = rig.link.read(&mut buf, Duration::from_secs(1)).unwrap();
    assert_eq!(n, PACKET_SIZE_MAX);

    let err = rig.link.write(&[0u8; PACKET_SIZE_MAX + 1]).unwrap_err();
    assert!(matches!(
        err,
        ChubError::Ipc(IpcError::PayloadTooLarge { len: 273, max: 272 })
    ));
    assert_eq!(rig.hw.journal().received().len(), 1);
}

#[test]
fn test_read_buffer_too_small() {
    let rig = booted(fast_config());
    let mut buf = [0u8; 16];
    let err = rig.link.read(&mut buf, Duration::from_millis(10)).unwrap_err();
    assert!(matches!(err, ChubError::BufferTooSmall { len: 16, need: 272 }));
}

#[test]
fn test_read_times_out_without_data() {
    let rig = booted(fast_config());
    rig.hw.behavior().set_echo(false);

    rig.link.write(b"no answer").unwrap();
    let mut buf = [0u8; PACKET_SIZE_MAX];
    let err = rig.link.read(&mut buf, Duration::from_millis(50)).unwrap_err();
    assert!(matches!(err, ChubError::ReadTimeout { timeout_ms: 50 }));
    assert_eq!(rig.link.state(), LinkState::Run);
}

#[test]
fn test_unsolicited_packet_from_chub() {
    let rig = booted(fast_config());
    rig.hw.send_to_ap(b"sensor sample");

    let mut buf = [0u8; PACKET_SIZE_MAX];
    let n = rig.link.read(&mut buf, Duration::from_secs(1)).unwrap();
    assert_eq!(&buf[..n], b"sensor sample");
}

#[test]
fn test_no_free_slot_when_chub_stalls() {
    let rig = booted(fast_config());
    rig.hw.behavior().set_drain_events(false);

    for i in 0..SLOT_COUNT {
        rig.link.write(format!("packet {}", i).as_bytes()).unwrap();
    }
    let err = rig.link.write(b"one too many").unwrap_err();

    assert!(matches!(err, ChubError::Ipc(IpcError::NoFreeSlot)));
    assert!(err.is_transient());
    assert_eq!(rig.link.stats().get(Stat::NoFreeSlot), 1);
    assert_eq!(rig.link.stats().get(Stat::Recoveries), 0);
}

#[test]
fn test_queue_full_then_drained() {
    let mut cfg = fast_config();
    cfg.recovery.escalate_after = 100;
    let rig = booted(cfg);
    rig.hw.behavior().set_drain_events(false);

    for _ in 0..EVT_QUEUE_LEN {
        rig.link.debug_action(UTC_TIMER).unwrap();
    }
    let err = rig.link.debug_action(UTC_TIMER).unwrap_err();
    assert!(matches!(err, ChubError::Ipc(IpcError::QueueFull { capacity: 15 })));
    assert_eq!(rig.link.stats().get(Stat::QueueFull), 1);

    rig.hw.behavior().set_drain_events(true);
    rig.hw.kick();
    assert!(wait_for(SETTLE, || rig.hw.journal().utc_runs().len() == EVT_QUEUE_LEN));
    assert!(rig.hw.journal().utc_runs().iter().all(|&id| id == UTC_TIMER));

    // Space again, and the failure run was reset by the success
    rig.link.debug_action(UTC_TIMER).unwrap();
}

#[test]
fn test_transient_failures_escalate_to_recovery() {
    let mut cfg = fast_config();
    cfg.recovery.escalate_after = 3;
    let rig = booted(cfg);
    rig.hw.behavior().set_drain_events(false);

    for _ in 0..SLOT_COUNT {
        rig.link.write(b"stuck").unwrap();
    }
    for _ in 0..3 {
        assert!(rig.link.write(b"rejected").is_err());
    }

    assert!(wait_for(SETTLE, || {
        rig.hw.journal().boots().len() == 2 && rig.link.state() == LinkState::Run
    }));
    assert_eq!(rig.link.stats().get(Stat::Recoveries), 1);
    let dump = rig.link.last_dump().unwrap().expect("recovery dump");
    assert_eq!(dump.reason(), Some(DumpReason::TransientExhausted));
    assert_eq!(rig.link.pending_slots(), 0);
}

#[test]
fn test_firmware_fault_recovers() {
    let rig = booted(fast_config());
    let os_start = rig.link.map().unwrap().os.start as u32;

    rig.hw.inject_fault();

    assert!(wait_for(SETTLE, || {
        rig.hw.journal().boots().len() == 2 && rig.link.state() == LinkState::Run
    }));
    let stats = rig.link.stats();
    assert_eq!(stats.get(Stat::Faults), 1);
    assert_eq!(stats.get(Stat::Recoveries), 1);

    let dump = rig.link.last_dump().unwrap().expect("fault dump");
    assert_eq!(dump.reason(), Some(DumpReason::Fault));
    assert_eq!(dump.gprs().unwrap()[GPR_PC], os_start + 0x4242);
    assert!(rig.restart.reasons().is_empty());

    // Link works after the recovery
    rig.link.write(b"back").unwrap();
    let mut buf = [0u8; PACKET_SIZE_MAX];
    let n = rig.link.read(&mut buf, Duration::from_secs(1)).unwrap();
    assert_eq!(&buf[..n], b"back");
}

#[test]
fn test_fault_burst_recovers_once() {
    let rig = booted(fast_config());

    for _ in 0..3 {
        rig.hw.inject_fault();
    }

    assert!(wait_for(SETTLE, || {
        rig.hw.journal().boots().len() == 2 && rig.link.state() == LinkState::Run
    }));
    // Let any stray request reach the worker before counting
    thread::sleep(Duration::from_millis(500));
    assert!(rig.link.stats().get(Stat::Faults) >= 1);
    assert_eq!(rig.link.stats().get(Stat::Recoveries), 1);
    assert_eq!(rig.hw.journal().boots().len(), 2);
    assert_eq!(rig.link.state(), LinkState::Run);

    // A later fault is recovered again
    rig.hw.inject_fault();
    assert!(wait_for(SETTLE, || {
        rig.hw.journal().boots().len() == 3 && rig.link.state() == LinkState::Run
    }));
    assert_eq!(rig.link.stats().get(Stat::Recoveries), 2);
}

#[test]
fn test_failed_recoveries_request_restart() {
    let mut cfg = fast_config();
    cfg.recovery.max_failed_recoveries = 2;
    cfg.boot.alive_retries = 2;
    cfg.boot.alive_timeout_ms = 30;
    let rig = booted(cfg);

    rig.hw.behavior().set_answer_alive(false);
    rig.hw.inject_fault();

    assert!(wait_for(Duration::from_secs(5), || !rig.restart.reasons().is_empty()));
    let reasons = rig.restart.reasons();
    assert_eq!(reasons.len(), 1);
    assert!(reasons[0].starts_with("chub recovery failed 2 times"));
    assert_eq!(rig.link.state(), LinkState::NoResponse);
    assert_eq!(rig.link.stats().get(Stat::Recoveries), 2);
}

#[test]
fn test_firmware_log_forwarded() {
    let rig = booted(fast_config());
    rig.hw.firmware_log("accel calibrated");

    assert!(wait_for(SETTLE, || {
        rig.link
            .recent_firmware_log()
            .iter()
            .any(|l| l == "accel calibrated")
    }));
}

#[test]
fn test_event_with_lost_interrupt_is_drained() {
    let rig = booted(fast_config());
    let map = rig.link.map().unwrap();
    let sram = rig.hw.sram();
    let c2a = map.evtq(&*sram, Direction::ChubToAp);
    assert!(wait_for(SETTLE, || c2a.len().unwrap() == 0));

    // Queued without its interrupt, as if the acknowledge swallowed it
    c2a.push(EventId::LogReady).unwrap();
    rig.hw.firmware_log("behind the silent one");

    assert!(wait_for(SETTLE, || c2a.len().unwrap() == 0));
    assert!(wait_for(SETTLE, || {
        rig.link
            .recent_firmware_log()
            .iter()
            .any(|l| l == "behind the silent one")
    }));
    assert_eq!(rig.link.stats().get(Stat::ProtocolErrors), 0);
}

#[test]
fn test_flush_log_command() {
    let rig = booted(fast_config());
    rig.link.write_event(LinkCommand::FlushLog).unwrap();

    assert!(wait_for(SETTLE, || {
        rig.link
            .recent_firmware_log()
            .iter()
            .any(|l| l == "log flush requested")
    }));
}

#[test]
fn test_interrupt_blocked_reader() {
    let rig = booted(fast_config());
    rig.hw.behavior().set_echo(false);

    let link = rig.link.clone();
    let reader = thread::spawn(move || {
        let mut buf = [0u8; PACKET_SIZE_MAX];
        link.read(&mut buf, Duration::from_secs(10))
    });
    thread::sleep(Duration::from_millis(50));
    rig.link.interrupt_waiters();

    let res = reader.join().unwrap();
    assert!(matches!(res, Err(ChubError::Interrupted)));

    // Later waits are not affected
    rig.hw.send_to_ap(b"after");
    let mut buf = [0u8; PACKET_SIZE_MAX];
    let n = rig.link.read(&mut buf, Duration::from_secs(1)).unwrap();
    assert_eq!(&buf[..n], b"after");
}

#[test]
fn test_check_status_debug_value() {
    let rig = booted(fast_config());
    let cmd = rig.link.debug_action(UTC_CHECK_STATUS).unwrap();
    assert_eq!(cmd.name, "check_status");

    // One ping answered, one boot
    let expected = (1u64 << 32) | 1;
    assert!(wait_for(SETTLE, || rig.link.debug_value() == expected));
}

#[test]
fn test_unknown_diagnostic_rejected() {
    let rig = booted(fast_config());
    let err = rig.link.debug_action(99).unwrap_err();
    assert!(matches!(err, ChubError::InvalidArgument(_)));
    assert!(rig.hw.journal().utc_runs().is_empty());
}

#[test]
fn test_erase_shared_region() {
    use chub_ipc::IoMem;

    let rig = booted(fast_config());
    let map = rig.link.map().unwrap();
    let sram = rig.hw.sram();
    sram.write_bytes(map.shared.start, b"scratch");

    rig.link.write_event(LinkCommand::EraseShared).unwrap();
    assert_eq!(sram.to_vec(map.shared.start, 7), vec![0u8; 7]);
}

#[test]
fn test_alive_command_on_running_link() {
    let rig = booted(fast_config());
    rig.link.write_event(LinkCommand::ChubAlive).unwrap();
    assert_eq!(rig.link.state(), LinkState::Run);
    assert_eq!(rig.hw.journal().pings(), 2);
}

#[test]
fn test_concurrent_writers() {
    let mut cfg = fast_config();
    cfg.recovery.escalate_after = 0;
    let rig = booted(cfg);
    rig.hw.behavior().set_echo(false);

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let link: Arc<_> = rig.link.clone();
            thread::spawn(move || {
                for i in 0..10 {
                    let payload = format!("w{} p{}", w, i);
                    loop {
                        match link.write(payload.as_bytes()) {
                            Ok(_) => break,
                            Err(e) if e.is_transient() => {
                                thread::sleep(Duration::from_millis(1))
                            }
                            Err(e) => panic!("write failed: {}", e),
                        }
                    }
                }
            })
        })
        .collect();
    for w in writers {
        w.join().unwrap();
    }

    assert!(wait_for(SETTLE, || rig.hw.journal().received().len() == 40));
    let received = rig.hw.journal().received();
    for w in 0..4 {
        // Per-writer order survives interleaving
        let mine: Vec<_> = received
            .iter()
            .filter(|p| p.starts_with(format!("w{} ", w).as_bytes()))
            .collect();
        assert_eq!(mine.len(), 10);
        for (i, p) in mine.iter().enumerate() {
            assert_eq!(p.as_slice(), format!("w{} p{}", w, i).as_bytes());
        }
    }

    let wake = rig.link.wake();
    assert_eq!(wake.requested(), 0);
    assert!(!wake.is_acquired());
    assert!(wait_for(SETTLE, || !rig.hw.wake_line()));
    assert_eq!(wake.token_mismatches(), 0);
}
