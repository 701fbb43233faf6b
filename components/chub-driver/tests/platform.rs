//! Process-wide probe/remove
//!
//! One test only: the instance slot is global to the test binary.

#![cfg(feature = "sim")]

mod common;

use std::sync::Arc;

use chub_driver::{platform, ChubError, LinkState, NoRestart, SimBoardConfig};

use common::*;

#[test]
fn test_probe_and_remove_lifecycle() {
    init_logging();

    let board = board(SimBoardConfig::default());
    let hw = board.hardware().clone();
    let link = platform::probe(board, fast_config(), Arc::new(NoRestart)).unwrap();
    assert_eq!(link.state(), LinkState::Run);
    assert!(Arc::ptr_eq(&platform::instance().unwrap(), &link));

    let again = platform::probe(
        common::board(SimBoardConfig::default()),
        fast_config(),
        Arc::new(NoRestart),
    );
    assert!(matches!(
        again,
        Err(ChubError::InvalidState { op: "probe", state: LinkState::Run })
    ));

    platform::remove().unwrap();
    assert!(platform::instance().is_none());
    assert_eq!(link.state(), LinkState::Shutdown);
    assert!(hw.reset_held());
    assert!(matches!(
        platform::remove(),
        Err(ChubError::NotConfigured { .. })
    ));
    drop(link);

    // A board whose firmware never answers
    let silent = common::board(SimBoardConfig::default());
    let silent_hw = silent.hardware().clone();
    silent_hw.behavior().set_answer_alive(false);
    let Err(err) = platform::probe(silent, fast_config(), Arc::new(NoRestart)) else {
        panic!("probe of a silent board succeeded");
    };
    assert!(matches!(err, ChubError::NoResponse { attempts: 3 }));
    assert!(platform::instance().is_none());
    assert!(silent_hw.reset_held());
}
