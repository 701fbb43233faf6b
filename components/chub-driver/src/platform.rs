//! Platform integration boundary
//!
//! The one place a process-wide link lives. `probe` builds and boots it,
//! `remove` shuts it down and drops it; everything else takes the
//! `Arc<ChubLink>` explicitly.

use std::sync::{Arc, Mutex};

use crate::board::{Board, Restart};
use crate::config::ChubConfig;
use crate::link::ChubLink;
use crate::state::LinkState;
use crate::sync::lock;
use crate::{ChubError, Result};

static INSTANCE: Mutex<Option<Arc<ChubLink>>> = Mutex::new(None);

/// Create and boot the process-wide link
///
/// A boot failure leaves no instance behind and the core held in reset.
pub fn probe(board: Arc<dyn Board>, config: ChubConfig, restart: Arc<dyn Restart>) -> Result<Arc<ChubLink>> {
    let mut slot = lock(&INSTANCE);
    if let Some(existing) = slot.as_ref() {
        return Err(ChubError::InvalidState {
            op: "probe",
            state: existing.state(),
        });
    }

    let link = ChubLink::new(board, config, restart)?;
    if let Err(e) = link.power_on() {
        log::error!("chub: probe failed: {}", e);
        if let Err(hold) = link.board().assert_reset() {
            log::warn!("chub: could not hold core after failed probe: {}", hold);
        }
        return Err(e);
    }

    *slot = Some(link.clone());
    log::info!("chub: probed on board {}", link.board().name());
    Ok(link)
}

/// Shut down and release the process-wide link
pub fn remove() -> Result<()> {
    let link = lock(&INSTANCE).take().ok_or(ChubError::NotConfigured {
        what: "chub instance",
    })?;
    link.interrupt_waiters();
    if matches!(link.state(), LinkState::Run | LinkState::NoResponse) {
        if let Err(e) = link.shutdown() {
            log::warn!("chub: shutdown on remove failed: {}", e);
        }
    }
    log::info!("chub: removed");
    Ok(())
}

pub fn instance() -> Option<Arc<ChubLink>> {
    lock(&INSTANCE).clone()
}
