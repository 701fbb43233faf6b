//! Debug attributes
//!
//! Text attributes:
//! - `get_gpr` (read): dump-GPR block, one `NAME: 0x........` line each
//! - `dump_status` (read: status report, write: log it)
//! - `dump_hw` (write): capture a manual dump
//! - `utc` (read: diagnostic list, write: run diagnostic by id)
//! - `ipc_test` (read: last result, write: round-trip the written bytes)
//! - `wakeup` (read: manual hold, write `1`/`0`: take/release it). The
//!   hold keeps the line asserted without claiming the transaction token,
//!   so traffic keeps flowing while it is held.
//!
//! Binary attributes `sram` (live SRAM) and `dump` (last capture).
//!
//! None of this is needed for the transport to work. An attribute that
//! cannot be offered is logged and left out.

use std::sync::{Arc, Mutex};

use chub_ipc::gpr::{GPR_COUNT, GPR_NAMES};
use chub_ipc::utc::UTC_COMMANDS;
use chub_ipc::PACKET_SIZE_MAX;

use crate::dump::DumpReason;
use crate::link::ChubLink;
use crate::sync::lock;
use crate::transport::LinkCommand;
use crate::wake::PriorityGuard;
use crate::{ChubError, Result};

pub const TEXT_ATTRS: [&str; 6] = ["get_gpr", "dump_status", "dump_hw", "utc", "ipc_test", "wakeup"];

pub struct DebugFs {
    link: Arc<ChubLink>,
    manual_wake: Mutex<Option<PriorityGuard>>,
    last_ipc_test: Mutex<Option<String>>,
    bin_attrs: Vec<&'static str>,
}

impl DebugFs {
    pub fn new(link: Arc<ChubLink>) -> Self {
        let mut bin_attrs = vec!["sram"];
        if link.board().dump_memory().is_some() {
            bin_attrs.push("dump");
        } else {
            log::warn!("chub debugfs: no reserved dump memory, 'dump' not created");
        }
        Self {
            link,
            manual_wake: Mutex::new(None),
            last_ipc_test: Mutex::new(None),
            bin_attrs,
        }
    }

    pub fn text_attributes(&self) -> &'static [&'static str] {
        &TEXT_ATTRS
    }

    pub fn bin_attributes(&self) -> &[&'static str] {
        &self.bin_attrs
    }

    /// Read text attribute `name`
    pub fn show(&self, name: &str) -> Result<String> {
        match name {
            "get_gpr" => {
                let gpr = self.link.board().gpr_regs();
                Ok((0..GPR_COUNT)
                    .map(|i| format!("{}: {:#010x}\n", GPR_NAMES[i], gpr.read32(i * 4)))
                    .collect())
            }
            "dump_status" => Ok(self.link.status_report()),
            "utc" => Ok(UTC_COMMANDS
                .iter()
                .map(|cmd| format!("{:2} {}\n", cmd.id, cmd.name))
                .collect()),
            "ipc_test" => Ok(lock(&self.last_ipc_test)
                .clone()
                .unwrap_or_else(|| "no test run\n".into())),
            "wakeup" => Ok(if lock(&self.manual_wake).is_some() {
                "1\n".into()
            } else {
                "0\n".into()
            }),
            "dump_hw" => Err(ChubError::InvalidArgument(format!("{} is write-only", name))),
            _ => Err(ChubError::InvalidArgument(format!("no attribute {}", name))),
        }
    }

    /// Write `data` to text attribute `name`; returns `data.len()` on success
    pub fn store(&self, name: &str, data: &[u8]) -> Result<usize> {
        match name {
            "dump_status" => self.link.write_event(LinkCommand::DumpStatus)?,
            "dump_hw" => {
                self.link.dump(DumpReason::Manual)?;
            }
            "utc" => {
                let id = parse_text(data)?
                    .parse::<u32>()
                    .map_err(|_| ChubError::InvalidArgument("utc takes a numeric id".into()))?;
                self.link.debug_action(id)?;
            }
            "ipc_test" => self.ipc_test(data)?,
            "wakeup" => match parse_text(data)? {
                "1" => {
                    let mut held = lock(&self.manual_wake);
                    if held.is_none() {
                        *held = Some(self.link.wake().lock_priority());
                    }
                }
                "0" => {
                    lock(&self.manual_wake).take();
                }
                other => {
                    return Err(ChubError::InvalidArgument(format!(
                        "wakeup takes 1 or 0, got {:?}",
                        other
                    )))
                }
            },
            "get_gpr" => {
                return Err(ChubError::InvalidArgument(format!("{} is read-only", name)))
            }
            _ => return Err(ChubError::InvalidArgument(format!("no attribute {}", name))),
        }
        Ok(data.len())
    }

    /// `store` with the file-write convention: length, or a negative errno
    pub fn write(&self, name: &str, data: &[u8]) -> isize {
        match self.store(name, data) {
            Ok(n) => n as isize,
            Err(e) => {
                log::debug!("chub debugfs: {} write failed: {}", name, e);
                e.errno() as isize
            }
        }
    }

    /// Read binary attribute `name` from `offset` into `buf`
    pub fn read_bin(&self, name: &str, offset: usize, buf: &mut [u8]) -> Result<usize> {
        match name {
            "sram" => {
                let sram = self.link.board().sram();
                Ok(copy_window(sram.size(), offset, buf, |at, out| {
                    sram.read_bytes(at, out)
                }))
            }
            "dump" if self.bin_attrs.contains(&"dump") => {
                let Some(view) = self.link.last_dump()? else {
                    return Ok(0);
                };
                let raw = view.as_bytes();
                Ok(copy_window(raw.len(), offset, buf, |at, out| {
                    out.copy_from_slice(&raw[at..at + out.len()])
                }))
            }
            _ => Err(ChubError::InvalidArgument(format!("no binary attribute {}", name))),
        }
    }

    fn ipc_test(&self, data: &[u8]) -> Result<()> {
        let payload = data.strip_suffix(b"\n").unwrap_or(data);
        if payload.is_empty() {
            return Err(ChubError::InvalidArgument("ipc_test needs a payload".into()));
        }

        let sent = self.link.write(payload)?;
        let mut back = vec![0u8; PACKET_SIZE_MAX];
        let received = self.link.read(&mut back, self.link.config().read_timeout())?;

        let ok = back[..received] == *payload;
        *lock(&self.last_ipc_test) = Some(if ok {
            format!("ok: {} bytes\n", sent)
        } else {
            format!("mismatch: sent {} bytes, received {}\n", sent, received)
        });
        if ok {
            Ok(())
        } else {
            Err(ChubError::IpcTestMismatch { sent, received })
        }
    }
}

fn parse_text(data: &[u8]) -> Result<&str> {
    core::str::from_utf8(data)
        .map(str::trim)
        .map_err(|_| ChubError::InvalidArgument("attribute value is not text".into()))
}

/// Copy what falls inside `[0, size)` starting at `offset`
fn copy_window(size: usize, offset: usize, buf: &mut [u8], read: impl FnOnce(usize, &mut [u8])) -> usize {
    if offset >= size {
        return 0;
    }
    let n = buf.len().min(size - offset);
    read(offset, &mut buf[..n]);
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_window_clamps() {
        let src: Vec<u8> = (0..10).collect();
        let mut buf = [0u8; 4];
        let n = copy_window(src.len(), 8, &mut buf, |at, out| {
            out.copy_from_slice(&src[at..at + out.len()])
        });
        assert_eq!(n, 2);
        assert_eq!(&buf[..2], &[8, 9]);
        assert_eq!(copy_window(src.len(), 10, &mut buf, |_, _| {}), 0);
    }

    #[test]
    fn test_parse_text_trims() {
        assert_eq!(parse_text(b" 11\n").unwrap(), "11");
        assert!(parse_text(&[0xff, 0xfe]).is_err());
    }
}
