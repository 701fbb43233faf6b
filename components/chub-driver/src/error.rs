//! Driver error type

use chub_ipc::IpcError;
use thiserror::Error;

use crate::state::LinkState;

/// POSIX error numbers used at the attribute boundary
pub mod errno {
    pub const ENOENT: i32 = 2;
    pub const EINTR: i32 = 4;
    pub const EIO: i32 = 5;
    pub const ENOEXEC: i32 = 8;
    pub const EAGAIN: i32 = 11;
    pub const EBUSY: i32 = 16;
    pub const ENODEV: i32 = 19;
    pub const EINVAL: i32 = 22;
    pub const EPROTO: i32 = 71;
    pub const EMSGSIZE: i32 = 90;
    pub const ENOBUFS: i32 = 105;
    pub const ETIMEDOUT: i32 = 110;
    pub const EHOSTDOWN: i32 = 112;
}

#[derive(Debug, Error)]
pub enum ChubError {
    #[error(transparent)]
    Ipc(#[from] IpcError),

    #[error("{op} not allowed in state {state}")]
    InvalidState { op: &'static str, state: LinkState },

    #[error("CHUB did not report awake within {timeout_ms} ms")]
    WakeTimeout { timeout_ms: u64 },

    #[error("no data from CHUB within {timeout_ms} ms")]
    ReadTimeout { timeout_ms: u64 },

    #[error("CHUB did not answer {attempts} alive pings")]
    NoResponse { attempts: u32 },

    #[error("wait interrupted")]
    Interrupted,

    #[error("firmware image {name}: {reason}")]
    Firmware { name: String, reason: String },

    #[error("{what} is not configured")]
    NotConfigured { what: &'static str },

    #[error("buffer of {len} bytes too small, need {need}")]
    BufferTooSmall { len: usize, need: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("ipc round trip mismatch: sent {sent} bytes, got back {received}")]
    IpcTestMismatch { sent: usize, received: usize },

    #[error("board control failed: {0}")]
    Board(String),

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ChubError {
    /// Negative error number for the attribute and ioctl boundary
    pub fn errno(&self) -> i32 {
        use errno::*;
        let code = match self {
            ChubError::Ipc(e) => match e {
                IpcError::QueueFull { .. } | IpcError::NoFreeSlot => EAGAIN,
                IpcError::PayloadTooLarge { .. } => EMSGSIZE,
                IpcError::IncompatibleFirmware(_) | IpcError::BadLayout { .. } => ENOEXEC,
                IpcError::ProtocolViolation { .. }
                | IpcError::CorruptQueue { .. }
                | IpcError::WrongSide { .. } => EPROTO,
            },
            ChubError::InvalidState { .. } => EBUSY,
            ChubError::WakeTimeout { .. } | ChubError::ReadTimeout { .. } => ETIMEDOUT,
            ChubError::NoResponse { .. } => EHOSTDOWN,
            ChubError::Interrupted => EINTR,
            ChubError::Firmware { .. } => ENOENT,
            ChubError::NotConfigured { .. } => ENODEV,
            ChubError::BufferTooSmall { .. } => ENOBUFS,
            ChubError::InvalidArgument(_) | ChubError::Config(_) => EINVAL,
            ChubError::IpcTestMismatch { .. } | ChubError::Board(_) => EIO,
            ChubError::Io(e) => e.raw_os_error().unwrap_or(EIO),
        };
        -code
    }

    /// Resource exhaustion a caller may retry after backing off
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChubError::Ipc(IpcError::QueueFull { .. } | IpcError::NoFreeSlot)
                | ChubError::WakeTimeout { .. }
        )
    }

    /// Shared-memory state no longer matches the protocol
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            ChubError::Ipc(
                IpcError::ProtocolViolation { .. }
                    | IpcError::CorruptQueue { .. }
                    | IpcError::WrongSide { .. }
            )
        )
    }
}

pub type Result<T> = core::result::Result<T, ChubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(ChubError::Ipc(IpcError::NoFreeSlot).errno(), -errno::EAGAIN);
        assert_eq!(
            ChubError::WakeTimeout { timeout_ms: 5 }.errno(),
            -errno::ETIMEDOUT
        );
        assert_eq!(ChubError::Interrupted.errno(), -errno::EINTR);
        assert_eq!(
            ChubError::InvalidState {
                op: "reset",
                state: LinkState::Run
            }
            .errno(),
            -errno::EBUSY
        );
        let io = std::io::Error::from_raw_os_error(errno::EBUSY);
        assert_eq!(ChubError::Io(io).errno(), -errno::EBUSY);
    }

    #[test]
    fn test_classification() {
        assert!(ChubError::Ipc(IpcError::QueueFull { capacity: 15 }).is_transient());
        assert!(!ChubError::NoResponse { attempts: 3 }.is_transient());
        assert!(ChubError::Ipc(IpcError::ProtocolViolation { slot: 0, raw: 9 })
            .is_protocol_violation());
    }

    #[test]
    fn test_display() {
        let err = ChubError::InvalidState {
            op: "reset",
            state: LinkState::Run,
        };
        assert_eq!(err.to_string(), "reset not allowed in state RUN");
    }
}
