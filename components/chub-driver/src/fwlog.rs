//! Firmware log forwarding
//!
//! Text drained from the firmware log ring is split into lines and re-emitted
//! through `log` under the `chub_fw` target. A line split across two drains
//! is held back until its newline arrives, up to one ring's worth of text;
//! past that the held bytes go out as a line of their own.

use std::collections::VecDeque;

use chub_ipc::logbuf::LOG_BUF_LEN;

/// Lines kept for `ChubLink::recent_firmware_log`
const RECENT_LINES: usize = 64;

/// Longest run of text held while waiting for a newline
const PARTIAL_MAX: usize = LOG_BUF_LEN;

#[derive(Debug, Default)]
pub(crate) struct FirmwareLog {
    partial: Vec<u8>,
    recent: VecDeque<String>,
    lost_seen: u32,
}

impl FirmwareLog {
    /// Feed freshly drained bytes; `lost` is the ring's running drop counter
    pub fn absorb(&mut self, bytes: &[u8], lost: u32) {
        if lost > self.lost_seen {
            log::warn!(
                target: "chub_fw",
                "{} bytes of firmware log dropped",
                lost - self.lost_seen
            );
        }
        // A reset ring starts counting from zero again
        self.lost_seen = lost;

        self.partial.extend_from_slice(bytes);
        loop {
            if let Some(end) = self.partial.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.partial.drain(..=end).collect();
                self.emit(&line[..end]);
            } else if self.partial.len() >= PARTIAL_MAX {
                let line: Vec<u8> = self.partial.drain(..PARTIAL_MAX).collect();
                log::warn!(target: "chub_fw", "{} bytes without a newline", PARTIAL_MAX);
                self.emit(&line);
            } else {
                break;
            }
        }
    }

    fn emit(&mut self, line: &[u8]) {
        let text = String::from_utf8_lossy(line);
        let text = text.trim_end_matches('\r');
        if text.is_empty() {
            return;
        }
        log::info!(target: "chub_fw", "{}", text);
        if self.recent.len() == RECENT_LINES {
            self.recent.pop_front();
        }
        self.recent.push_back(text.to_string());
    }

    /// Forget any half line; used when the ring is reinitialised
    pub fn clear_partial(&mut self) {
        self.partial.clear();
        self.lost_seen = 0;
    }

    pub fn recent(&self) -> Vec<String> {
        self.recent.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_line_joined() {
        let mut log = FirmwareLog::default();
        log.absorb(b"chub os ", 0);
        assert!(log.recent().is_empty());

        log.absorb(b"up\nsecond\n\nthi", 0);
        assert_eq!(log.recent(), vec!["chub os up", "second"]);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut log = FirmwareLog::default();
        for i in 0..RECENT_LINES + 5 {
            log.absorb(format!("line {}\n", i).as_bytes(), 0);
        }
        let recent = log.recent();
        assert_eq!(recent.len(), RECENT_LINES);
        assert_eq!(recent[0], "line 5");
    }

    #[test]
    fn test_unterminated_text_is_bounded() {
        let mut log = FirmwareLog::default();
        let garbage = vec![b'x'; PARTIAL_MAX / 2 + 7];
        log.absorb(&garbage, 0);
        assert!(log.recent().is_empty());
        log.absorb(&garbage, 0);
        log.absorb(&garbage, 0);

        let recent = log.recent();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].len(), PARTIAL_MAX);
        assert!(log.partial.len() < PARTIAL_MAX);

        // The remainder still joins with the next newline
        log.absorb(b"yz\n", 0);
        let recent = log.recent();
        assert_eq!(recent.len(), 2);
        assert!(recent[1].ends_with("xxyz"));
        assert!(log.partial.is_empty());
    }

    #[test]
    fn test_lost_counter_tracks_reset() {
        let mut log = FirmwareLog::default();
        log.absorb(b"", 10);
        assert_eq!(log.lost_seen, 10);
        log.absorb(b"", 0);
        assert_eq!(log.lost_seen, 0);
    }
}
