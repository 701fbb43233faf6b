//! Firmware diagnostic ("utc") commands
//!
//! The AP asks the firmware to run one of these by writing the id into
//! `SharedReg::DebugAction` and queueing `EventId::DebugAction`.

/// One firmware diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtcCommand {
    pub id: u32,
    pub name: &'static str,
}

macro_rules! utc_table {
    ($($konst:ident = $id:literal, $name:literal;)*) => {
        $(pub const $konst: u32 = $id;)*

        /// Every diagnostic the firmware understands, in id order
        pub const UTC_COMMANDS: &[UtcCommand] = &[
            $(UtcCommand { id: $id, name: $name },)*
        ];
    };
}

utc_table! {
    UTC_STOP = 0, "stop";
    UTC_AGING = 1, "aging";
    UTC_WDT = 2, "wdt";
    UTC_RTC = 3, "rtc";
    UTC_MEM = 4, "mem";
    UTC_TIMER = 5, "timer";
    UTC_GPIO = 6, "gpio";
    UTC_SPI = 7, "spi";
    UTC_CMU = 8, "cmu";
    UTC_TIME_SYNC = 9, "time_sync";
    UTC_ASSERT = 10, "assert";
    UTC_FAULT = 11, "fault";
    UTC_CHECK_STATUS = 12, "check_status";
    UTC_CHECK_CPU_UTIL = 13, "check_cpu_util";
    UTC_HEAP_DEBUG = 14, "heap_debug";
    UTC_HANG = 15, "hang";
    UTC_DFS = 16, "dfs";
}

/// Look a diagnostic up by id
pub fn lookup(id: u32) -> Option<&'static UtcCommand> {
    UTC_COMMANDS.iter().find(|cmd| cmd.id == id)
}

/// Look a diagnostic up by name
pub fn find(name: &str) -> Option<&'static UtcCommand> {
    UTC_COMMANDS.iter().find(|cmd| cmd.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_dense() {
        for (i, cmd) in UTC_COMMANDS.iter().enumerate() {
            assert_eq!(cmd.id as usize, i);
        }
        assert_eq!(UTC_COMMANDS.len(), 17);
    }

    #[test]
    fn test_lookup() {
        assert_eq!(lookup(UTC_FAULT).map(|c| c.name), Some("fault"));
        assert_eq!(find("time_sync").map(|c| c.id), Some(UTC_TIME_SYNC));
        assert!(lookup(99).is_none());
        assert!(find("reboot").is_none());
    }
}
