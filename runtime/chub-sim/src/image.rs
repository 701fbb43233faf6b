//! Firmware images for the simulated core
//!
//! The bootloader image is what carries the boot-args, so it has to be built
//! for the SRAM it will be downloaded into. The OS image only needs a
//! recognisable header; the simulated core refuses to start without it.

use chub_ipc::map::{BootArgs, BOOTARGS_OFFSET, BOOTARGS_SIZE};
use chub_ipc::{IoMem, Map};

/// Logical name of the bootloader image
pub const BOOTLOADER_NAME: &str = "bl.unchecked.bin";

/// Logical name of the OS image
pub const OS_NAME: &str = "os.checked.bin";

/// Header the OS image starts with
pub const OS_MAGIC: [u8; 8] = *b"CHUBOS\0\x01";

const OS_IMAGE_LEN: usize = 0x1000;

/// Bootloader image for `args`
///
/// Starts with a two-word vector table (initial stack pointer and a thumb
/// reset address) and carries the encoded boot-args at `BOOTARGS_OFFSET`.
pub fn bootloader(args: &BootArgs) -> Vec<u8> {
    let mut image = vec![0u8; BOOTARGS_OFFSET + BOOTARGS_SIZE];
    image[0..4].copy_from_slice(&(args.ram.end as u32).to_le_bytes());
    image[4..8].copy_from_slice(&((args.bootloader.start + 0x101) as u32).to_le_bytes());
    image[BOOTARGS_OFFSET..].copy_from_slice(&args.encode());
    image
}

/// OS image with a deterministic body
pub fn os() -> Vec<u8> {
    let mut image = Vec::with_capacity(OS_IMAGE_LEN);
    image.extend_from_slice(&OS_MAGIC);
    let mut x = 0x9e37_79b9u32;
    while image.len() < OS_IMAGE_LEN {
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        image.extend_from_slice(&x.to_le_bytes());
    }
    image
}

/// Image compiled into the simulator for `name`, laid out for `sram_size`
pub fn builtin(name: &str, sram_size: usize) -> Option<Vec<u8>> {
    match name {
        BOOTLOADER_NAME => Some(bootloader(&BootArgs::standard(sram_size))),
        OS_NAME => Some(os()),
        _ => None,
    }
}

/// Whether a bootable OS image sits at the start of the OS region
pub fn os_present(sram: &dyn IoMem, map: &Map) -> bool {
    if map.os.len() < OS_MAGIC.len() {
        return false;
    }
    sram.to_vec(map.os.start, OS_MAGIC.len()) == OS_MAGIC
}

#[cfg(test)]
mod tests {
    use super::*;
    use chub_ipc::map::resolve;
    use chub_ipc::SharedMem;

    #[test]
    fn test_bootloader_resolves() {
        let sram = SharedMem::new(0x2_0000);
        sram.write_bytes(0, &builtin(BOOTLOADER_NAME, 0x2_0000).unwrap());
        let map = resolve(&sram).unwrap();

        assert!(!os_present(&sram, &map));
        sram.write_bytes(map.os.start, &os());
        assert!(os_present(&sram, &map));
    }

    #[test]
    fn test_images_are_deterministic() {
        assert_eq!(os(), os());
        assert_eq!(os().len(), OS_IMAGE_LEN);
        assert!(builtin("nanohub.bin", 0x2_0000).is_none());
    }
}
