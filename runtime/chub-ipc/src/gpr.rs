//! Dump-GPR block layout
//!
//! The hardware latches the CHUB core registers into a small block the AP can
//! read after the core stops. One word per register, in this order.

/// Registers latched by the block
pub const GPR_COUNT: usize = 17;

/// Bytes the block occupies
pub const GPR_BLOCK_SIZE: usize = GPR_COUNT * 4;

/// Register names in block order
pub const GPR_NAMES: [&str; GPR_COUNT] = [
    "R0", "R1", "R2", "R3", "R4", "R5", "R6", "R7", "R8", "R9", "R10", "R11", "R12", "SP", "LR",
    "PC", "PSR",
];

/// Index of the program counter
pub const GPR_PC: usize = 15;
