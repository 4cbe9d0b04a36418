//! `x86_64` specifics of software breakpoints.

/// The one-byte `int3` instruction.
pub const TRAP_OPCODE: u8 = 0xcc;

/// Bytes between a trap instruction and the pc reported after it executes.
pub const TRAP_LEN: u64 = 1;

/// Return `word` with its lowest-addressed byte replaced by `byte`.
///
/// Words are read from tracee memory in native (little-endian) order, so the low byte of
/// the word is the byte at the word's address.
pub fn splice_first_byte(word: u64, byte: u8) -> u64 {
    (word & !0xff) | u64::from(byte)
}

/// Return the byte stored at the word's address.
pub fn first_byte(word: u64) -> u8 {
    (word & 0xff) as u8
}

/// Instruction pointer of the register state.
pub fn pc(regs: &libc::user_regs_struct) -> u64 {
    regs.rip
}

pub fn set_pc(regs: &mut libc::user_regs_struct, pc: u64) {
    regs.rip = pc;
}
