//! Constants of the x86_64 Linux tracing interface
//!
//! The siginfo codes are deeply nested into the libc, and not available from nix or the rust
//! bindings of the libc.
//!
//! Source: <https://elixir.bootlin.com/linux/v6.13.1/source/include/uapi/asm-generic/siginfo.h#L227>

#![allow(unused)]

/// Size of a machine word in bytes
pub const WORD_BYTES: usize = 8;

/// Encoding of the `int3` instruction
pub const INT3_BYTE: u8 = 0xcc;
/// Width of the trap instruction; the kernel reports the pc this far past the trap
pub const TRAP_INSTRUCTION_LEN: usize = 1;

/// Offset of the return address from the frame base, with frame pointers retained
pub const RETURN_ADDRESS_OFFSET: usize = WORD_BYTES;
/// Distance between the frame base and the canonical frame address after the prologue
pub const CFA_OFFSET: u64 = 2 * WORD_BYTES as u64;

/// Sent by the kernel from somewhere
pub const SI_KERNEL: i32 = 0x80;

// ---------------- SIGTRAP si_codes ---------------------------------------------------------------

/// Process breakpoint
pub const TRAP_BRKPT: i32 = 0x1;
/// Process trace trap
pub const TRAP_TRACE: i32 = 0x2;
/// Process taken branch trap
pub const TRAP_BRANCH: i32 = 0x3;
/// Hardware breakpoint/watchpoint
pub const TRAP_HWBKPT: i32 = 0x4;
/// Undiagnosed trap
pub const TRAP_UNK: i32 = 0x5;
