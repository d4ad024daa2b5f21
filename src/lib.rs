//! # minidbg
//!
//! A small source-level debugger for x86_64 Linux. It controls a process with ptrace, sets
//! software breakpoints, steps by instruction, by line, over calls and out of functions, walks
//! the call stack and reads local variables through the DWARF debug information of the
//! executable.
//!
//! The layers, from the bottom up:
//!
//! * [`tracee`]: memory, registers and execution control of a traced process, implemented
//!   with ptrace in [`debuggee`]
//! * [`breakpoint`]: `int3` breakpoints
//! * [`translate`]: conversion between runtime and static addresses
//! * [`dbginfo`] and [`dwarf_parse`]: the debug information
//! * [`step`], [`unwind`] and [`variable`]: stepping, backtraces and variables
//! * [`debugger`]: a debugging session, driven by a [`ui::DebuggerUI`]
//!
//! Stepping over calls, stepping out and backtraces require frame pointers: the code of the
//! debuggee must be compiled with `-fno-omit-frame-pointer` or an equivalent.

pub mod addr;
pub mod breakpoint;
pub mod consts;
pub mod dbginfo;
pub mod debuggee;
pub mod debugger;
pub mod dwarf_parse;
pub mod errors;
pub mod feedback;
pub mod memorymap;
pub mod regs;
pub mod step;
pub mod tracee;
pub mod translate;
pub mod ui;
pub mod unwind;
pub mod variable;

#[cfg(test)]
mod testing;

/// A machine word of the tracee
pub type Word = u64;
