//! # User interfaces
//!
//! A [`DebuggerUI`] turns the [`Feedback`] of the last command into the next command, a
//! [`Status`]. The [`Debugger`](crate::debugger::Debugger) drives the loop.

use std::path::PathBuf;

use crate::addr::Addr;
use crate::errors::Result;
use crate::feedback::Feedback;
use crate::regs::Register;
use crate::Word;

#[cfg(feature = "cli")]
pub mod cli;

/// A command for the debugger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Continue,
    SetBreakpoint(Addr),
    SetBreakpointAtFunction(String),
    SetBreakpointAtLine(PathBuf, u64),
    DelBreakpoint(Addr),
    DumpRegisters,
    ReadRegister(Register),
    SetRegister(Register, u64),
    ReadMem(Addr),
    WriteMem(Addr, Word),
    StepSingle,
    StepInto,
    StepOver,
    StepOut,
    Location,
    Backtrace,
    GetSymbolsByName(String),
    Variables,
    Functions,
    Maps,
    Quit,
}

pub trait DebuggerUI {
    /// Shows the result of the last command and asks for the next one
    fn process(&mut self, feedback: Feedback) -> Result<Status>;

    /// Shows the last feedback of a session whose tracee is gone
    fn finished(&mut self, _feedback: Feedback) -> Result<()> {
        Ok(())
    }
}
