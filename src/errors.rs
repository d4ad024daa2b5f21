//! # Errors
//!
//! Every fallible operation in minidbg returns [`Result`], with [`DebuggerError`] describing what
//! went wrong. Some variants are expected outcomes of normal debugging rather than bugs:
//!
//! * [`DebuggerError::NoDebugInfoForAddress`] and [`DebuggerError::SignalDelivered`] end the
//!   current high level step, but the session stays usable.
//! * [`DebuggerError::UnknownBreakpoint`] and [`DebuggerError::UnknownRegisterName`] are usage
//!   errors that go straight back to the command layer.
//! * [`DebuggerError::TraceeExited`] ends the session.

use nix::sys::signal::Signal;
use thiserror::Error;

use crate::addr::{Addr, StaticAddr};

pub type Result<T> = std::result::Result<T, DebuggerError>;

#[derive(Error, Debug)]
pub enum DebuggerError {
    #[error("Os error: {0}")]
    Os(#[from] nix::Error),
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not read the DWARF debug information: {0}")]
    Dwarf(#[from] gimli::Error),
    #[error("Could not parse the object file: {0}")]
    Object(#[from] object::Error),
    #[error("Could not convert to CString: {0}")]
    CStringConv(#[from] std::ffi::NulError),
    #[cfg(feature = "cli")]
    #[error("Could not read a command: {0}")]
    Prompt(#[from] dialoguer::Error),
    #[error("Could not parse integer: {0}")]
    ParseInt(#[from] std::num::ParseIntError),
    #[error("Executable does not exist: {0}")]
    ExecutableDoesNotExist(String),
    #[error("Executable is not a file: {0}")]
    ExecutableIsNotAFile(String),
    #[error("No debuggee is running")]
    NoDebuggee,
    #[error("The debuggee has exited")]
    TraceeExited,
    #[error("The debuggee received a signal: {0}")]
    SignalDelivered(Signal),
    #[error("Address {addr} is below the load bias {bias}")]
    AddressOutOfRange { addr: Addr, bias: Addr },
    #[error("No debug information for address {0}")]
    NoDebugInfoForAddress(StaticAddr),
    #[error("No breakpoint exists at {0}")]
    UnknownBreakpoint(Addr),
    #[error("Unknown register name: {0}")]
    UnknownRegisterName(String),
    #[error("Unknown DWARF register number: {0}")]
    UnknownDwarfRegister(u16),
    #[error("Could not access tracee memory at {0}")]
    MemoryFault(Addr),
    #[error("No function with debug information is named {0}")]
    NoSuchFunction(String),
    #[error("No line table entry for {file}:{line}")]
    NoSuchSourceLine { file: String, line: u64 },
    #[error("Unsupported variable location: {0}")]
    UnsupportedLocation(String),
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("Missing argument: {0}")]
    MissingArgument(&'static str),
}
