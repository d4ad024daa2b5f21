//! # Feedback
//!
//! The result of a command, handed back to the [`DebuggerUI`](crate::ui::DebuggerUI).

use std::fmt::Display;

use crate::addr::Addr;
use crate::dbginfo::Symbol;
use crate::debugger::{CurrentLocation, FunctionSummary};
use crate::errors::DebuggerError;
use crate::memorymap::ProcessMemoryMap;
use crate::regs::{Register, RegisterSet};
use crate::step::Stop;
use crate::unwind::Backtrace;
use crate::variable::VariableValue;
use crate::Word;

#[derive(Debug)]
pub enum Feedback {
    Ok,
    Word(Addr, Word),
    Register(Register, u64),
    Registers(RegisterSet),
    Breakpoints(Vec<Addr>),
    /// The tracee stopped, and where it stopped if that is known
    Stopped {
        stop: Stop,
        location: Option<CurrentLocation>,
    },
    Location(CurrentLocation),
    Backtrace(Backtrace),
    Symbols(Vec<Symbol>),
    Variables(Vec<VariableValue>),
    Functions(Vec<FunctionSummary>),
    MemoryMap(ProcessMemoryMap),
    Error(DebuggerError),
}

impl Display for Feedback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Feedback::Ok => write!(f, "Ok")?,
            Feedback::Error(e) => write!(f, "Error: {e}")?,
            Feedback::Word(addr, w) => write!(f, "{addr}: {w:#018x}")?,
            Feedback::Register(reg, v) => write!(f, "{reg}: {v:#x}")?,
            Feedback::Registers(regs) => write!(f, "{regs}")?,
            Feedback::Breakpoints(addrs) => {
                for addr in addrs {
                    writeln!(f, "breakpoint at {addr}")?;
                }
            }
            Feedback::Stopped { stop, location } => {
                write!(f, "{stop}")?;
                if let Some(loc) = location {
                    write!(f, "\n{loc}")?;
                }
            }
            Feedback::Location(loc) => write!(f, "{loc}")?,
            Feedback::Backtrace(bt) => write!(f, "{bt}")?,
            Feedback::Symbols(symbols) => {
                if symbols.is_empty() {
                    write!(f, "no such symbol")?;
                }
                for sym in symbols {
                    writeln!(
                        f,
                        "{} {} {:#x} ({})",
                        sym.demangled(),
                        sym.kind,
                        sym.addr.usize(),
                        sym.name
                    )?;
                }
            }
            Feedback::Variables(vars) => {
                for var in vars {
                    writeln!(f, "{var}")?;
                }
            }
            Feedback::Functions(funcs) => {
                for func in funcs {
                    writeln!(f, "{func}")?;
                }
            }
            Feedback::MemoryMap(map) => write!(f, "{map}")?,
        }

        Ok(())
    }
}

impl From<Result<Feedback, DebuggerError>> for Feedback {
    fn from(value: Result<Feedback, DebuggerError>) -> Self {
        match value {
            Ok(f) => f,
            Err(e) => Feedback::Error(e),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_errors_become_feedback() {
        let fb: Feedback = Err(DebuggerError::TraceeExited).into();
        assert!(matches!(fb, Feedback::Error(DebuggerError::TraceeExited)));
        assert_eq!(fb.to_string(), "Error: The debuggee has exited");
    }

    #[test]
    fn test_word_display() {
        let fb = Feedback::Word(Addr::from(0x1000usize), 0x2a);
        assert_eq!(fb.to_string(), "0x0000000000001000: 0x000000000000002a");
    }
}
