//! # Tracee
//!
//! The [`Tracee`] trait is the lowest layer of the debugger: it reads and writes words of the
//! tracee's memory, reads and writes its registers, resumes it and waits for it to stop again.
//!
//! All memory and register operations require the tracee to be stopped. This trait does not
//! check that; the [`Debugger`](crate::debugger::Debugger) only calls them between a stop and
//! the next resume.
//!
//! [`Debuggee`](crate::debuggee::Debuggee) implements this trait with ptrace. The unit tests use
//! an in-memory fake.

use std::fmt::Display;

use nix::sys::signal::Signal;
use nix::unistd::Pid;

use crate::addr::Addr;
use crate::errors::Result;
use crate::memorymap::ProcessMemoryMap;
use crate::regs::RegisterSet;
use crate::Word;

/// What [`Tracee::wait`] observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The tracee stopped with a signal. `code` is the `si_code` of its siginfo.
    Stopped { signal: Signal, code: i32 },
    /// The tracee exited with the given status
    Exited(i32),
    /// The tracee was killed by a signal
    Signaled(Signal),
}

/// Lifecycle of the controlled process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceeState {
    /// Forked, but the initial stop has not been observed yet
    Created,
    Stopped,
    Running,
    Exited(i32),
    Terminated(Signal),
}

impl TraceeState {
    pub fn is_alive(&self) -> bool {
        matches!(self, Self::Created | Self::Stopped | Self::Running)
    }
}

impl Display for TraceeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
            Self::Exited(code) => write!(f, "exited with status {code}"),
            Self::Terminated(sig) => write!(f, "terminated by {sig}"),
        }
    }
}

/// Access to and control over a traced process
pub trait Tracee {
    fn pid(&self) -> Pid;

    fn read_word(&self, addr: Addr) -> Result<Word>;
    fn write_word(&mut self, addr: Addr, value: Word) -> Result<()>;

    fn read_registers(&self) -> Result<RegisterSet>;
    fn write_registers(&mut self, regs: &RegisterSet) -> Result<()>;

    /// Resume the tracee, optionally delivering a signal
    fn cont(&mut self, sig: Option<Signal>) -> Result<()>;
    /// Execute a single instruction in the tracee
    fn step(&mut self, sig: Option<Signal>) -> Result<()>;
    /// Block until the tracee stops or exits
    fn wait(&mut self) -> Result<WaitOutcome>;

    fn memory_map(&self) -> Result<ProcessMemoryMap>;

    fn kill(&mut self) -> Result<()>;
}
