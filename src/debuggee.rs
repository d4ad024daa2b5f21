//! # Debuggee Module
//!
//! The [`Debuggee`] is a real process controlled with [ptrace](nix::sys::ptrace). It is the
//! production implementation of [`Tracee`].
//!
//! [`Debuggee::launch`] forks, asks to be traced, disables address space randomization and
//! executes the program. The child then stops with `SIGTRAP` right after the exec, before the
//! first instruction of the program runs.

use std::convert::Infallible;
use std::ffi::CString;
use std::path::Path;

use nix::errno::Errno;
use nix::libc::siginfo_t;
use nix::sys::personality::{self, Persona};
use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{execv, fork, ForkResult, Pid};
use tracing::{debug, error, info, trace};

use crate::addr::Addr;
use crate::errors::{DebuggerError, Result};
use crate::memorymap::ProcessMemoryMap;
use crate::regs::RegisterSet;
use crate::tracee::{Tracee, WaitOutcome};
use crate::Word;

/// A process being debugged
#[derive(Debug)]
pub struct Debuggee {
    pid: Pid,
}

impl Debuggee {
    /// Starts `path` as a traced child process
    ///
    /// `args` are the arguments after the program name. The returned debuggee has not been
    /// waited for yet.
    ///
    /// # Errors
    ///
    /// Fails if `path` does not exist or is not a file, if an argument contains a null byte, or
    /// if the fork fails. Errors in the child after the fork terminate the child with status
    /// 127 without any message, which shows up as an exit on the first wait.
    pub fn launch(path: impl AsRef<Path>, args: &[String]) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            let err = DebuggerError::ExecutableDoesNotExist(path.to_string_lossy().to_string());
            error!("{err}");
            return Err(err);
        }
        if !path.is_file() {
            let err = DebuggerError::ExecutableIsNotAFile(path.to_string_lossy().to_string());
            error!("{err}");
            return Err(err);
        }

        let cpath = CString::new(path.to_string_lossy().as_bytes())?;
        let mut cargs = vec![cpath.clone()];
        for arg in args {
            cargs.push(CString::new(arg.as_str())?);
        }

        // SAFETY: the child only calls async-signal-safe functions before exec
        match unsafe { fork() } {
            Err(e) => {
                error!("could not start executable: {e}");
                Err(e.into())
            }
            Ok(ForkResult::Parent { child }) => {
                info!("started {} as pid {child}", path.display());
                Ok(Self { pid: child })
            }
            Ok(ForkResult::Child) => match Self::exec_traced(&cpath, &cargs) {
                Ok(never) => match never {},
                // SAFETY: _exit is async-signal-safe and skips the handlers of the parent
                Err(_) => unsafe { nix::libc::_exit(127) },
            },
        }
    }

    /// Runs in the forked child, so it must neither allocate nor log
    fn exec_traced(path: &CString, args: &[CString]) -> nix::Result<Infallible> {
        personality::set(Persona::ADDR_NO_RANDOMIZE)?;
        ptrace::traceme()?;
        execv(path, args)
    }

    fn memory_error(err: Errno, addr: Addr) -> DebuggerError {
        match err {
            Errno::EIO | Errno::EFAULT => DebuggerError::MemoryFault(addr),
            other => other.into(),
        }
    }
}

impl Tracee for Debuggee {
    fn pid(&self) -> Pid {
        self.pid
    }

    fn read_word(&self, addr: Addr) -> Result<Word> {
        let word = ptrace::read(self.pid, addr.into()).map_err(|e| Self::memory_error(e, addr))?;
        trace!("read {word:016x} at {addr}");
        Ok(word as Word)
    }

    fn write_word(&mut self, addr: Addr, value: Word) -> Result<()> {
        trace!("write {value:016x} at {addr}");
        ptrace::write(self.pid, addr.into(), value as nix::libc::c_long)
            .map_err(|e| Self::memory_error(e, addr))
    }

    fn read_registers(&self) -> Result<RegisterSet> {
        Ok(ptrace::getregs(self.pid)?.into())
    }

    fn write_registers(&mut self, regs: &RegisterSet) -> Result<()> {
        Ok(ptrace::setregs(self.pid, (*regs).into())?)
    }

    fn cont(&mut self, sig: Option<Signal>) -> Result<()> {
        Ok(ptrace::cont(self.pid, sig)?)
    }

    fn step(&mut self, sig: Option<Signal>) -> Result<()> {
        Ok(ptrace::step(self.pid, sig)?)
    }

    fn wait(&mut self) -> Result<WaitOutcome> {
        let status = waitpid(self.pid, None)?;
        let outcome = wait_outcome(status, || ptrace::getsiginfo(self.pid))?;
        trace!("wait: {outcome:?}");
        Ok(outcome)
    }

    fn memory_map(&self) -> Result<ProcessMemoryMap> {
        Ok(proc_maps::get_process_maps(self.pid.into())?.into())
    }

    fn kill(&mut self) -> Result<()> {
        ptrace::kill(self.pid)?;
        Ok(())
    }
}

/// Turns a wait status into a [`WaitOutcome`], asking `siginfo` for the `si_code` of stops
///
/// A stop without siginfo (a group stop) gets code 0, except for `SIGTRAP`, where the code is
/// needed to tell breakpoints from steps.
fn wait_outcome(
    status: WaitStatus,
    siginfo: impl FnOnce() -> nix::Result<siginfo_t>,
) -> Result<WaitOutcome> {
    Ok(match status {
        WaitStatus::Exited(_, code) => WaitOutcome::Exited(code),
        WaitStatus::Signaled(_, sig, _) => WaitOutcome::Signaled(sig),
        WaitStatus::Stopped(_, signal) => {
            let code = match siginfo() {
                Ok(info) => info.si_code,
                Err(e) if signal != Signal::SIGTRAP => {
                    debug!("no siginfo for the {signal} stop: {e}");
                    0
                }
                Err(e) => return Err(e.into()),
            };
            WaitOutcome::Stopped { signal, code }
        }
        WaitStatus::PtraceEvent(_, signal, _) => WaitOutcome::Stopped { signal, code: 0 },
        other => {
            debug!("unexpected wait status {other:?}, treating it as a SIGTRAP stop");
            WaitOutcome::Stopped {
                signal: Signal::SIGTRAP,
                code: 0,
            }
        }
    })
}
