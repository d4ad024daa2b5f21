//! # Stepping
//!
//! The [`StepEngine`] resumes the tracee and turns what the kernel reports into a [`Stop`]. It
//! implements continuing, stepping single instructions, stepping lines (step in), stepping over
//! calls (step over) and returning from the current function (step out).
//!
//! Step over and step out insert temporary breakpoints. These are collected in a [`StepPlan`]
//! and removed again before the operation returns, whichever breakpoint was hit and whether the
//! operation succeeded or not.
//!
//! Finding the return address of the current function assumes the frame pointer ABI: the
//! caller's frame base is saved at the callee's frame base, and the return address is stored
//! one word above it. Code compiled without frame pointers will confuse step over, step out
//! and backtraces.

use std::fmt::Display;

use nix::sys::signal::Signal;
use tracing::{debug, trace, warn};

use crate::addr::Addr;
use crate::breakpoint::Breakpoints;
use crate::consts::{RETURN_ADDRESS_OFFSET, SI_KERNEL, TRAP_BRKPT, TRAP_INSTRUCTION_LEN, TRAP_TRACE};
use crate::dbginfo::{DebugInfoIndex, LineEntry};
use crate::errors::{DebuggerError, Result};
use crate::tracee::{Tracee, WaitOutcome};
use crate::translate::AddressTranslator;

/// Why the tracee stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stop {
    /// Hit a breakpoint at this address. The pc has already been moved back onto it.
    Breakpoint(Addr),
    /// Finished a single step, now at this address
    Step(Addr),
    /// Stopped by a signal other than a breakpoint or step trap
    Signal(Signal),
    Exited(i32),
    Terminated(Signal),
}

impl Stop {
    /// Whether the tracee is still around after this stop
    pub fn is_alive(&self) -> bool {
        !matches!(self, Stop::Exited(_) | Stop::Terminated(_))
    }

    /// The pc after this stop, if the tracee is stopped at a known place
    pub fn pc(&self) -> Option<Addr> {
        match self {
            Stop::Breakpoint(a) | Stop::Step(a) => Some(*a),
            _ => None,
        }
    }
}

impl Display for Stop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stop::Breakpoint(addr) => write!(f, "hit breakpoint at {addr}"),
            Stop::Step(addr) => write!(f, "stepped to {addr}"),
            Stop::Signal(sig) => write!(f, "received signal {sig}"),
            Stop::Exited(code) => write!(f, "exited with status {code}"),
            Stop::Terminated(sig) => write!(f, "terminated by {sig}"),
        }
    }
}

/// Temporary breakpoints inserted by a single step operation
#[derive(Debug, Default)]
pub struct StepPlan {
    inserted: Vec<Addr>,
}

impl StepPlan {
    /// Inserts a temporary breakpoint, unless any breakpoint already exists at `addr`
    fn cover(
        &mut self,
        tracee: &mut impl Tracee,
        breakpoints: &mut Breakpoints,
        addr: Addr,
    ) -> Result<()> {
        if breakpoints.insert(tracee, addr)? {
            trace!("temporary breakpoint at {addr}");
            self.inserted.push(addr);
        }
        Ok(())
    }

    /// Removes every breakpoint this plan inserted
    ///
    /// If the tracee is gone, the breakpoints are only forgotten. Tries to remove all of them
    /// even if one fails, and reports the first failure.
    fn retire(
        self,
        tracee: &mut impl Tracee,
        breakpoints: &mut Breakpoints,
        alive: bool,
    ) -> Result<()> {
        let mut first_err = None;
        for addr in self.inserted {
            if !alive {
                breakpoints.forget(addr);
                continue;
            }
            if let Err(e) = breakpoints.remove(tracee, addr) {
                warn!("could not remove temporary breakpoint at {addr}: {e}");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Drives the execution of a stopped tracee
pub struct StepEngine<'a, T: Tracee, D: DebugInfoIndex> {
    tracee: &'a mut T,
    breakpoints: &'a mut Breakpoints,
    translator: &'a AddressTranslator,
    index: &'a D,
}

impl<'a, T: Tracee, D: DebugInfoIndex> StepEngine<'a, T, D> {
    pub fn new(
        tracee: &'a mut T,
        breakpoints: &'a mut Breakpoints,
        translator: &'a AddressTranslator,
        index: &'a D,
    ) -> Self {
        Self {
            tracee,
            breakpoints,
            translator,
            index,
        }
    }

    pub fn pc(&self) -> Result<Addr> {
        Ok(self.tracee.read_registers()?.pc())
    }

    fn set_pc(&mut self, pc: Addr) -> Result<()> {
        let mut regs = self.tracee.read_registers()?;
        regs.set_pc(pc);
        self.tracee.write_registers(&regs)
    }

    /// The line table row at the current pc
    pub fn current_line(&self) -> Result<&'a LineEntry> {
        let index: &'a D = self.index;
        index.line_entry_at(self.translator.to_static(self.pc()?)?)
    }

    /// Waits for the tracee and classifies the stop
    ///
    /// After a breakpoint trap, the pc is moved back onto the breakpoint before anything else
    /// looks at it.
    pub fn wait_stop(&mut self) -> Result<Stop> {
        let stop = match self.tracee.wait()? {
            WaitOutcome::Exited(code) => Stop::Exited(code),
            WaitOutcome::Signaled(sig) => Stop::Terminated(sig),
            WaitOutcome::Stopped {
                signal: Signal::SIGTRAP,
                code,
            } => match code {
                SI_KERNEL | TRAP_BRKPT => {
                    let pc = self.pc()? - TRAP_INSTRUCTION_LEN;
                    self.set_pc(pc)?;
                    Stop::Breakpoint(pc)
                }
                TRAP_TRACE => Stop::Step(self.pc()?),
                other => {
                    debug!("unknown SIGTRAP code {other}");
                    Stop::Signal(Signal::SIGTRAP)
                }
            },
            WaitOutcome::Stopped { signal, .. } => Stop::Signal(signal),
        };
        debug!("tracee stop: {stop}");
        Ok(stop)
    }

    /// Executes one instruction, ignoring breakpoints
    pub fn single_step(&mut self) -> Result<Stop> {
        self.tracee.step(None)?;
        self.wait_stop()
    }

    /// Steps over an enabled breakpoint at the current pc
    ///
    /// The breakpoint is disabled, one instruction is executed and the breakpoint is enabled
    /// again. Returns `None` if there is no enabled breakpoint at the pc.
    pub fn step_over_breakpoint(&mut self) -> Result<Option<Stop>> {
        let pc = self.pc()?;
        if !self.breakpoints.is_enabled_at(pc) {
            return Ok(None);
        }

        debug!("stepping over the breakpoint at {pc}");
        self.breakpoints.disable_at(self.tracee, pc)?;
        let stop = self.single_step();
        match &stop {
            Ok(s) if !s.is_alive() => {
                self.breakpoints.forget(pc);
            }
            _ => self.breakpoints.enable_at(self.tracee, pc)?,
        }
        stop.map(Some)
    }

    /// Executes one instruction, stepping over a breakpoint at the pc if there is one
    pub fn step_instruction(&mut self) -> Result<Stop> {
        match self.step_over_breakpoint()? {
            Some(stop) => Ok(stop),
            None => self.single_step(),
        }
    }

    /// Resumes the tracee until it stops again
    pub fn continue_execution(&mut self) -> Result<Stop> {
        if let Some(stop) = self.step_over_breakpoint()? {
            if !matches!(stop, Stop::Step(_)) {
                return Ok(stop);
            }
        }
        self.tracee.cont(None)?;
        self.wait_stop()
    }

    /// Steps instructions until the pc is on a different source line
    ///
    /// # Errors
    ///
    /// [`DebuggerError::NoDebugInfoForAddress`] if the starting pc has no line information, or
    /// if stepping reached code without line information. In the second case the tracee stays
    /// stopped there.
    pub fn step_in(&mut self) -> Result<Stop> {
        let start = self.current_line()?;
        debug!("step in from {}", start.location());

        loop {
            let stop = self.step_instruction()?;
            if stop.pc().is_none() {
                return Ok(stop);
            }
            let line = self.current_line()?;
            if !line.same_line(start) {
                return Ok(stop);
            }
        }
    }

    /// Runs to the next line of the current function, without stopping in called functions
    ///
    /// Every line table row of the function except the current one gets a temporary
    /// breakpoint, and so does the return address. Covering the whole function keeps this
    /// working when the function is reentered through recursion.
    pub fn step_over(&mut self) -> Result<Stop> {
        let mut plan = StepPlan::default();
        let res = self.plan_step_over(&mut plan);
        self.finish_plan(plan, res)
    }

    fn plan_step_over(&mut self, plan: &mut StepPlan) -> Result<Stop> {
        let index: &'a D = self.index;
        let pc = self.translator.to_static(self.pc()?)?;
        let func = index.function_at(pc)?;
        let table = index.line_table_at(pc)?;
        let start = index.line_entry_at(pc)?;
        debug!("step over in {} from {}", func.name, start.location());

        let mut cursor = table.cursor_from(func.low);
        while let Some(entry) = cursor.entry() {
            if entry.address >= func.high {
                break;
            }
            if entry.address != start.address && !entry.end_sequence {
                plan.cover(
                    self.tracee,
                    self.breakpoints,
                    self.translator.to_runtime(entry.address),
                )?;
            }
            cursor.advance();
        }

        let ret = self.return_address()?;
        plan.cover(self.tracee, self.breakpoints, ret)?;

        self.continue_execution()
    }

    /// Runs until the current function returns to its caller
    pub fn step_out(&mut self) -> Result<Stop> {
        let mut plan = StepPlan::default();
        let res = self.plan_step_out(&mut plan);
        self.finish_plan(plan, res)
    }

    fn plan_step_out(&mut self, plan: &mut StepPlan) -> Result<Stop> {
        let ret = self.return_address()?;
        debug!("step out to {ret}");
        plan.cover(self.tracee, self.breakpoints, ret)?;
        self.continue_execution()
    }

    /// The return address of the current frame, one word above the frame base
    pub fn return_address(&self) -> Result<Addr> {
        let frame_base = self.tracee.read_registers()?.frame_base();
        let slot = frame_base
            .checked_add(RETURN_ADDRESS_OFFSET)
            .ok_or(DebuggerError::MemoryFault(frame_base))?;
        Ok(self.tracee.read_word(slot)?.into())
    }

    fn finish_plan(&mut self, plan: StepPlan, res: Result<Stop>) -> Result<Stop> {
        let alive = match &res {
            Ok(stop) => stop.is_alive(),
            Err(DebuggerError::TraceeExited) => false,
            Err(_) => true,
        };
        let cleanup = plan.retire(self.tracee, self.breakpoints, alive);
        let stop = res?;
        cleanup?;
        Ok(stop)
    }
}
