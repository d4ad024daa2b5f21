//! # Debugger
//!
//! The [`Debugger`] is a debugging session: one traced process, its debug information, the
//! breakpoints and the load bias. Every command of the command layer maps to one method here,
//! and [`Debugger::run_debugger`] connects them to a [`DebuggerUI`].
//!
//! Memory and register commands are only accepted while the tracee is stopped. Once it has
//! exited they fail with [`DebuggerError::TraceeExited`].

use std::fmt::Display;
use std::path::Path;

use tracing::{debug, error, info, warn};

use crate::addr::{Addr, StaticAddr};
use crate::breakpoint::Breakpoints;
use crate::consts::WORD_BYTES;
use crate::dbginfo::{DebugInfoIndex, SourceLocation, Symbol};
use crate::errors::{DebuggerError, Result};
use crate::feedback::Feedback;
use crate::memorymap::ProcessMemoryMap;
use crate::regs::{Register, RegisterSet};
use crate::step::{StepEngine, Stop};
use crate::tracee::{Tracee, TraceeState, WaitOutcome};
use crate::translate::AddressTranslator;
use crate::ui::{DebuggerUI, Status};
use crate::unwind::{Backtrace, CallStackWalker};
use crate::variable::{TraceeContext, VariableValue};
use crate::Word;

/// Where the tracee is stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentLocation {
    pub pc: Addr,
    pub function: Option<String>,
    pub source: SourceLocation,
}

impl Display for CurrentLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.function {
            Some(func) => write!(f, "{} in {func} at {}", self.pc, self.source),
            None => write!(f, "{} at {}", self.pc, self.source),
        }
    }
}

/// A function of the executable, as listed by the `functions` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSummary {
    pub name: String,
    pub low: StaticAddr,
    pub high: StaticAddr,
    /// Runtime address of the first instruction
    pub entry: Addr,
}

impl Display for FunctionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}, {}) at {}",
            self.name, self.low, self.high, self.entry
        )
    }
}

pub struct Debugger<T: Tracee, D: DebugInfoIndex> {
    tracee: T,
    index: D,
    state: TraceeState,
    breakpoints: Breakpoints,
    translator: Option<AddressTranslator>,
}

impl<T: Tracee, D: DebugInfoIndex> Debugger<T, D> {
    /// Creates a session for a tracee that has not been waited for yet
    pub fn new(tracee: T, index: D) -> Self {
        Self {
            tracee,
            index,
            state: TraceeState::Created,
            breakpoints: Breakpoints::new(),
            translator: None,
        }
    }

    pub fn state(&self) -> TraceeState {
        self.state
    }

    pub fn tracee(&self) -> &T {
        &self.tracee
    }

    pub fn index(&self) -> &D {
        &self.index
    }

    pub fn breakpoints(&self) -> &Breakpoints {
        &self.breakpoints
    }

    /// Waits for the initial stop of the tracee and resolves the load bias
    ///
    /// # Errors
    ///
    /// [`DebuggerError::TraceeExited`] if the tracee exits instead of stopping, which happens
    /// when the program could not be executed.
    pub fn start(&mut self) -> Result<()> {
        match self.tracee.wait()? {
            WaitOutcome::Stopped { signal, .. } => {
                debug!("initial stop with {signal}");
                self.state = TraceeState::Stopped;
            }
            WaitOutcome::Exited(code) => {
                self.state = TraceeState::Exited(code);
                error!("the debuggee exited before it could be debugged");
                return Err(DebuggerError::TraceeExited);
            }
            WaitOutcome::Signaled(sig) => {
                self.state = TraceeState::Terminated(sig);
                error!("the debuggee was killed before it could be debugged");
                return Err(DebuggerError::TraceeExited);
            }
        }

        let translator =
            AddressTranslator::resolve(&self.tracee, self.index.is_position_independent())?;
        info!("load bias is {}", translator.bias());
        self.translator = Some(translator);
        Ok(())
    }

    fn ensure_stopped(&self) -> Result<()> {
        match self.state {
            TraceeState::Stopped => Ok(()),
            TraceeState::Exited(_) | TraceeState::Terminated(_) => {
                Err(DebuggerError::TraceeExited)
            }
            TraceeState::Created | TraceeState::Running => Err(DebuggerError::NoDebuggee),
        }
    }

    fn translator(&self) -> Result<&AddressTranslator> {
        self.translator.as_ref().ok_or(DebuggerError::NoDebuggee)
    }

    /// Runs a step operation and tracks what it did to the tracee
    fn run_step<F>(&mut self, op: F) -> Result<Stop>
    where
        F: FnOnce(&mut StepEngine<'_, T, D>) -> Result<Stop>,
    {
        self.ensure_stopped()?;
        let translator = self.translator.as_ref().ok_or(DebuggerError::NoDebuggee)?;
        self.state = TraceeState::Running;
        let res = op(&mut StepEngine::new(
            &mut self.tracee,
            &mut self.breakpoints,
            translator,
            &self.index,
        ));

        let stop = match res {
            Ok(stop) => stop,
            Err(e) => {
                if !matches!(e, DebuggerError::TraceeExited) {
                    self.state = TraceeState::Stopped;
                }
                return Err(e);
            }
        };
        self.state = match stop {
            Stop::Exited(code) => TraceeState::Exited(code),
            Stop::Terminated(sig) => TraceeState::Terminated(sig),
            _ => TraceeState::Stopped,
        };
        if !self.state.is_alive() {
            info!("debuggee {}", self.state);
            self.breakpoints.clear();
        }
        if let Stop::Signal(sig) = stop {
            return Err(DebuggerError::SignalDelivered(sig));
        }
        Ok(stop)
    }

    pub fn cont(&mut self) -> Result<Stop> {
        self.run_step(|engine| engine.continue_execution())
    }

    pub fn stepi(&mut self) -> Result<Stop> {
        self.run_step(|engine| engine.step_instruction())
    }

    pub fn step_in(&mut self) -> Result<Stop> {
        self.run_step(|engine| engine.step_in())
    }

    pub fn step_over(&mut self) -> Result<Stop> {
        self.run_step(|engine| engine.step_over())
    }

    pub fn step_out(&mut self) -> Result<Stop> {
        self.run_step(|engine| engine.step_out())
    }

    /// Sets a breakpoint at a runtime address
    ///
    /// Setting a breakpoint where one already exists changes nothing.
    pub fn set_breakpoint(&mut self, addr: Addr) -> Result<Addr> {
        self.ensure_stopped()?;
        if !self.breakpoints.insert(&mut self.tracee, addr)? {
            warn!("there already is a breakpoint at {addr}");
        }
        Ok(addr)
    }

    /// Sets a breakpoint after the prologue of the named function
    ///
    /// The breakpoint goes on the first line table row after the entry of the function. If
    /// there is none inside the function, it goes on the entry itself.
    pub fn set_breakpoint_at_function(&mut self, name: &str) -> Result<Addr> {
        self.ensure_stopped()?;
        let func = *self
            .index
            .functions_by_name(name)
            .first()
            .ok_or_else(|| DebuggerError::NoSuchFunction(name.to_string()))?;

        let mut target = func.low;
        if let Some(mut cursor) = self
            .index
            .line_table_at(func.low)
            .ok()
            .and_then(|t| t.cursor_at(func.low))
        {
            while let Some(entry) = cursor.advance() {
                if entry.address > func.low {
                    if entry.address < func.high {
                        target = entry.address;
                    }
                    break;
                }
            }
        }
        debug!("breakpoint for {name} at {target}");

        let addr = self.translator()?.to_runtime(target);
        self.set_breakpoint(addr)
    }

    /// Sets breakpoints on the first statement of a source line
    ///
    /// `file` matches every source file whose path ends with it. Returns one address per line
    /// table with a match.
    pub fn set_breakpoint_at_source_line(&mut self, file: &Path, line: u64) -> Result<Vec<Addr>> {
        self.ensure_stopped()?;
        let translator = self.translator()?;
        let addrs: Vec<Addr> = self
            .index
            .entries_for_source_line(file, line)
            .into_iter()
            .map(|e| translator.to_runtime(e.address))
            .collect();
        if addrs.is_empty() {
            return Err(DebuggerError::NoSuchSourceLine {
                file: file.to_string_lossy().to_string(),
                line,
            });
        }
        for addr in &addrs {
            self.set_breakpoint(*addr)?;
        }
        Ok(addrs)
    }

    pub fn remove_breakpoint(&mut self, addr: Addr) -> Result<()> {
        self.ensure_stopped()?;
        self.breakpoints.remove(&mut self.tracee, addr)
    }

    pub fn dump_registers(&self) -> Result<RegisterSet> {
        self.ensure_stopped()?;
        self.tracee.read_registers()
    }

    pub fn read_register(&self, reg: Register) -> Result<u64> {
        Ok(self.dump_registers()?.get(reg))
    }

    pub fn write_register(&mut self, reg: Register, value: u64) -> Result<()> {
        let mut regs = self.dump_registers()?;
        regs.set(reg, value);
        self.tracee.write_registers(&regs)
    }

    /// Reads a word as the program sees it, without the trap bytes of breakpoints
    pub fn read_memory(&self, addr: Addr) -> Result<Word> {
        self.ensure_stopped()?;
        check_word_fits(addr)?;
        let word = self.tracee.read_word(addr)?;
        Ok(self.breakpoints.hide_traps(addr, word))
    }

    /// Writes a word, keeping the trap bytes of breakpoints inside it in place
    pub fn write_memory(&mut self, addr: Addr, value: Word) -> Result<()> {
        self.ensure_stopped()?;
        check_word_fits(addr)?;
        let patched = self.breakpoints.keep_traps(addr, value);
        self.tracee.write_word(addr, patched)
    }

    /// The function and source line of the pc
    pub fn current_location(&self) -> Result<CurrentLocation> {
        self.ensure_stopped()?;
        let pc = self.tracee.read_registers()?.pc();
        let static_pc = self.translator()?.to_static(pc)?;
        let source = self.index.line_entry_at(static_pc)?.location();
        let function = self
            .index
            .function_at(static_pc)
            .ok()
            .map(|f| f.name.clone());
        Ok(CurrentLocation {
            pc,
            function,
            source,
        })
    }

    pub fn backtrace(&self) -> Result<Backtrace> {
        self.ensure_stopped()?;
        CallStackWalker::new(&self.tracee, self.translator()?, &self.index).backtrace()
    }

    pub fn lookup_symbol(&self, name: &str) -> Vec<Symbol> {
        self.index
            .symbols_by_name(name)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Values of the variables and parameters of the function at the pc
    ///
    /// Variables whose location cannot be evaluated are left out.
    pub fn read_variables(&self) -> Result<Vec<VariableValue>> {
        self.ensure_stopped()?;
        let translator = self.translator()?;
        let pc = translator.to_static(self.tracee.read_registers()?.pc())?;
        let func = self.index.function_at(pc)?;

        let mut ctx = TraceeContext::new(&self.tracee, translator)?;
        let mut values = Vec::with_capacity(func.variables.len());
        for var in &func.variables {
            match ctx.read_variable(func, var) {
                Ok(v) => values.push(v),
                Err(e) => warn!("could not read variable {}: {e}", var.name),
            }
        }
        Ok(values)
    }

    pub fn functions(&self) -> Result<Vec<FunctionSummary>> {
        let translator = self.translator()?;
        Ok(self
            .index
            .functions()
            .iter()
            .map(|f| FunctionSummary {
                name: f.name.clone(),
                low: f.low,
                high: f.high,
                entry: translator.to_runtime(f.low),
            })
            .collect())
    }

    pub fn memory_map(&self) -> Result<ProcessMemoryMap> {
        self.ensure_stopped()?;
        self.tracee.memory_map()
    }

    fn stopped_feedback(&self, stop: Stop) -> Feedback {
        Feedback::Stopped {
            stop,
            location: self.current_location().ok(),
        }
    }

    /// Executes one command
    pub fn execute(&mut self, status: Status) -> Result<Feedback> {
        Ok(match status {
            Status::Quit => Feedback::Ok,
            Status::Continue => {
                let stop = self.cont()?;
                self.stopped_feedback(stop)
            }
            Status::StepSingle => {
                let stop = self.stepi()?;
                self.stopped_feedback(stop)
            }
            Status::StepInto => {
                let stop = self.step_in()?;
                self.stopped_feedback(stop)
            }
            Status::StepOver => {
                let stop = self.step_over()?;
                self.stopped_feedback(stop)
            }
            Status::StepOut => {
                let stop = self.step_out()?;
                self.stopped_feedback(stop)
            }
            Status::SetBreakpoint(addr) => Feedback::Breakpoints(vec![self.set_breakpoint(addr)?]),
            Status::SetBreakpointAtFunction(name) => {
                Feedback::Breakpoints(vec![self.set_breakpoint_at_function(&name)?])
            }
            Status::SetBreakpointAtLine(file, line) => {
                Feedback::Breakpoints(self.set_breakpoint_at_source_line(&file, line)?)
            }
            Status::DelBreakpoint(addr) => {
                self.remove_breakpoint(addr)?;
                Feedback::Ok
            }
            Status::DumpRegisters => Feedback::Registers(self.dump_registers()?),
            Status::ReadRegister(reg) => Feedback::Register(reg, self.read_register(reg)?),
            Status::SetRegister(reg, value) => {
                self.write_register(reg, value)?;
                Feedback::Ok
            }
            Status::ReadMem(addr) => Feedback::Word(addr, self.read_memory(addr)?),
            Status::WriteMem(addr, value) => {
                self.write_memory(addr, value)?;
                Feedback::Ok
            }
            Status::Location => Feedback::Location(self.current_location()?),
            Status::Backtrace => Feedback::Backtrace(self.backtrace()?),
            Status::GetSymbolsByName(name) => Feedback::Symbols(self.lookup_symbol(&name)),
            Status::Variables => Feedback::Variables(self.read_variables()?),
            Status::Functions => Feedback::Functions(self.functions()?),
            Status::Maps => Feedback::MemoryMap(self.memory_map()?),
        })
    }

    /// Runs the session until the user quits or the tracee is gone
    ///
    /// Waits for the initial stop first if that has not happened yet. The tracee is killed
    /// when the user quits while it is still alive.
    pub fn run_debugger(&mut self, ui: &mut impl DebuggerUI) -> Result<()> {
        if self.state == TraceeState::Created {
            self.start()?;
        }

        let mut feedback = match self.current_location() {
            Ok(loc) => Feedback::Location(loc),
            Err(_) => Feedback::Ok,
        };
        loop {
            let status = match ui.process(feedback) {
                Err(e) => {
                    error!("{e}");
                    return Err(e);
                }
                Ok(s) => s,
            };
            if status == Status::Quit {
                break;
            }
            feedback = self.execute(status).into();
            if !self.state.is_alive() {
                ui.finished(feedback)?;
                break;
            }
        }

        self.cleanup()
    }

    /// Kills the tracee if it is still alive
    pub fn cleanup(&mut self) -> Result<()> {
        if self.state.is_alive() && self.state != TraceeState::Created {
            info!("killing the debuggee");
            self.tracee.kill()?;
            self.state = match self.tracee.wait() {
                Ok(WaitOutcome::Exited(code)) => TraceeState::Exited(code),
                Ok(WaitOutcome::Signaled(sig)) => TraceeState::Terminated(sig),
                Ok(WaitOutcome::Stopped { .. }) | Err(_) => {
                    TraceeState::Terminated(nix::sys::signal::Signal::SIGKILL)
                }
            };
            self.breakpoints.clear();
        }
        Ok(())
    }
}

/// A word at `addr` must not wrap around the end of the address space
fn check_word_fits(addr: Addr) -> Result<()> {
    match addr.checked_add(WORD_BYTES - 1) {
        Some(_) => Ok(()),
        None => Err(DebuggerError::MemoryFault(addr)),
    }
}
