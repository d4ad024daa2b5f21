//! # Backtraces
//!
//! Reconstructs the call chain by following the saved frame bases on the stack. Each frame base
//! points at the caller's saved frame base, and the return address sits one word above it. The
//! walk ends at the entry function of the program, usually `main`.

use std::fmt::Display;

use tracing::{debug, warn};

use crate::addr::Addr;
use crate::consts::RETURN_ADDRESS_OFFSET;
use crate::dbginfo::{DebugInfoIndex, FunctionInfo};
use crate::errors::Result;
use crate::tracee::Tracee;
use crate::translate::AddressTranslator;

/// Frames beyond this depth are not walked
pub const MAX_FRAMES: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacktraceFrame {
    pub index: usize,
    pub name: String,
    /// Runtime address of the first instruction of the function
    pub start_addr: Addr,
    /// Runtime address execution continues at in this frame
    pub addr: Addr,
}

/// Frames from the innermost to the outermost
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Backtrace {
    pub frames: Vec<BacktraceFrame>,
}

impl Backtrace {
    /// Appends the next outer frame, numbering it by its position
    fn push(&mut self, func: &FunctionInfo, start_addr: Addr, addr: Addr) {
        self.frames.push(BacktraceFrame {
            index: self.frames.len(),
            name: func.name.clone(),
            start_addr,
            addr,
        });
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl Display for Backtrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for frame in &self.frames {
            writeln!(
                f,
                "frame #{}: {} {} (at {})",
                frame.index, frame.start_addr, frame.name, frame.addr
            )?;
        }
        Ok(())
    }
}

/// Walks the frame base chain of a stopped tracee
pub struct CallStackWalker<'a, T: Tracee, D: DebugInfoIndex> {
    tracee: &'a T,
    translator: &'a AddressTranslator,
    index: &'a D,
}

impl<'a, T: Tracee, D: DebugInfoIndex> CallStackWalker<'a, T, D> {
    pub fn new(tracee: &'a T, translator: &'a AddressTranslator, index: &'a D) -> Self {
        Self {
            tracee,
            translator,
            index,
        }
    }

    fn function_at(&self, addr: Addr) -> Result<&'a FunctionInfo> {
        let index: &'a D = self.index;
        index.function_at(self.translator.to_static(addr)?)
    }

    /// Walks from the current registers to the entry function
    ///
    /// # Errors
    ///
    /// Fails with [`DebuggerError::NoDebugInfoForAddress`](crate::errors::DebuggerError) if a
    /// return address lies outside of every known function, or if stack memory cannot be read.
    pub fn backtrace(&self) -> Result<Backtrace> {
        let regs = self.tracee.read_registers()?;
        let mut backtrace = Backtrace::default();
        let pc = regs.pc();
        let func = self.function_at(pc)?;
        backtrace.push(func, self.translator.to_runtime(func.low), pc);
        self.walk(&mut backtrace, func, regs.frame_base())?;
        Ok(backtrace)
    }

    fn walk(
        &self,
        backtrace: &mut Backtrace,
        mut func: &'a FunctionInfo,
        mut frame_base: Addr,
    ) -> Result<()> {
        let entry = self.index.entry_function();
        while func.name != entry {
            if frame_base == Addr::default() {
                warn!("frame chain ended before reaching {entry}");
                break;
            }
            if backtrace.len() >= MAX_FRAMES {
                warn!("backtrace is deeper than {MAX_FRAMES} frames, stopping");
                break;
            }

            let Some(ret_slot) = frame_base.checked_add(RETURN_ADDRESS_OFFSET) else {
                warn!("frame base {frame_base} is at the end of the address space, stopping");
                break;
            };
            let ret: Addr = self.tracee.read_word(ret_slot)?.into();
            func = self.function_at(ret)?;
            debug!("frame {} returns into {} at {ret}", backtrace.len(), func.name);
            backtrace.push(func, self.translator.to_runtime(func.low), ret);
            frame_base = self.tracee.read_word(frame_base)?.into();
        }
        Ok(())
    }
}
